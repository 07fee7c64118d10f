//! Frame dispatch on a live server connection: unknown discriminators,
//! undecodable payloads, misaddressed packets and fragmented reads.

mod common;

use bytes::Bytes;
use common::{QUIET_WAIT, REPLY_WAIT, TestServer, info_messages, login, new_account, register};
use filewire::{
    Frame,
    Packet,
    dispatch::MAX_DECODE_FAILURES,
    packet::{AccountIdAssignment, FilesListRequest},
};
use filewire_testing::{LoggerHandle, RawPeer, logger, split_at};
use rstest::rstest;

/// Raw frame bytes for `packet` sent by a client.
fn client_frame_bytes(discriminator: u8, packet: impl Into<Packet>) -> Vec<u8> {
    let payload = packet.into().encode().expect("encode");
    let len = u32::try_from(payload.len()).expect("payload fits");
    let mut bytes = vec![discriminator];
    bytes.extend_from_slice(&len.to_be_bytes());
    bytes.extend_from_slice(&payload);
    bytes
}

async fn logged_in(server: &TestServer) -> RawPeer {
    let id = register(server, "ada", "pw").await;
    let mut peer = server.raw_client();
    peer.send_packet(login(id, "ada", "pw")).await;
    let messages = info_messages(&peer.drain_packets(QUIET_WAIT).await);
    assert_eq!(messages, ["Successfully connected to server."]);
    peer
}

#[rstest]
#[tokio::test]
async fn unknown_discriminator_is_dropped_and_logged(mut logger: LoggerHandle) {
    let server = TestServer::new(&["ada"]);
    let mut peer = server.raw_client();

    peer.send_frame(Frame::new(200, Bytes::from_static(b"junk"))).await;
    peer.send_packet(new_account("ada", "pw")).await;
    let messages = info_messages(&peer.drain_packets(QUIET_WAIT).await);

    assert_eq!(messages, ["Your account has been created."]);
    assert!(
        logger
            .messages()
            .iter()
            .any(|m| m.contains("unknown packet discriminator")),
        "unknown discriminator not logged"
    );
}

#[tokio::test]
async fn decode_failures_below_threshold_keep_the_connection() {
    let server = TestServer::new(&["ada"]);
    let mut peer = server.raw_client();

    for _ in 1..MAX_DECODE_FAILURES {
        peer.send_frame(Frame::new(8, Bytes::new())).await;
    }
    peer.send_packet(new_account("ada", "pw")).await;

    let messages = info_messages(&peer.drain_packets(QUIET_WAIT).await);
    assert_eq!(messages, ["Your account has been created."]);
}

#[tokio::test]
async fn repeated_decode_failures_close_the_connection() {
    let server = TestServer::new(&["ada"]);
    let mut peer = server.raw_client();

    for _ in 0..MAX_DECODE_FAILURES {
        peer.send_frame(Frame::new(8, Bytes::new())).await;
    }

    assert!(peer.closed_by_peer(REPLY_WAIT).await);
}

#[tokio::test]
async fn successful_decode_resets_the_failure_count() {
    let server = TestServer::new(&["ada"]);
    let mut peer = server.raw_client();

    for _ in 1..MAX_DECODE_FAILURES {
        peer.send_frame(Frame::new(8, Bytes::new())).await;
    }
    peer.send_packet(new_account("ada", "pw")).await;
    for _ in 1..MAX_DECODE_FAILURES {
        peer.send_frame(Frame::new(8, Bytes::new())).await;
    }
    peer.send_packet(FilesListRequest).await;

    let messages = info_messages(&peer.drain_packets(QUIET_WAIT).await);
    assert_eq!(
        messages,
        ["Your account has been created.", "No files are stored on the server."]
    );
}

#[tokio::test]
async fn packets_for_the_other_role_are_dropped() {
    let server = TestServer::new(&["ada"]);
    let mut peer = logged_in(&server).await;

    // Discriminator 9 is the client-bound account id assignment.
    peer.send_bytes(&client_frame_bytes(9, AccountIdAssignment { account_id: 3 }))
        .await;
    peer.send_packet(FilesListRequest).await;

    let messages = info_messages(&peer.drain_packets(QUIET_WAIT).await);
    assert_eq!(messages, ["No files are stored on the server."]);
}

#[rstest]
#[case::byte_at_a_time(&[1, 2, 3, 4, 5, 6, 7, 8, 9])]
#[case::split_header(&[3])]
#[case::split_payload(&[5, 12])]
#[tokio::test]
async fn frames_survive_arbitrary_read_boundaries(#[case] points: &[usize]) {
    let server = TestServer::new(&["ada"]);
    let mut peer = server.raw_client();

    let bytes = client_frame_bytes(8, new_account("ada", "pw"));
    for chunk in split_at(&bytes, points) {
        peer.send_bytes(&chunk).await;
        tokio::task::yield_now().await;
    }

    let messages = info_messages(&peer.drain_packets(QUIET_WAIT).await);
    assert_eq!(messages, ["Your account has been created."]);
}

#[tokio::test]
async fn oversized_frames_end_the_connection() {
    let server = TestServer::new(&["ada"]);
    let mut peer = server.raw_client();

    let mut header = vec![8];
    header.extend_from_slice(&u32::MAX.to_be_bytes());
    peer.send_bytes(&header).await;

    assert!(peer.closed_by_peer(REPLY_WAIT).await);
    assert!(peer.join().await.is_err());
}
