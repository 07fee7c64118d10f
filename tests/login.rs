//! Login flows served by the file server.

mod common;

use std::sync::Arc;

use common::{QUIET_WAIT, REPLY_WAIT, TestServer, info_messages, login, new_account, register};
use filewire::{
    FileStore,
    Packet,
    packet::{AccountIdAssignment, FilesListRequest, PROTOCOL_VERSION},
    store::AccountStore,
};
use rstest::rstest;

#[tokio::test]
async fn pending_user_gets_an_account() {
    let server = TestServer::new(&["ada"]);
    let mut peer = server.raw_client();

    peer.send_packet(new_account("ada", "hunter2")).await;
    let packets = peer.drain_packets(QUIET_WAIT).await;

    assert_eq!(
        packets.first(),
        Some(&Packet::AccountIdAssignment(AccountIdAssignment { account_id: 0 }))
    );
    assert_eq!(info_messages(&packets), ["Your account has been created."]);
    assert!(!server.state.store().is_pending("ada"));
    assert_eq!(server.state.sessions().len(), 1);
}

#[tokio::test]
async fn unregistered_user_is_disconnected() {
    let server = TestServer::new(&[]);
    let mut peer = server.raw_client();

    peer.send_packet(new_account("mallory", "pw")).await;

    assert!(peer.closed_by_peer(REPLY_WAIT).await);
    assert!(server.state.sessions().is_empty());
}

#[rstest]
#[case::exact("ada")]
#[case::case_insensitive("  ADA ")]
#[tokio::test]
async fn returning_user_logs_in(#[case] username: &str) {
    let server = TestServer::new(&["ada"]);
    let id = register(&server, "ada", "hunter2").await;

    let mut peer = server.raw_client();
    peer.send_packet(login(id, username, "hunter2")).await;
    let packets = peer.drain_packets(QUIET_WAIT).await;

    assert!(!packets.iter().any(|p| matches!(p, Packet::AccountIdAssignment(_))));
    assert_eq!(info_messages(&packets), ["Successfully connected to server."]);
    assert!(peer.conn.is_verified());
}

#[tokio::test]
async fn wrong_password_is_refused_and_requests_close_the_connection() {
    let server = TestServer::new(&["ada"]);
    let id = register(&server, "ada", "hunter2").await;

    let mut peer = server.raw_client();
    peer.send_packet(login(id, "ada", "wrong")).await;
    let packets = peer.drain_packets(QUIET_WAIT).await;
    assert_eq!(info_messages(&packets), ["Invalid login credentials."]);

    peer.send_packet(FilesListRequest).await;
    assert!(peer.closed_by_peer(REPLY_WAIT).await);
}

#[tokio::test]
async fn stale_account_id_is_corrected() {
    let server = TestServer::new(&["ada", "eve"]);
    let ada = register(&server, "ada", "pw").await;
    let eve = register(&server, "eve", "pw").await;
    assert_ne!(ada, eve);

    let mut peer = server.raw_client();
    peer.send_packet(login(ada, "eve", "pw")).await;
    let packets = peer.drain_packets(QUIET_WAIT).await;

    assert_eq!(
        packets.first(),
        Some(&Packet::AccountIdAssignment(AccountIdAssignment { account_id: eve }))
    );
    assert_eq!(info_messages(&packets), ["Successfully connected to server."]);
}

#[tokio::test]
async fn unknown_account_is_disconnected() {
    let server = TestServer::new(&[]);
    let mut peer = server.raw_client();

    peer.send_packet(login(7, "nobody", "pw")).await;

    assert!(peer.closed_by_peer(REPLY_WAIT).await);
}

#[tokio::test]
async fn requests_before_login_close_the_connection_silently() {
    let server = TestServer::new(&["ada"]);
    let mut peer = server.raw_client();

    peer.send_packet(FilesListRequest).await;

    assert!(peer.closed_by_peer(REPLY_WAIT).await);
}

#[tokio::test]
async fn old_protocol_version_gets_a_hint() {
    let server = TestServer::new(&["ada"]);
    let mut peer = server.raw_client();

    let mut request = new_account("ada", "pw");
    request.version = PROTOCOL_VERSION + 1;
    peer.send_packet(request).await;
    let messages = info_messages(&peer.drain_packets(QUIET_WAIT).await);

    assert_eq!(messages.len(), 2);
    assert!(messages[0].contains("protocol version"));
    assert_eq!(messages[1], "Your account has been created.");
}

#[tokio::test]
async fn accounts_survive_a_server_restart() {
    let records = tempfile::tempdir().expect("records dir");
    let path = records.path().join("records.toml");
    let first = TestServer::with_store(&["ada"], Arc::new(FileStore::open(&path).expect("open")));
    let id = register(&first, "ada", "pw").await;
    drop(first);

    let second = TestServer::with_store(&[], Arc::new(FileStore::open(&path).expect("reopen")));
    let mut peer = second.raw_client();
    peer.send_packet(login(id, "ada", "pw")).await;
    let packets = peer.drain_packets(QUIET_WAIT).await;

    assert!(!packets.iter().any(|p| matches!(p, Packet::AccountIdAssignment(_))));
    assert_eq!(info_messages(&packets), ["Successfully connected to server."]);
    assert!(!second.state.store().is_pending("ada"));
}
