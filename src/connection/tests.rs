use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::duplex;
use tokio_util::codec::{FramedRead, FramedWrite};

use super::*;
use crate::{
    auth::AllowAll,
    packet::{
        FileFragment,
        FileStreamStart,
        InfoLog,
        Login,
        PASSWORD_HASH_LEN,
        PROTOCOL_VERSION,
        StreamMetadata,
        TransferId,
    },
    registry::ProtocolHandlers,
};

fn setup(role: Role) -> ConnectionSetup {
    ConnectionSetup::new(
        role,
        Arc::new(PacketRegistry::standard(ProtocolHandlers::default())),
        Arc::new(AllowAll),
    )
}

#[tokio::test]
async fn send_writes_whole_frame_with_role_discriminator() {
    let (local, remote) = duplex(1024);
    let (conn, _driver) = Connection::establish(local, None, setup(Role::Server));
    conn.send(InfoLog::new("hello")).await.expect("send");

    let mut reader = FramedRead::new(remote, FrameCodec::default());
    let frame = reader.next().await.expect("frame").expect("decode");
    assert_eq!(frame.discriminator(), 6);
    assert_eq!(&frame.payload()[..], b"hello\0");
}

#[tokio::test]
async fn send_rejects_kinds_the_role_cannot_send() {
    let (local, _remote) = duplex(1024);
    let (conn, _driver) = Connection::establish(local, None, setup(Role::Server));
    let login = Login {
        account_id: -1,
        username: "ada".into(),
        password_hash: [0; PASSWORD_HASH_LEN],
        version: PROTOCOL_VERSION,
    };
    let err = conn.send(login).await.expect_err("server cannot send login");
    assert!(matches!(
        err,
        SendError::Unregistered {
            kind: PacketKind::Login,
            role: Role::Server
        }
    ));
}

#[tokio::test]
async fn closed_connection_refuses_sends() {
    let (local, _remote) = duplex(1024);
    let (conn, _driver) = Connection::establish(local, None, setup(Role::Client));
    conn.close();
    assert!(conn.is_closed());
    assert!(matches!(conn.send(InfoLog::new("late")).await, Err(SendError::Closed)));
}

#[tokio::test]
async fn first_verification_wins() {
    let (local, _remote) = duplex(64);
    let (conn, _driver) = Connection::establish(local, None, setup(Role::Server));
    assert!(!conn.is_verified());
    assert!(conn.verify(VerifiedAccount {
        id: 1,
        username: "ada".into()
    }));
    assert!(!conn.verify(VerifiedAccount {
        id: 2,
        username: "eve".into()
    }));
    assert_eq!(conn.account().map(|a| a.id), Some(1));
}

#[tokio::test]
async fn driver_exits_on_eof_and_shuts_writer() {
    let (local, remote) = duplex(64);
    let (conn, driver) = Connection::establish(local, None, setup(Role::Server));
    let task = tokio::spawn(driver.run());
    drop(remote);
    task.await.expect("join").expect("clean exit");
    assert!(conn.is_closed());
}

#[tokio::test]
async fn driver_reports_oversized_frames() {
    let (local, remote) = duplex(256);
    let mut config = setup(Role::Server);
    config.max_frame_length = 64;
    let (_conn, driver) = Connection::establish(local, None, config);
    let task = tokio::spawn(driver.run());

    let (_read, mut write) = tokio::io::split(remote);
    tokio::io::AsyncWriteExt::write_all(&mut write, &[6, 0, 1, 0, 0])
        .await
        .expect("write header");
    let result = task.await.expect("join");
    assert!(matches!(result, Err(CodecError::Framing(_))));
}

fn client_frame(registry: &PacketRegistry, packet: impl Into<Packet>) -> Frame {
    let packet = packet.into();
    let descriptor = registry
        .for_send(packet.kind(), Role::Client)
        .expect("client sendable");
    Frame::new(descriptor.discriminator(), packet.encode().expect("encode"))
}

#[tokio::test]
async fn stalled_transfers_expire_while_other_traffic_flows() {
    let spool = tempfile::tempdir().expect("spool dir");
    let mut config = setup(Role::Server);
    config.spool_dir = spool.path().to_path_buf();
    config.limits.session_timeout = Duration::from_millis(100);
    config.purge_interval = Duration::from_millis(60);
    let registry = Arc::clone(&config.registry);
    let (local, remote) = duplex(4096);
    let (_conn, driver) = Connection::establish(local, None, config);
    let _task = tokio::spawn(driver.run());

    let (_read, write) = tokio::io::split(remote);
    let mut writer = FramedWrite::new(write, FrameCodec::default());
    let transfer_id = TransferId::new(7);
    let start = FileStreamStart {
        name: "half.bin".into(),
        label: "half.bin".into(),
        transfer_id,
        fragment_count: 2,
        file_length: 6,
        metadata: StreamMetadata::new(),
    };
    let fragment = FileFragment {
        name: "half.bin".into(),
        transfer_id,
        index: 0,
        data: Bytes::from_static(b"abc"),
    };
    writer.send(client_frame(&registry, start)).await.expect("start");
    writer.send(client_frame(&registry, fragment)).await.expect("fragment");

    // Frames arrive far more often than the sweep period, so the read never idles.
    let spooled = || std::fs::read_dir(spool.path()).expect("list").count();
    let mut seen_spooled = false;
    for _ in 0..24 {
        writer
            .send(client_frame(&registry, InfoLog::new("still here")))
            .await
            .expect("chatter");
        seen_spooled |= spooled() == 1;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(seen_spooled);
    assert_eq!(spooled(), 0);
}
