//! In-memory connection harnesses.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use filewire::{
    codec::{CodecError, Frame, FrameCodec},
    connection::{Connection, ConnectionSetup},
    packet::Packet,
    registry::{PacketRegistry, Role},
};
use futures::{SinkExt, StreamExt};
use rstest::fixture;
use tempfile::TempDir;
use tokio::{
    io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf, duplex},
    task::JoinHandle,
    time::timeout,
};
use tokio_util::codec::{FramedRead, FramedWrite};

const DUPLEX_CAPACITY: usize = 256 * 1024;

/// Temporary spool directory removed when dropped.
#[allow(
    unused_braces,
    reason = "rustc false positive for single line rstest fixtures"
)]
#[fixture]
pub fn spool_dir() -> TempDir { tempfile::tempdir().expect("create spool dir") }

/// A live [`Connection`] whose peer is driven frame by frame by the test.
pub struct RawPeer {
    /// Connection under test.
    pub conn: Connection,
    driver: JoinHandle<Result<(), CodecError>>,
    registry: Arc<PacketRegistry>,
    reader: FramedRead<ReadHalf<DuplexStream>, FrameCodec>,
    writer: FramedWrite<WriteHalf<DuplexStream>, FrameCodec>,
}

impl RawPeer {
    /// Establish a connection with `setup` and spawn its driver.
    #[must_use]
    pub fn spawn(setup: ConnectionSetup) -> Self {
        let registry = Arc::clone(&setup.registry);
        let (local, remote) = duplex(DUPLEX_CAPACITY);
        let (conn, driver) = Connection::establish(local, None, setup);
        let driver = tokio::spawn(driver.run());
        let (read_half, write_half) = tokio::io::split(remote);
        Self {
            conn,
            driver,
            registry,
            reader: FramedRead::new(read_half, FrameCodec::default()),
            writer: FramedWrite::new(write_half, FrameCodec::default()),
        }
    }

    /// Role the raw end plays.
    fn remote_role(&self) -> Role { self.conn.role().opposite() }

    /// Write a raw frame to the connection.
    pub async fn send_frame(&mut self, frame: Frame) {
        self.writer.send(frame).await.expect("write frame");
    }

    /// Write raw bytes, bypassing the codec.
    pub async fn send_bytes(&mut self, bytes: &[u8]) {
        let inner = self.writer.get_mut();
        inner.write_all(bytes).await.expect("write bytes");
        inner.flush().await.expect("flush bytes");
    }

    /// Encode `packet` as the remote role would and send it.
    pub async fn send_packet(&mut self, packet: impl Into<Packet>) {
        let packet = packet.into();
        let descriptor = self
            .registry
            .for_send(packet.kind(), self.remote_role())
            .expect("packet kind sendable by remote role");
        let payload: Bytes = packet.encode().expect("encode packet");
        self.send_frame(Frame::new(descriptor.discriminator(), payload))
            .await;
    }

    /// Next frame written by the connection, or `None` on EOF or timeout.
    pub async fn next_frame(&mut self, wait: Duration) -> Option<Frame> {
        match timeout(wait, self.reader.next()).await {
            Ok(Some(Ok(frame))) => Some(frame),
            _ => None,
        }
    }

    /// Next packet written by the connection, decoded via the registry.
    pub async fn next_packet(&mut self, wait: Duration) -> Option<Packet> {
        let frame = self.next_frame(wait).await?;
        let descriptor = self
            .registry
            .by_discriminator(frame.discriminator())
            .expect("known discriminator");
        Some(Packet::decode(descriptor.kind(), frame.into_payload()).expect("decode packet"))
    }

    /// Collect packets until `wait` elapses without a new one.
    pub async fn drain_packets(&mut self, wait: Duration) -> Vec<Packet> {
        let mut packets = Vec::new();
        while let Some(packet) = self.next_packet(wait).await {
            packets.push(packet);
        }
        packets
    }

    /// Returns true once the connection has closed its write half.
    pub async fn closed_by_peer(&mut self, wait: Duration) -> bool {
        matches!(timeout(wait, self.reader.next()).await, Ok(None))
    }

    /// Close the raw write half, signalling EOF to the connection.
    pub async fn shutdown(&mut self) {
        let _ = self.writer.get_mut().shutdown().await;
    }

    /// Wait for the connection driver to finish.
    pub async fn join(self) -> Result<(), CodecError> {
        self.driver.await.expect("driver task")
    }
}

/// Two connections talking to each other over an in-memory stream.
///
/// Returns `(client, server)` with both drivers already spawned.
#[must_use]
pub fn connected_pair(
    client: ConnectionSetup,
    server: ConnectionSetup,
) -> (Connection, Connection) {
    let (client_io, server_io) = duplex(DUPLEX_CAPACITY);
    let (client_conn, client_driver) = Connection::establish(client_io, None, client);
    let (server_conn, server_driver) = Connection::establish(server_io, None, server);
    tokio::spawn(client_driver.run());
    tokio::spawn(server_driver.run());
    (client_conn, server_conn)
}
