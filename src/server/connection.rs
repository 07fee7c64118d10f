//! Per-connection tasks for [`FileServer`](super::FileServer).

use std::{any::Any, fmt, net::SocketAddr, sync::Arc};

use futures::FutureExt;
use log::{debug, error, info, warn};
use tokio::{net::TcpStream, select};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::ServerState;
use crate::{
    connection::{Connection, ConnectionSetup},
    metrics,
};

/// Formats a panic payload as its message when it carries one.
struct PanicMessage(Box<dyn Any + Send>);

impl fmt::Display for PanicMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(s) = self.0.downcast_ref::<String>() {
            f.write_str(s)
        } else if let Some(s) = self.0.downcast_ref::<&'static str>() {
            f.write_str(s)
        } else {
            write!(f, "{:?}", self.0)
        }
    }
}

/// Keeps the active connections gauge balanced, including on panic.
struct ActiveConnection;

impl ActiveConnection {
    fn open() -> Self {
        metrics::inc_connections();
        Self
    }
}

impl Drop for ActiveConnection {
    fn drop(&mut self) { metrics::dec_connections(); }
}

/// Spawn a task serving `stream`, logging and discarding any panic.
pub(super) fn spawn_connection_task(
    stream: TcpStream,
    peer_addr: Option<SocketAddr>,
    setup: ConnectionSetup,
    state: Arc<ServerState>,
    shutdown: &CancellationToken,
    tracker: &TaskTracker,
) {
    let shutdown = shutdown.clone();
    tracker.spawn(async move {
        let fut =
            std::panic::AssertUnwindSafe(process_stream(stream, peer_addr, setup, state, shutdown))
                .catch_unwind();

        if let Err(panic) = fut.await {
            metrics::inc_errors();
            let panic_msg = PanicMessage(panic);
            // Emit via both `log` and `tracing` for tests that capture either.
            error!("connection task panicked: panic={panic_msg}, peer_addr={peer_addr:?}");
            tracing::error!(panic = %panic_msg, ?peer_addr, "connection task panicked");
        }
    });
}

async fn process_stream(
    stream: TcpStream,
    peer_addr: Option<SocketAddr>,
    setup: ConnectionSetup,
    state: Arc<ServerState>,
    shutdown: CancellationToken,
) {
    let _active = ActiveConnection::open();
    if let Err(e) = stream.set_nodelay(true) {
        warn!("failed to set TCP_NODELAY: error={e}, peer_addr={peer_addr:?}");
    }
    let (conn, driver) = Connection::establish(stream, peer_addr, setup);
    let id = conn.id();
    info!("connection opened: id={id}, peer_addr={peer_addr:?}");

    let (result, ()) = tokio::join!(driver.run(), close_on_shutdown(&conn, &shutdown));
    match result {
        Ok(()) => debug!("connection closed: id={id}, peer_addr={peer_addr:?}"),
        Err(e) => warn!("connection ended with error: id={id}, peer_addr={peer_addr:?}, error={e}"),
    }
    state.sessions().remove(&id);
}

async fn close_on_shutdown(conn: &Connection, shutdown: &CancellationToken) {
    select! {
        () = shutdown.cancelled() => conn.close(),
        () = conn.closed() => {}
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::{
        io::AsyncWriteExt,
        net::{TcpListener, TcpStream},
    };
    use tracing_test::traced_test;

    use super::*;
    use crate::{
        auth::AllowAll,
        config::ServerConfig,
        handler::{HandlerError, PacketHandler},
        packet::Packet,
        registry::{PacketRegistry, ProtocolHandlers, Role},
        store::MemoryStore,
    };

    struct Explode;

    #[async_trait]
    impl PacketHandler for Explode {
        async fn handle(&self, _packet: Packet, _conn: &Connection) -> Result<Option<Packet>, HandlerError> {
            panic!("boom")
        }
    }

    fn panicking_setup() -> ConnectionSetup {
        let handlers = ProtocolHandlers {
            info_log: Some(Arc::new(Explode)),
            ..ProtocolHandlers::default()
        };
        ConnectionSetup::new(
            Role::Server,
            Arc::new(PacketRegistry::standard(handlers)),
            Arc::new(AllowAll),
        )
    }

    #[traced_test]
    #[tokio::test]
    async fn handler_panic_is_logged_and_contained() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = ServerConfig {
            storage_dir: dir.path().to_path_buf(),
            ..ServerConfig::default()
        };
        let state = ServerState::new(&config, Arc::new(MemoryStore::default())).expect("state");
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let tracker = TaskTracker::new();
        let shutdown = CancellationToken::new();

        let mut client = TcpStream::connect(addr).await.expect("connect");
        let (stream, peer) = listener.accept().await.expect("accept");
        spawn_connection_task(stream, Some(peer), panicking_setup(), state, &shutdown, &tracker);

        // Server-bound InfoLog is discriminator 7; payload "x\0".
        client.write_all(&[7, 0, 0, 0, 2, b'x', 0]).await.expect("write");
        tracker.close();
        tracker.wait().await;

        assert!(logs_contain("connection task panicked"));
        assert!(logs_contain("boom"));
    }

    #[tokio::test]
    async fn shutdown_closes_idle_connections() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = ServerConfig {
            storage_dir: dir.path().to_path_buf(),
            ..ServerConfig::default()
        };
        let state = ServerState::new(&config, Arc::new(MemoryStore::default())).expect("state");
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let tracker = TaskTracker::new();
        let shutdown = CancellationToken::new();

        let _client = TcpStream::connect(addr).await.expect("connect");
        let (stream, peer) = listener.accept().await.expect("accept");
        let setup = state.connection_setup();
        spawn_connection_task(stream, Some(peer), setup, state, &shutdown, &tracker);

        shutdown.cancel();
        tracker.close();
        tokio::time::timeout(std::time::Duration::from_secs(2), tracker.wait())
            .await
            .expect("connection task exits on shutdown");
    }

    #[test]
    fn panic_messages_prefer_text() {
        assert_eq!(PanicMessage(Box::new("boom")).to_string(), "boom");
        assert_eq!(PanicMessage(Box::new(String::from("bang"))).to_string(), "bang");
        assert!(PanicMessage(Box::new(5_u32)).to_string().contains("Any"));
    }
}
