//! Shared fixtures for the integration tests.
//!
//! Provides a server state rooted in a temporary directory, login packet
//! builders and helpers that pick info log messages out of captured packets.

// Items in this shared module may not be used by all test binaries that import it.
#![allow(
    dead_code,
    reason = "shared test utilities are not used by all test binaries"
)]

use std::{path::Path, sync::Arc, time::Duration};

use filewire::{
    ClientEvent,
    Connection,
    FileClient,
    Packet,
    config::{ClientConfig, ServerConfig, TransferConfig},
    credentials::hash_password,
    packet::{Login, NEW_ACCOUNT, PROTOCOL_VERSION},
    server::ServerState,
    store::{MemoryStore, Store},
};
use filewire_testing::RawPeer;
use tempfile::TempDir;
use tokio::{io::duplex, time::timeout};

/// How long tests wait for a packet that should arrive.
pub const REPLY_WAIT: Duration = Duration::from_secs(2);
/// How long tests wait before concluding nothing more will arrive.
pub const QUIET_WAIT: Duration = Duration::from_millis(150);

/// Transfer tuning for tests: small fragments, no throttling delay to speak of.
#[must_use]
pub fn fast_transfers(spool: &Path) -> TransferConfig {
    TransferConfig {
        max_fragment_size: 1024,
        throttle_ms: 1,
        spool_dir: Some(spool.to_path_buf()),
        ..TransferConfig::default()
    }
}

/// A server rooted in a temporary directory.
pub struct TestServer {
    pub dir: TempDir,
    pub config: ServerConfig,
    pub state: Arc<ServerState>,
}

impl TestServer {
    /// Server whose store allows `pending` usernames to create accounts.
    #[must_use]
    pub fn new(pending: &[&str]) -> Self { Self::configured(pending, |_| {}) }

    /// Like [`TestServer::new`], adjusting the configuration first.
    #[must_use]
    pub fn configured(pending: &[&str], adjust: impl FnOnce(&mut ServerConfig)) -> Self {
        Self::build(pending, adjust, Arc::new(MemoryStore::default()))
    }

    /// Like [`TestServer::new`], keeping records in `store`.
    #[must_use]
    pub fn with_store(pending: &[&str], store: Arc<dyn Store>) -> Self { Self::build(pending, |_| {}, store) }

    fn build(pending: &[&str], adjust: impl FnOnce(&mut ServerConfig), store: Arc<dyn Store>) -> Self {
        let dir = tempfile::tempdir().expect("server dir");
        let mut config = ServerConfig {
            bind_addr: "127.0.0.1:0".parse().expect("addr"),
            storage_dir: dir.path().join("files"),
            pending_accounts: pending.iter().map(|s| (*s).to_owned()).collect(),
            records_file: dir.path().join("records.toml"),
            transfer: fast_transfers(&dir.path().join("spool")),
        };
        adjust(&mut config);
        let state = ServerState::new(&config, store).expect("server state");
        Self { dir, config, state }
    }

    /// A [`FileClient`] logged in over an in-memory stream to this server.
    ///
    /// Returns once the client has sent its login request.
    pub async fn attach(&self, config: ClientConfig) -> FileClient {
        let (client_io, server_io) = duplex(256 * 1024);
        let (_conn, driver) = Connection::establish(server_io, None, self.state.connection_setup());
        tokio::spawn(driver.run());
        FileClient::with_stream(client_io, None, config)
            .await
            .expect("client attached")
    }

    /// A raw client peer attached to a fresh server connection.
    #[must_use]
    pub fn raw_client(&self) -> RawPeer { RawPeer::spawn(self.state.connection_setup()) }

    /// Write `content` straight into the storage directory.
    pub fn store_file(&self, name: &str, content: &[u8]) {
        std::fs::write(self.config.storage_dir.join(name), content).expect("write stored file");
    }

    /// Client configuration pointing its directories inside this server's temp dir.
    #[must_use]
    pub fn client_config(&self, username: &str, password: &str) -> ClientConfig {
        let root = self.dir.path().join("clients").join(username);
        ClientConfig {
            server_addr: self.config.bind_addr,
            username: username.to_owned(),
            password: password.to_owned(),
            downloads_dir: root.join("downloads"),
            data_dir: root.join("metadata"),
            transfer: fast_transfers(&root.join("spool")),
        }
    }
}

/// Login packet for `username`.
#[must_use]
pub fn login(account_id: i32, username: &str, password: &str) -> Login {
    Login {
        account_id,
        username: username.to_owned(),
        password_hash: hash_password(password),
        version: PROTOCOL_VERSION,
    }
}

/// Login packet requesting a new account.
#[must_use]
pub fn new_account(username: &str, password: &str) -> Login { login(NEW_ACCOUNT, username, password) }

/// Messages carried by the info log packets in `packets`.
#[must_use]
pub fn info_messages(packets: &[Packet]) -> Vec<String> {
    packets
        .iter()
        .filter_map(|p| match p {
            Packet::InfoLog(log) => Some(log.message.clone()),
            _ => None,
        })
        .collect()
}

/// Create an account for `username` over a raw connection and return its id.
pub async fn register(server: &TestServer, username: &str, password: &str) -> i32 {
    let mut peer = server.raw_client();
    peer.send_packet(new_account(username, password)).await;
    let packets = peer.drain_packets(QUIET_WAIT).await;
    let id = packets
        .iter()
        .find_map(|p| match p {
            Packet::AccountIdAssignment(a) => Some(a.account_id),
            _ => None,
        })
        .expect("account id assigned");
    peer.shutdown().await;
    id
}

/// Collect client events until `done` returns true for one of them.
///
/// Panics if the connection ends or nothing satisfying `done` arrives in time.
pub async fn events_until(
    client: &mut FileClient,
    mut done: impl FnMut(&ClientEvent) -> bool,
) -> Vec<ClientEvent> {
    let mut events = Vec::new();
    loop {
        let event = timeout(Duration::from_secs(5), client.next_event())
            .await
            .unwrap_or_else(|_| panic!("timed out; events so far: {events:?}"))
            .unwrap_or_else(|| panic!("connection ended; events so far: {events:?}"));
        let finished = done(&event);
        events.push(event);
        if finished {
            return events;
        }
    }
}

/// Collect client events up to and including the info message `message`.
pub async fn events_until_info(client: &mut FileClient, message: &str) -> Vec<ClientEvent> {
    events_until(client, |e| matches!(e, ClientEvent::Info(m) if m == message)).await
}

/// Info messages among `events`.
#[must_use]
pub fn infos(events: &[ClientEvent]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|e| match e {
            ClientEvent::Info(m) => Some(m.as_str()),
            _ => None,
        })
        .collect()
}
