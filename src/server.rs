//! TCP file server.
//!
//! [`FileServer`] accepts connections and serves logins, uploads, downloads
//! and listings against a [`Store`]. Connection handling and the accept loop
//! live in submodules; [`ServerState`] carries what the packet handlers share.

mod connection;
mod error;
mod handlers;
mod runtime;

use std::{
    fs,
    io,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

pub use error::ServerError;
pub use runtime::BackoffConfig;
use tokio::net::TcpListener;

use crate::{
    auth::LoginGate,
    config::{ServerConfig, TransferConfig},
    connection::ConnectionSetup,
    registry::{PacketRegistry, Role},
    session::SessionRegistry,
    store::Store,
};

/// State shared by the server's packet handlers.
pub struct ServerState {
    storage_dir: PathBuf,
    transfer: TransferConfig,
    store: Arc<dyn Store>,
    sessions: SessionRegistry,
}

impl ServerState {
    /// Prepare the storage and spool directories and register the configured
    /// pending accounts with `store`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Directory`] if a directory cannot be created.
    pub fn new(config: &ServerConfig, store: Arc<dyn Store>) -> Result<Arc<Self>, ServerError> {
        create_dir(&config.storage_dir)?;
        create_dir(&config.transfer.spool_dir())?;
        for username in &config.pending_accounts {
            store.add_pending(username);
        }
        Ok(Arc::new(Self {
            storage_dir: config.storage_dir.clone(),
            transfer: config.transfer.clone(),
            store,
            sessions: SessionRegistry::default(),
        }))
    }

    /// Directory holding uploaded files.
    #[must_use]
    pub fn storage_dir(&self) -> &Path { &self.storage_dir }

    /// Account and permission records.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> { &self.store }

    /// Verified connections.
    #[must_use]
    pub fn sessions(&self) -> &SessionRegistry { &self.sessions }

    /// Transfer tuning.
    #[must_use]
    pub fn transfer(&self) -> &TransferConfig { &self.transfer }

    /// Connection setup wiring the server handlers behind a [`LoginGate`].
    #[must_use]
    pub fn connection_setup(self: &Arc<Self>) -> ConnectionSetup {
        let registry = PacketRegistry::standard(handlers::protocol_handlers(self));
        let mut setup = ConnectionSetup::new(Role::Server, Arc::new(registry), Arc::new(LoginGate));
        setup.spool_dir = self.transfer.spool_dir();
        setup.limits = self.transfer.router_limits();
        setup.max_frame_length = self.transfer.max_frame_length;
        setup
    }
}

fn create_dir(path: &Path) -> Result<(), ServerError> {
    fs::create_dir_all(path).map_err(|source| ServerError::Directory {
        path: path.to_path_buf(),
        source,
    })
}

/// A bound file server.
pub struct FileServer {
    listener: TcpListener,
    setup: ConnectionSetup,
    state: Arc<ServerState>,
    backoff: BackoffConfig,
}

impl FileServer {
    /// Bind `config.bind_addr` and prepare the server's directories.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound or
    /// [`ServerError::Directory`] if a directory cannot be created.
    pub async fn new(config: ServerConfig, store: Arc<dyn Store>) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.bind_addr,
                source,
            })?;
        Self::from_listener(listener, &config, store)
    }

    /// Serve on an already bound listener.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Directory`] if a directory cannot be created.
    pub fn from_listener(
        listener: TcpListener,
        config: &ServerConfig,
        store: Arc<dyn Store>,
    ) -> Result<Self, ServerError> {
        let state = ServerState::new(config, store)?;
        Ok(Self {
            listener,
            setup: state.connection_setup(),
            state,
            backoff: BackoffConfig::default(),
        })
    }

    /// Override the accept-loop back-off.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff.normalized();
        self
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns the listener's I/O error.
    pub fn local_addr(&self) -> io::Result<SocketAddr> { self.listener.local_addr() }

    /// State shared by this server's handlers.
    #[must_use]
    pub fn state(&self) -> &Arc<ServerState> { &self.state }
}
