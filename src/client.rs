//! File client.
//!
//! [`FileClient`] logs in on connect and then issues uploads, downloads and
//! listing requests. Everything the server sends back arrives asynchronously
//! as [`ClientEvent`]s on the client's event channel.

mod error;
mod handlers;

use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicI32, Ordering},
    },
};

pub use error::ClientError;
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{debug, info};

use crate::{
    auth::AllowAll,
    codec::CodecError,
    config::{self, ClientConfig},
    connection::{Connection, ConnectionSetup},
    credentials::hash_password,
    packet::{
        DownloadRequest,
        FilesListRequest,
        Login,
        MetaValue,
        NEW_ACCOUNT,
        PROTOCOL_VERSION,
        StreamMetadata,
        TransferId,
        ViewSharedFilesRequest,
        keys,
    },
    registry::{PacketRegistry, Role},
    transfer::{TransferError, TransferHandle, TransferSummary, send_file, spawn_file_transfer},
};

/// File holding the persisted [`ClientState`] inside the data directory.
pub const STATE_FILE: &str = "client-state.toml";

/// Something the server told the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    /// A message for the operator.
    Info(String),
    /// The server assigned an account id; it has been persisted.
    AccountAssigned(i32),
    /// A download finished and was written to `path`.
    Downloaded {
        /// Transfer name.
        name: String,
        /// Where the file was written.
        path: PathBuf,
        /// File length in bytes.
        bytes: u64,
    },
    /// The server aborted a download.
    Aborted {
        /// Transfer name.
        name: String,
        /// Transfer identifier.
        transfer_id: TransferId,
    },
}

/// State persisted between client runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientState {
    /// Assigned account id, or [`NEW_ACCOUNT`] before the first login.
    pub account_id: i32,
}

impl Default for ClientState {
    fn default() -> Self {
        Self {
            account_id: NEW_ACCOUNT,
        }
    }
}

/// How an upload is sent.
#[derive(Clone, Debug, Default)]
pub struct UploadOptions {
    /// Force the background path (`Some(true)`) or the inline path
    /// (`Some(false)`); `None` picks by file size.
    pub background: Option<bool>,
    /// Fragment size override.
    pub fragment_size: Option<usize>,
    /// Name to store the file under on the server.
    pub output_name: Option<String>,
    /// Accounts the upload is shared with; empty means public.
    pub shared_with: Vec<String>,
}

impl UploadOptions {
    /// Metadata announcing these options to the server.
    #[must_use]
    pub fn metadata(&self) -> StreamMetadata {
        let mut metadata = StreamMetadata::new();
        if let Some(name) = &self.output_name {
            metadata.insert(keys::FILE_OUT, MetaValue::Text(name.clone()));
        }
        if !self.shared_with.is_empty() {
            metadata.insert(keys::SHARED, MetaValue::Flag(true));
            metadata.insert(keys::DOWNLOADERS, MetaValue::TextList(self.shared_with.clone()));
        }
        metadata
    }
}

/// A started upload.
#[derive(Debug)]
pub enum Upload {
    /// Sent inline; every packet has been written.
    Sent(TransferSummary),
    /// Streaming from a background task.
    Background(TransferHandle),
}

/// State shared with the client's packet handlers.
pub(crate) struct ClientShared {
    account_id: AtomicI32,
    state_path: PathBuf,
    downloads_dir: PathBuf,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl ClientShared {
    pub(crate) fn account_id(&self) -> i32 { self.account_id.load(Ordering::Acquire) }

    /// Record and persist a server-assigned account id.
    pub(crate) fn assign_account(&self, id: i32) -> Result<(), ClientError> {
        self.account_id.store(id, Ordering::Release);
        config::save(&self.state_path, &ClientState { account_id: id })?;
        Ok(())
    }

    pub(crate) fn downloads_dir(&self) -> &Path { &self.downloads_dir }

    /// Forward an event; a dropped receiver is not an error.
    pub(crate) fn emit(&self, event: ClientEvent) { let _ = self.events.send(event); }
}

/// A logged-in connection to a file server.
pub struct FileClient {
    conn: Connection,
    config: ClientConfig,
    shared: Arc<ClientShared>,
    events: mpsc::UnboundedReceiver<ClientEvent>,
    driver: JoinHandle<Result<(), CodecError>>,
}

impl FileClient {
    /// Connect to `config.server_addr` and send the login request.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connect`] if the server is unreachable, or any
    /// error from [`with_stream`](Self::with_stream).
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let addr = config.server_addr;
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| ClientError::Connect { addr, source })?;
        stream.set_nodelay(true)?;
        Self::with_stream(stream, Some(addr), config).await
    }

    /// Log in over an established stream.
    ///
    /// Creates the downloads and data directories, loads the persisted
    /// account id, spawns the read loop and sends the login request.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be created, the state file
    /// cannot be parsed, or the login request cannot be sent.
    pub async fn with_stream<S>(
        stream: S,
        peer_addr: Option<SocketAddr>,
        config: ClientConfig,
    ) -> Result<Self, ClientError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        fs::create_dir_all(&config.downloads_dir)?;
        fs::create_dir_all(&config.data_dir)?;
        let spool_dir = config.transfer.spool_dir();
        fs::create_dir_all(&spool_dir)?;
        let state_path = config.data_dir.join(STATE_FILE);
        let state: ClientState = config::load(&state_path)?;

        let (tx, events) = mpsc::unbounded_channel();
        let shared = Arc::new(ClientShared {
            account_id: AtomicI32::new(state.account_id),
            state_path,
            downloads_dir: config.downloads_dir.clone(),
            events: tx,
        });
        let registry = PacketRegistry::standard(handlers::protocol_handlers(&shared));
        let mut setup = ConnectionSetup::new(Role::Client, Arc::new(registry), Arc::new(AllowAll));
        setup.spool_dir = spool_dir;
        setup.limits = config.transfer.router_limits();
        setup.max_frame_length = config.transfer.max_frame_length;

        let (conn, driver) = Connection::establish(stream, peer_addr, setup);
        let driver = tokio::spawn(driver.run());
        let client = Self {
            conn,
            config,
            shared,
            events,
            driver,
        };
        client.login().await?;
        Ok(client)
    }

    async fn login(&self) -> Result<(), ClientError> {
        let login = Login {
            account_id: self.account_id(),
            username: self.config.username.clone(),
            password_hash: hash_password(&self.config.password),
            version: PROTOCOL_VERSION,
        };
        debug!(account_id = login.account_id, username = %login.username, "sending login");
        self.conn.send(login).await?;
        Ok(())
    }

    /// Account id currently in use.
    #[must_use]
    pub fn account_id(&self) -> i32 { self.shared.account_id() }

    /// Underlying connection.
    #[must_use]
    pub fn connection(&self) -> &Connection { &self.conn }

    /// Upload `path` to the server.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transfer`] if the file cannot be read or sent.
    pub async fn upload(&self, path: &Path, options: &UploadOptions) -> Result<Upload, ClientError> {
        let len = tokio::fs::metadata(path)
            .await
            .map_err(|_| TransferError::NotFound {
                path: path.to_path_buf(),
            })?
            .len();
        let transfer = &self.config.transfer;
        let mut outbound = transfer.outbound(options.metadata());
        if let Some(size) = options.fragment_size {
            outbound.max_fragment_size = size;
        }
        let background = options
            .background
            .unwrap_or_else(|| transfer.prefers_background(len));
        info!(path = %path.display(), bytes = len, background, "uploading");
        if background {
            let handle = spawn_file_transfer(&self.conn, path.to_path_buf(), outbound).await?;
            Ok(Upload::Background(handle))
        } else {
            let summary = send_file(&self.conn, path, &outbound).await?;
            Ok(Upload::Sent(summary))
        }
    }

    /// Ask the server to send `file`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Send`] if the request cannot be written.
    pub async fn download(&self, file: &str) -> Result<(), ClientError> {
        self.conn
            .send(DownloadRequest {
                file: file.to_owned(),
                account_id: self.account_id(),
            })
            .await?;
        Ok(())
    }

    /// Ask the server for its stored files.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Send`] if the request cannot be written.
    pub async fn list_files(&self) -> Result<(), ClientError> {
        self.conn.send(FilesListRequest).await?;
        Ok(())
    }

    /// Ask the server which files were shared with this account.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Send`] if the request cannot be written.
    pub async fn view_shared_files(&self) -> Result<(), ClientError> {
        self.conn
            .send(ViewSharedFilesRequest {
                account_id: self.account_id(),
            })
            .await?;
        Ok(())
    }

    /// Receiver for server events.
    pub fn events(&mut self) -> &mut mpsc::UnboundedReceiver<ClientEvent> { &mut self.events }

    /// Wait for the next server event; `None` once the connection is gone.
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        tokio::select! {
            biased;
            event = self.events.recv() => event,
            () = self.conn.closed() => self.events.try_recv().ok(),
        }
    }

    /// Close the connection and wait for the read loop to finish.
    ///
    /// # Errors
    ///
    /// Returns the stream error that ended the connection, if any.
    pub async fn close(self) -> Result<(), ClientError> {
        self.conn.close();
        self.driver
            .await
            .map_err(|e| ClientError::Task(e.to_string()))??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_upload_has_no_metadata() {
        assert!(UploadOptions::default().metadata().is_empty());
    }

    #[test]
    fn shared_upload_lists_downloaders() {
        let options = UploadOptions {
            output_name: Some("renamed.txt".into()),
            shared_with: vec!["eve".into(), "bob".into()],
            ..UploadOptions::default()
        };
        let metadata = options.metadata();
        assert_eq!(metadata.text(keys::FILE_OUT), Some("renamed.txt"));
        assert!(metadata.flag(keys::SHARED));
        assert_eq!(metadata.text_list(keys::DOWNLOADERS), ["eve", "bob"]);
    }

    #[test]
    fn missing_state_means_new_account() {
        let dir = tempfile::tempdir().expect("temp dir");
        let state: ClientState = config::load(&dir.path().join(STATE_FILE)).expect("load");
        assert_eq!(state.account_id, NEW_ACCOUNT);
    }
}
