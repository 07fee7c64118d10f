//! Packet handlers served by [`FileServer`](super::FileServer).

use std::{io, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::ServerState;
use crate::{
    connection::{Connection, VerifiedAccount},
    credentials::normalize_username,
    handler::{HandlerError, PacketHandler, TransferHandler},
    packet::{
        AccountIdAssignment,
        DownloadRequest,
        InfoLog,
        Login,
        NEW_ACCOUNT,
        PROTOCOL_VERSION,
        Packet,
        PacketKind,
        StreamMetadata,
        TransferId,
        keys,
    },
    registry::ProtocolHandlers,
    store::{Account, FilePermission, SharedFile},
    transfer::{CompletedTransfer, safe_file_name, send_file, spawn_file_transfer},
};

/// Longest listing message sent in one info log packet.
const LISTING_CHUNK_CHARS: usize = 65_000;

pub(super) const ACCOUNT_CREATED: &str = "Your account has been created.";
pub(super) const LOGIN_OK: &str = "Successfully connected to server.";
pub(super) const LOGIN_FAILED: &str = "Invalid login credentials.";
pub(super) const SHARED_NOTICE: &str =
    "Files have been shared with you. Request the shared files list to view them.";
pub(super) const NO_ACCESS: &str = "You do not have access to that file.";
pub(super) const NO_SUCH_FILE: &str = "That file does not exist.";
pub(super) const DOWNLOADING: &str = "Downloading file...";
pub(super) const NO_SHARED_FILES: &str = "No files have been shared with you.";
pub(super) const NO_STORED_FILES: &str = "No files are stored on the server.";
pub(super) const INVALID_NAME: &str = "That is not a valid file name.";
pub(super) const OVERWRITE_DENIED: &str =
    "A file with that name already exists, and you do not have permission to overwrite it.";

/// Handlers for every packet a server receives.
pub(super) fn protocol_handlers(state: &Arc<ServerState>) -> ProtocolHandlers {
    ProtocolHandlers {
        transfers: Some(Arc::new(UploadHandler(Arc::clone(state)))),
        info_log: Some(Arc::new(InfoLogHandler)),
        login: Some(Arc::new(LoginHandler(Arc::clone(state)))),
        account_assignment: None,
        download: Some(Arc::new(DownloadHandler(Arc::clone(state)))),
        files_list: Some(Arc::new(FilesListHandler(Arc::clone(state)))),
        view_shared_files: Some(Arc::new(SharedFilesHandler(Arc::clone(state)))),
    }
}

fn info(message: impl Into<String>) -> Option<Packet> { Some(InfoLog::new(message).into()) }

/// Account the connection logged in as.
///
/// The login gate only lets non-login packets through on verified
/// connections, so a missing account means a misconfigured authorizer.
fn verified(conn: &Connection, packet: &Packet) -> Result<VerifiedAccount, HandlerError> {
    conn.account()
        .cloned()
        .ok_or(HandlerError::Unexpected(packet.kind()))
}

struct LoginHandler(Arc<ServerState>);

impl LoginHandler {
    fn admit(&self, conn: &Connection, account: &Account) {
        let admitted = conn.verify(VerifiedAccount {
            id: account.id,
            username: account.username.clone(),
        });
        if admitted {
            self.0.sessions().insert(conn);
            info!(peer_addr = ?conn.peer_addr(), account_id = account.id, username = %account.username, "login accepted");
        }
    }

    /// Resolve an existing account by id, falling back to username when the
    /// id is unknown or belongs to someone else.
    async fn resolve(
        &self,
        login: &Login,
        conn: &Connection,
    ) -> Result<Option<Account>, HandlerError> {
        let store = self.0.store();
        let username = normalize_username(&login.username);
        if let Some(account) = store
            .account_by_id(login.account_id)
            .filter(|a| a.username == username)
        {
            return Ok(Some(account));
        }
        let Some(account) = store.account_by_username(&username) else {
            return Ok(None);
        };
        if account.id != login.account_id {
            conn.send(AccountIdAssignment {
                account_id: account.id,
            })
            .await?;
        }
        Ok(Some(account))
    }
}

#[async_trait]
impl PacketHandler for LoginHandler {
    async fn handle(&self, packet: Packet, conn: &Connection) -> Result<Option<Packet>, HandlerError> {
        let Packet::Login(login) = packet else {
            return Err(HandlerError::Unexpected(packet.kind()));
        };
        if login.version != PROTOCOL_VERSION {
            conn.send(InfoLog::new(format!(
                "This client speaks protocol version {}; the server speaks version {PROTOCOL_VERSION}. \
                 Please upgrade.",
                login.version
            )))
            .await?;
        }

        let store = self.0.store();
        if login.account_id == NEW_ACCOUNT {
            let Some(account) = store.create_account(&login.username, &login.password_hash) else {
                warn!(peer_addr = ?conn.peer_addr(), username = %login.username, "login for unregistered account");
                conn.close();
                return Ok(None);
            };
            self.admit(conn, &account);
            conn.send(AccountIdAssignment {
                account_id: account.id,
            })
            .await?;
            return Ok(info(ACCOUNT_CREATED));
        }

        let Some(account) = self.resolve(&login, conn).await? else {
            warn!(peer_addr = ?conn.peer_addr(), username = %login.username, "login for unknown account");
            conn.close();
            return Ok(None);
        };
        if !store.shared_files(&account.username).is_empty() {
            conn.send(InfoLog::new(SHARED_NOTICE)).await?;
        }
        if account.credentials_match(&login.username, &login.password_hash) {
            self.admit(conn, &account);
            Ok(info(LOGIN_OK))
        } else {
            warn!(peer_addr = ?conn.peer_addr(), username = %account.username, "login rejected");
            Ok(info(LOGIN_FAILED))
        }
    }
}

struct DownloadHandler(Arc<ServerState>);

impl DownloadHandler {
    /// Send `request.file` to the requester.
    ///
    /// Files above the background threshold stream from a spawned task. Smaller
    /// files are sent inline, so the connection's read loop does not read
    /// further frames until the close packet has been written.
    async fn stream(
        &self,
        request: &DownloadRequest,
        account: &VerifiedAccount,
        conn: &Connection,
    ) -> Result<Option<Packet>, HandlerError> {
        let Some(name) = safe_file_name(&request.file) else {
            return Ok(info(INVALID_NAME));
        };
        let store = self.0.store();
        if !store.can_download(&name, &account.username) {
            return Ok(info(NO_ACCESS));
        }
        let path = self.0.storage_dir().join(&name);
        let len = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => return Ok(info(NO_SUCH_FILE)),
        };
        store.remove_shared_file(&account.username, &name);

        let transfer = self.0.transfer();
        let options = transfer.outbound(StreamMetadata::new());
        if transfer.prefers_background(len) {
            let handle = spawn_file_transfer(conn, path, options).await?;
            debug!(name = %name, transfer_id = %handle.transfer_id(), "download streaming in background");
        } else {
            send_file(conn, &path, &options).await?;
        }
        Ok(info(DOWNLOADING))
    }
}

#[async_trait]
impl PacketHandler for DownloadHandler {
    async fn handle(&self, packet: Packet, conn: &Connection) -> Result<Option<Packet>, HandlerError> {
        let account = verified(conn, &packet)?;
        let Packet::DownloadRequest(request) = packet else {
            return Err(HandlerError::Unexpected(packet.kind()));
        };
        self.stream(&request, &account, conn).await
    }
}

struct FilesListHandler(Arc<ServerState>);

/// Names of the regular files in `dir`, sorted.
async fn stored_files(dir: PathBuf) -> io::Result<Vec<String>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Split a listing into newline-led messages shorter than `limit` chars.
///
/// A single name longer than `limit` gets a message of its own.
pub(super) fn chunk_listing(names: &[String], limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0;
    for name in names {
        let added = name.chars().count() + 1;
        if !current.is_empty() && current_chars + added >= limit {
            chunks.push(std::mem::take(&mut current));
            current_chars = 0;
        }
        current.push('\n');
        current.push_str(name);
        current_chars += added;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[async_trait]
impl PacketHandler for FilesListHandler {
    async fn handle(&self, packet: Packet, conn: &Connection) -> Result<Option<Packet>, HandlerError> {
        if !matches!(packet, Packet::FilesListRequest(_)) {
            return Err(HandlerError::Unexpected(packet.kind()));
        }
        let names = stored_files(self.0.storage_dir().to_path_buf()).await?;
        let mut chunks = chunk_listing(&names, LISTING_CHUNK_CHARS);
        let Some(last) = chunks.pop() else {
            return Ok(info(NO_STORED_FILES));
        };
        for chunk in chunks {
            conn.send(InfoLog::new(chunk)).await?;
        }
        Ok(info(last))
    }
}

struct SharedFilesHandler(Arc<ServerState>);

#[async_trait]
impl PacketHandler for SharedFilesHandler {
    async fn handle(&self, packet: Packet, conn: &Connection) -> Result<Option<Packet>, HandlerError> {
        let account = verified(conn, &packet)?;
        if !matches!(packet, Packet::ViewSharedFilesRequest(_)) {
            return Err(HandlerError::Unexpected(packet.kind()));
        }
        let store = self.0.store();
        let shared = store.shared_files(&account.username);
        if shared.is_empty() {
            return Ok(info(NO_SHARED_FILES));
        }
        let listing: String = shared
            .iter()
            .map(|s| format!("\n\"{}\" from {}", s.file, s.sender))
            .collect();
        store.clear_shared_files(&account.username);
        Ok(info(listing))
    }
}

struct InfoLogHandler;

#[async_trait]
impl PacketHandler for InfoLogHandler {
    async fn handle(&self, packet: Packet, conn: &Connection) -> Result<Option<Packet>, HandlerError> {
        let Packet::InfoLog(log) = packet else {
            return Err(HandlerError::Unexpected(packet.kind()));
        };
        info!(peer_addr = ?conn.peer_addr(), message = %log.message, "peer message");
        Ok(None)
    }
}

/// Stores completed uploads.
struct UploadHandler(Arc<ServerState>);

impl UploadHandler {
    /// Accounts from the upload's share list; unknown names are reported back.
    async fn downloaders(
        &self,
        metadata: &StreamMetadata,
        conn: &Connection,
    ) -> Result<Vec<String>, HandlerError> {
        let mut downloaders = Vec::new();
        if !metadata.flag(keys::SHARED) {
            return Ok(downloaders);
        }
        for username in metadata.text_list(keys::DOWNLOADERS) {
            match self.0.store().account_by_username(username) {
                Some(account) => downloaders.push(account.username),
                None => {
                    conn.send(InfoLog::new(format!("{username} is not a valid account.")))
                        .await?;
                }
            }
        }
        Ok(downloaders)
    }
}

#[async_trait]
impl TransferHandler for UploadHandler {
    async fn on_complete(
        &self,
        transfer: CompletedTransfer,
        conn: &Connection,
    ) -> Result<Option<Packet>, HandlerError> {
        let Some(account) = conn.account().cloned() else {
            return Err(HandlerError::Unexpected(PacketKind::FileStreamClose));
        };
        let CompletedTransfer { start, file } = transfer;
        let requested = start.metadata.text(keys::FILE_OUT).unwrap_or(&start.name);
        let Some(name) = safe_file_name(requested) else {
            return Ok(info(INVALID_NAME));
        };
        let dest = self.0.storage_dir().join(&name);
        let exists = tokio::fs::try_exists(&dest).await?;
        let store = self.0.store();
        if !store.can_overwrite(&name, &account.username, exists) {
            warn!(name = %name, username = %account.username, "upload would overwrite another account's file");
            return Ok(info(OVERWRITE_DENIED));
        }

        let downloaders = self.downloaders(&start.metadata, conn).await?;
        let len = file.len();
        let target = dest.clone();
        tokio::task::spawn_blocking(move || file.persist_to(&target))
            .await
            .map_err(io::Error::other)??;

        for username in &downloaders {
            store.add_shared_file(username, SharedFile::new(&name, &account.username));
        }
        store.record_permission(FilePermission {
            file: name.clone(),
            uploader: account.username.clone(),
            downloaders,
        });
        info!(name = %name, transfer_id = %start.transfer_id, bytes = len, username = %account.username, "upload stored");
        Ok(info(format!("Uploaded {name}.")))
    }

    async fn on_terminate(
        &self,
        name: &str,
        transfer_id: TransferId,
        conn: &Connection,
    ) -> Result<(), HandlerError> {
        info!(peer_addr = ?conn.peer_addr(), name, transfer_id = %transfer_id, "upload aborted by peer");
        Ok(())
    }
}
