//! Account and file permission records used by the server.
//!
//! The server reaches its records through [`AccountStore`] and
//! [`PermissionStore`]. [`MemoryStore`] implements both with concurrent maps.
//! [`FileStore`] wraps it and rewrites a TOML file after every change, so
//! accounts and permissions survive a restart.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{
        Mutex,
        PoisonError,
        atomic::{AtomicI32, Ordering},
    },
};

use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    config::{self, ConfigError},
    credentials::{PasswordHash, hash_matches, normalize_username, stored_hash},
};

/// A registered account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Server-assigned id.
    pub id: i32,
    /// Lowercase username.
    pub username: String,
    /// Stored form of the password hash.
    pub password_hash: PasswordHash,
}

impl Account {
    /// Returns true when `username` and the client-sent hash match this account.
    #[must_use]
    pub fn credentials_match(&self, username: &str, client_hash: &PasswordHash) -> bool {
        normalize_username(username) == self.username
            && hash_matches(&self.password_hash, client_hash)
    }
}

/// Notice that a file was shared with an account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedFile {
    /// Stored file name.
    pub file: String,
    /// Username that shared it.
    pub sender: String,
}

impl SharedFile {
    /// Create a notice for `file` sent by `sender`.
    pub fn new(file: impl Into<String>, sender: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            sender: sender.into(),
        }
    }
}

/// Access rules for one stored file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePermission {
    /// Stored file name.
    pub file: String,
    /// Username that uploaded the file.
    pub uploader: String,
    /// Usernames allowed to download it; empty means everyone.
    pub downloaders: Vec<String>,
}

impl FilePermission {
    /// Returns true when `username` may download the file.
    #[must_use]
    pub fn allows(&self, username: &str) -> bool {
        let username = normalize_username(username);
        self.downloaders.is_empty()
            || self.uploader == username
            || self.downloaders.iter().any(|d| *d == username)
    }
}

/// Account records.
pub trait AccountStore: Send + Sync {
    /// Returns true when `username` is pre-registered and has no account yet.
    fn is_pending(&self, username: &str) -> bool;

    /// Pre-register `username` so its first login creates an account.
    fn add_pending(&self, username: &str);

    /// Create an account for a pending username, consuming the pending entry.
    ///
    /// Returns `None` if the username was not pending.
    fn create_account(&self, username: &str, client_hash: &PasswordHash) -> Option<Account>;

    /// Look up an account by id.
    fn account_by_id(&self, id: i32) -> Option<Account>;

    /// Look up an account by username, ignoring case.
    fn account_by_username(&self, username: &str) -> Option<Account>;

    /// Note that a file has been shared with `username`.
    fn add_shared_file(&self, username: &str, shared: SharedFile);

    /// Files shared with `username` and not yet viewed or downloaded.
    fn shared_files(&self, username: &str) -> Vec<SharedFile>;

    /// Forget every shared-file notice for `username`.
    fn clear_shared_files(&self, username: &str);

    /// Forget the notice for `file`, returning true if one existed.
    fn remove_shared_file(&self, username: &str, file: &str) -> bool;
}

/// File permission records.
pub trait PermissionStore: Send + Sync {
    /// Record or replace the permission entry for `permission.file`.
    fn record_permission(&self, permission: FilePermission);

    /// Permission entry for `file`, if one was recorded.
    fn permission(&self, file: &str) -> Option<FilePermission>;

    /// Returns true when `username` may write `file`.
    ///
    /// Files that do not exist may always be written; existing files only by
    /// the account that uploaded them.
    fn can_overwrite(&self, file: &str, username: &str, exists: bool) -> bool {
        let owned = self
            .permission(file)
            .is_some_and(|p| p.uploader == normalize_username(username));
        owned || !exists
    }

    /// Returns true when `username` may download `file`.
    ///
    /// Files without a recorded entry are public.
    fn can_download(&self, file: &str, username: &str) -> bool {
        self.permission(file).is_none_or(|p| p.allows(username))
    }
}

/// Everything the server needs from its records.
pub trait Store: AccountStore + PermissionStore {}

impl<T: AccountStore + PermissionStore> Store for T {}

/// In-memory [`Store`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    pending: DashSet<String>,
    accounts: DashMap<i32, Account>,
    usernames: DashMap<String, i32>,
    shared: DashMap<String, Vec<SharedFile>>,
    permissions: DashMap<String, FilePermission>,
    next_id: AtomicI32,
}

impl MemoryStore {
    /// Create a store with `pending` usernames pre-registered.
    pub fn new<I, S>(pending: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let store = Self::default();
        for name in pending {
            store.add_pending(name.as_ref());
        }
        store
    }

    /// Number of created accounts.
    #[must_use]
    pub fn account_count(&self) -> usize { self.accounts.len() }

    fn records(&self) -> Records {
        let mut accounts: Vec<Account> = self.accounts.iter().map(|a| a.value().clone()).collect();
        accounts.sort_by_key(|a| a.id);
        let mut pending: Vec<String> = self.pending.iter().map(|p| p.key().clone()).collect();
        pending.sort();
        let mut permissions: Vec<FilePermission> =
            self.permissions.iter().map(|p| p.value().clone()).collect();
        permissions.sort_by(|a, b| a.file.cmp(&b.file));
        Records {
            next_id: self.next_id.load(Ordering::Relaxed),
            pending,
            accounts,
            shared: self
                .shared
                .iter()
                .filter(|entry| !entry.value().is_empty())
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
            permissions,
        }
    }

    fn from_records(records: Records) -> Self {
        let after_last = records
            .accounts
            .iter()
            .map(|a| a.id.saturating_add(1))
            .max()
            .unwrap_or(0);
        let store = Self {
            next_id: AtomicI32::new(records.next_id.max(after_last)),
            ..Self::default()
        };
        for account in records.accounts {
            store.usernames.insert(account.username.clone(), account.id);
            store.accounts.insert(account.id, account);
        }
        for username in records.pending {
            store.add_pending(&username);
        }
        for (username, files) in records.shared {
            store.shared.insert(username, files);
        }
        for permission in records.permissions {
            store.permissions.insert(permission.file.clone(), permission);
        }
        store
    }
}

impl AccountStore for MemoryStore {
    fn is_pending(&self, username: &str) -> bool {
        self.pending.contains(&normalize_username(username))
    }

    fn add_pending(&self, username: &str) {
        let username = normalize_username(username);
        if !username.is_empty() && !self.usernames.contains_key(&username) {
            self.pending.insert(username);
        }
    }

    fn create_account(&self, username: &str, client_hash: &PasswordHash) -> Option<Account> {
        let username = self.pending.remove(&normalize_username(username))?;
        let account = Account {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            username,
            password_hash: stored_hash(client_hash),
        };
        self.usernames.insert(account.username.clone(), account.id);
        self.accounts.insert(account.id, account.clone());
        Some(account)
    }

    fn account_by_id(&self, id: i32) -> Option<Account> {
        self.accounts.get(&id).map(|a| a.value().clone())
    }

    fn account_by_username(&self, username: &str) -> Option<Account> {
        let id = *self.usernames.get(&normalize_username(username))?;
        self.account_by_id(id)
    }

    fn add_shared_file(&self, username: &str, shared: SharedFile) {
        let mut files = self.shared.entry(normalize_username(username)).or_default();
        files.retain(|f| f.file != shared.file);
        files.push(shared);
    }

    fn shared_files(&self, username: &str) -> Vec<SharedFile> {
        self.shared
            .get(&normalize_username(username))
            .map(|files| files.clone())
            .unwrap_or_default()
    }

    fn clear_shared_files(&self, username: &str) {
        self.shared.remove(&normalize_username(username));
    }

    fn remove_shared_file(&self, username: &str, file: &str) -> bool {
        let Some(mut files) = self.shared.get_mut(&normalize_username(username)) else {
            return false;
        };
        let before = files.len();
        files.retain(|f| f.file != file);
        before != files.len()
    }
}

impl PermissionStore for MemoryStore {
    fn record_permission(&self, permission: FilePermission) {
        let permission = FilePermission {
            uploader: normalize_username(&permission.uploader),
            downloaders: permission
                .downloaders
                .iter()
                .map(|d| normalize_username(d))
                .collect(),
            ..permission
        };
        self.permissions.insert(permission.file.clone(), permission);
    }

    fn permission(&self, file: &str) -> Option<FilePermission> {
        self.permissions.get(file).map(|p| p.value().clone())
    }
}

/// On-disk form of a [`FileStore`].
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct Records {
    next_id: i32,
    pending: Vec<String>,
    accounts: Vec<Account>,
    shared: BTreeMap<String, Vec<SharedFile>>,
    permissions: Vec<FilePermission>,
}

/// [`Store`] persisted to a TOML file.
///
/// Records are held in a [`MemoryStore`] and the whole file is rewritten
/// after each change. A failed write is logged and the in-memory change kept.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    records: MemoryStore,
    write: Mutex<()>,
}

impl FileStore {
    /// Load the records at `path`, starting empty if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let records: Records = config::load(&path)?;
        info!(
            path = %path.display(),
            accounts = records.accounts.len(),
            permissions = records.permissions.len(),
            "account records loaded"
        );
        Ok(Self {
            records: MemoryStore::from_records(records),
            path,
            write: Mutex::new(()),
        })
    }

    /// File the records are written to.
    #[must_use]
    pub fn path(&self) -> &Path { &self.path }

    /// Write the current records to disk.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the records cannot be serialised or written.
    pub fn save(&self) -> Result<(), ConfigError> {
        let _guard = self.write.lock().unwrap_or_else(PoisonError::into_inner);
        config::save(&self.path, &self.records.records())
    }

    fn persist(&self) {
        if let Err(e) = self.save() {
            warn!(path = %self.path.display(), error = %e, "failed to persist account records");
        }
    }
}

impl AccountStore for FileStore {
    fn is_pending(&self, username: &str) -> bool { self.records.is_pending(username) }

    fn add_pending(&self, username: &str) {
        if self.records.is_pending(username) {
            return;
        }
        self.records.add_pending(username);
        if self.records.is_pending(username) {
            self.persist();
        }
    }

    fn create_account(&self, username: &str, client_hash: &PasswordHash) -> Option<Account> {
        let account = self.records.create_account(username, client_hash)?;
        self.persist();
        Some(account)
    }

    fn account_by_id(&self, id: i32) -> Option<Account> { self.records.account_by_id(id) }

    fn account_by_username(&self, username: &str) -> Option<Account> {
        self.records.account_by_username(username)
    }

    fn add_shared_file(&self, username: &str, shared: SharedFile) {
        self.records.add_shared_file(username, shared);
        self.persist();
    }

    fn shared_files(&self, username: &str) -> Vec<SharedFile> { self.records.shared_files(username) }

    fn clear_shared_files(&self, username: &str) {
        if self.records.shared_files(username).is_empty() {
            return;
        }
        self.records.clear_shared_files(username);
        self.persist();
    }

    fn remove_shared_file(&self, username: &str, file: &str) -> bool {
        let removed = self.records.remove_shared_file(username, file);
        if removed {
            self.persist();
        }
        removed
    }
}

impl PermissionStore for FileStore {
    fn record_permission(&self, permission: FilePermission) {
        self.records.record_permission(permission);
        self.persist();
    }

    fn permission(&self, file: &str) -> Option<FilePermission> { self.records.permission(file) }
}
