//! Configuration files for the server and client.
//!
//! Both are TOML documents in which every field is optional; missing fields
//! take the defaults below and a missing file yields the defaults outright.

use std::{
    fs,
    io,
    net::SocketAddr,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::{
    codec::MAX_FRAME_LENGTH,
    packet::StreamMetadata,
    transfer::{MAX_FRAGMENT_SIZE, OutboundOptions, RouterLimits},
};

/// Errors raised while loading or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read or written.
    #[error("cannot access {}: {source}", path.display())]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
    /// The file is not valid TOML for this configuration.
    #[error("invalid configuration in {}: {source}", path.display())]
    Parse {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        source: toml::de::Error,
    },
    /// The configuration could not be rendered as TOML.
    #[error("cannot serialise configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Load `path` as TOML, returning defaults when the file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError`] if the file cannot be read or parsed.
pub fn load<T>(path: &Path) -> Result<T, ConfigError>
where
    T: DeserializeOwned + Default,
{
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(T::default()),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Write `value` to `path` as TOML, creating parent directories.
///
/// # Errors
///
/// Returns [`ConfigError`] if serialisation or the write fails.
pub fn save<T: Serialize>(path: &Path, value: &T) -> Result<(), ConfigError> {
    let text = toml::to_string_pretty(value)?;
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    fs::write(path, text).map_err(io_err)
}

/// Transfer tuning shared by server and client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Largest fragment payload sent.
    pub max_fragment_size: usize,
    /// Delay between fragments on the background path, in milliseconds.
    pub throttle_ms: u64,
    /// Files larger than this many bytes are sent in the background.
    pub async_threshold: u64,
    /// Directory for spool files; the system temp dir when unset.
    pub spool_dir: Option<PathBuf>,
    /// Idle seconds after which an unfinished inbound transfer is dropped.
    pub session_timeout_secs: u64,
    /// Backlogged fragments kept per transfer.
    pub max_backlog_per_transfer: usize,
    /// Backlogged fragments kept per connection across all transfers.
    pub max_pending_fragments: usize,
    /// Backlogged close tokens kept per connection.
    pub max_pending_closes: usize,
    /// Largest accepted frame payload.
    pub max_frame_length: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_fragment_size: MAX_FRAGMENT_SIZE,
            throttle_ms: 50,
            async_threshold: 6_525_000,
            spool_dir: None,
            session_timeout_secs: 300,
            max_backlog_per_transfer: 4096,
            max_pending_fragments: 16_384,
            max_pending_closes: 64,
            max_frame_length: MAX_FRAME_LENGTH,
        }
    }
}

impl TransferConfig {
    /// Directory for spool files.
    #[must_use]
    pub fn spool_dir(&self) -> PathBuf { self.spool_dir.clone().unwrap_or_else(std::env::temp_dir) }

    /// Delay between background fragments.
    #[must_use]
    pub fn throttle(&self) -> Duration { Duration::from_millis(self.throttle_ms) }

    /// Router bounds derived from this configuration.
    #[must_use]
    pub fn router_limits(&self) -> RouterLimits {
        let defaults = RouterLimits::default();
        RouterLimits {
            session_timeout: Duration::from_secs(self.session_timeout_secs),
            max_backlog_per_transfer: NonZeroUsize::new(self.max_backlog_per_transfer)
                .unwrap_or(defaults.max_backlog_per_transfer),
            max_pending_fragments: NonZeroUsize::new(self.max_pending_fragments)
                .unwrap_or(defaults.max_pending_fragments),
            max_pending_closes: NonZeroUsize::new(self.max_pending_closes)
                .unwrap_or(defaults.max_pending_closes),
        }
    }

    /// Outbound options carrying `metadata`.
    #[must_use]
    pub fn outbound(&self, metadata: StreamMetadata) -> OutboundOptions {
        OutboundOptions {
            max_fragment_size: self.max_fragment_size,
            throttle: self.throttle(),
            metadata,
            name: None,
        }
    }

    /// Returns true when a file of `len` bytes should be sent in the background.
    #[must_use]
    pub fn prefers_background(&self, len: u64) -> bool { len > self.async_threshold }
}

/// Server configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address.
    pub bind_addr: SocketAddr,
    /// Directory holding uploaded files.
    pub storage_dir: PathBuf,
    /// Usernames allowed to create an account on first login.
    pub pending_accounts: Vec<String>,
    /// File holding accounts, pending usernames and file permissions.
    pub records_file: PathBuf,
    /// Transfer tuning.
    pub transfer: TransferConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5001)),
            storage_dir: PathBuf::from("files"),
            pending_accounts: Vec::new(),
            records_file: PathBuf::from("data/records.toml"),
            transfer: TransferConfig::default(),
        }
    }
}

/// Client configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address.
    pub server_addr: SocketAddr,
    /// Account username.
    pub username: String,
    /// Account password.
    pub password: String,
    /// Directory receiving downloads.
    pub downloads_dir: PathBuf,
    /// Directory holding persisted client state.
    pub data_dir: PathBuf,
    /// Transfer tuning.
    pub transfer: TransferConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 5001)),
            username: String::new(),
            password: String::new(),
            downloads_dir: PathBuf::from("downloads"),
            data_dir: PathBuf::from("metadata"),
            transfer: TransferConfig::default(),
        }
    }
}
