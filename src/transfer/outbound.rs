//! Outbound file streaming.
//!
//! Both paths emit the same packet sequence: one start, the fragments in
//! index order, then one close. A read failure or cancellation replaces the
//! remainder of the sequence with a single terminate packet; close is never
//! sent after terminate.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use leaky_bucket::RateLimiter;
use tokio::{fs::File, io::AsyncReadExt, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::TransferError;
use crate::{
    connection::Connection,
    metrics::{self, TransferOutcome},
    packet::{
        FileFragment,
        FileStreamClose,
        FileStreamStart,
        StreamMetadata,
        TerminateFileStream,
        TransferId,
    },
};

/// Largest fragment payload a sender produces.
pub const MAX_FRAGMENT_SIZE: usize = 65_250;

/// Smallest fragment payload used by background transfers.
pub const MIN_ASYNC_FRAGMENT_SIZE: usize = 1024;

/// Number of fragments needed for `len` bytes, never less than one.
///
/// ```
/// use filewire::transfer::fragment_count;
///
/// assert_eq!(fragment_count(0, 100), 1);
/// assert_eq!(fragment_count(250, 100), 3);
/// assert_eq!(fragment_count(300, 100), 3);
/// ```
#[must_use]
pub fn fragment_count(len: u64, max_fragment_size: usize) -> u64 {
    let max = (max_fragment_size.max(1)) as u64;
    len.div_ceil(max).max(1)
}

/// Parameters for one outbound transfer.
#[derive(Clone, Debug)]
pub struct OutboundOptions {
    /// Largest fragment payload.
    pub max_fragment_size: usize,
    /// Delay between fragments on the background path.
    pub throttle: Duration,
    /// Metadata attached to the start packet.
    pub metadata: StreamMetadata,
    /// Name announced to the peer; defaults to the file's base name.
    pub name: Option<String>,
}

impl Default for OutboundOptions {
    fn default() -> Self {
        Self {
            max_fragment_size: MAX_FRAGMENT_SIZE,
            throttle: Duration::from_millis(50),
            metadata: StreamMetadata::new(),
            name: None,
        }
    }
}

impl OutboundOptions {
    /// Attach metadata to the start packet.
    #[must_use]
    pub fn with_metadata(mut self, metadata: StreamMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Outcome of a completed outbound transfer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferSummary {
    /// Announced name.
    pub name: String,
    /// Transfer identifier.
    pub transfer_id: TransferId,
    /// Fragments sent.
    pub fragments: u64,
    /// Bytes sent.
    pub bytes: u64,
}

struct Source {
    file: File,
    start: FileStreamStart,
    len: u64,
    fragments: u64,
    fragment_size: usize,
}

async fn open_source(
    path: &Path,
    options: &OutboundOptions,
    fragment_size: usize,
) -> Result<Source, TransferError> {
    let not_found = || TransferError::NotFound {
        path: path.to_path_buf(),
    };
    let file = File::open(path).await.map_err(|_| not_found())?;
    let meta = file.metadata().await?;
    if !meta.is_file() {
        return Err(not_found());
    }
    let len = meta.len();
    let fragments = fragment_count(len, fragment_size);
    let fragment_count = i32::try_from(fragments).map_err(|_| TransferError::TooLarge { len })?;
    let file_length = i64::try_from(len).map_err(|_| TransferError::TooLarge { len })?;
    let name = match &options.name {
        Some(name) => name.clone(),
        None => base_name(path).ok_or_else(not_found)?,
    };
    let start = FileStreamStart {
        name,
        label: path.display().to_string(),
        transfer_id: TransferId::next(),
        fragment_count,
        file_length,
        metadata: options.metadata.clone(),
    };
    Ok(Source {
        file,
        start,
        len,
        fragments,
        fragment_size,
    })
}

fn base_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_owned)
}

impl Source {
    /// Read fragment `index`; the last fragment carries the remainder.
    async fn read_fragment(&mut self, index: u64) -> std::io::Result<FileFragment> {
        let size = self.fragment_size as u64;
        let remaining = self.len.saturating_sub(index * size);
        let take = usize::try_from(remaining.min(size)).unwrap_or(self.fragment_size);
        let mut data = vec![0u8; take];
        self.file.read_exact(&mut data).await?;
        Ok(FileFragment {
            name: self.start.name.clone(),
            transfer_id: self.start.transfer_id,
            index: i32::try_from(index).unwrap_or(i32::MAX),
            data: data.into(),
        })
    }

    fn summary(&self) -> TransferSummary {
        TransferSummary {
            name: self.start.name.clone(),
            transfer_id: self.start.transfer_id,
            fragments: self.fragments,
            bytes: self.len,
        }
    }
}

async fn send_terminate(conn: &Connection, start: &FileStreamStart) {
    if let Err(e) = conn.send(TerminateFileStream::for_transfer(start)).await {
        debug!(name = %start.name, transfer_id = %start.transfer_id, error = %e, "terminate not delivered");
    }
    metrics::inc_transfers(TransferOutcome::Terminated);
}

/// Stream `path` to the peer, returning once close has been sent.
///
/// # Errors
///
/// Returns [`TransferError::NotFound`] before anything is sent if `path` is
/// not a regular file. A read failure sends terminate and returns
/// [`TransferError::Io`]; send failures return [`TransferError::Send`].
pub async fn send_file(
    conn: &Connection,
    path: &Path,
    options: &OutboundOptions,
) -> Result<TransferSummary, TransferError> {
    let source = open_source(path, options, options.max_fragment_size.clamp(1, MAX_FRAGMENT_SIZE)).await?;
    send_source(conn, source).await
}

async fn send_source(conn: &Connection, mut source: Source) -> Result<TransferSummary, TransferError> {
    conn.send(source.start.clone()).await?;
    for index in 0..source.fragments {
        let fragment = match source.read_fragment(index).await {
            Ok(fragment) => fragment,
            Err(e) => {
                warn!(name = %source.start.name, index, error = %e, "source read failed");
                send_terminate(conn, &source.start).await;
                return Err(e.into());
            }
        };
        conn.send(fragment).await?;
    }
    conn.send(FileStreamClose::for_transfer(&source.start)).await?;
    debug!(name = %source.start.name, transfer_id = %source.start.transfer_id, "transfer sent");
    Ok(source.summary())
}

/// Handle to a background transfer.
#[derive(Debug)]
pub struct TransferHandle {
    name: String,
    transfer_id: TransferId,
    token: CancellationToken,
    task: JoinHandle<Result<TransferSummary, TransferError>>,
}

impl TransferHandle {
    /// Announced name.
    #[must_use]
    pub fn name(&self) -> &str { &self.name }

    /// Transfer identifier.
    #[must_use]
    pub fn transfer_id(&self) -> TransferId { self.transfer_id }

    /// Request cancellation; the task sends terminate and stops.
    pub fn cancel(&self) { self.token.cancel(); }

    /// Wait for the task to finish.
    ///
    /// # Errors
    ///
    /// Returns the task's [`TransferError`], [`TransferError::Cancelled`] after
    /// [`cancel`](Self::cancel), or [`TransferError::Task`] if it panicked.
    pub async fn join(self) -> Result<TransferSummary, TransferError> {
        self.task
            .await
            .map_err(|e| TransferError::Task(e.to_string()))?
    }
}

/// Stream `path` from a background task, waiting `options.throttle` between
/// fragments.
///
/// The task is tracked by the connection and is cancelled when the connection
/// closes.
///
/// # Errors
///
/// Returns [`TransferError::NotFound`] if `path` is not a regular file.
pub async fn spawn_file_transfer(
    conn: &Connection,
    path: PathBuf,
    options: OutboundOptions,
) -> Result<TransferHandle, TransferError> {
    let fragment_size = options
        .max_fragment_size
        .clamp(MIN_ASYNC_FRAGMENT_SIZE, MAX_FRAGMENT_SIZE);
    let source = open_source(&path, &options, fragment_size).await?;
    let token = conn.close_token().child_token();
    let interval = options.throttle.max(Duration::from_millis(1));
    let limiter = RateLimiter::builder()
        .initial(1)
        .refill(1)
        .interval(interval)
        .max(1)
        .build();

    let name = source.start.name.clone();
    let transfer_id = source.start.transfer_id;
    info!(name = %name, transfer_id = %transfer_id, fragments = source.fragments, "background transfer spawned");
    let task = conn.tracker().spawn(run_transfer(conn.clone(), source, limiter, token.clone()));
    Ok(TransferHandle {
        name,
        transfer_id,
        token,
        task,
    })
}

async fn run_transfer(
    conn: Connection,
    mut source: Source,
    limiter: RateLimiter,
    token: CancellationToken,
) -> Result<TransferSummary, TransferError> {
    conn.send(source.start.clone()).await?;
    for index in 0..source.fragments {
        tokio::select! {
            biased;
            () = token.cancelled() => {
                info!(name = %source.start.name, index, "background transfer cancelled");
                send_terminate(&conn, &source.start).await;
                return Err(TransferError::Cancelled);
            }
            () = limiter.acquire_one() => {}
        }
        let fragment = match source.read_fragment(index).await {
            Ok(fragment) => fragment,
            Err(e) => {
                warn!(name = %source.start.name, index, error = %e, "source read failed");
                send_terminate(&conn, &source.start).await;
                return Err(e.into());
            }
        };
        conn.send(fragment).await?;
    }
    conn.send(FileStreamClose::for_transfer(&source.start)).await?;
    debug!(name = %source.start.name, transfer_id = %source.start.transfer_id, "background transfer sent");
    Ok(source.summary())
}
