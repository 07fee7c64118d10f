//! Chunked file transfer: inbound reassembly and outbound streaming.
//!
//! Inbound transfers are driven by a per-connection [`TransferRouter`] that
//! owns one [`TransferSession`] per open transfer plus backlogs for control
//! packets that arrive before their session exists. Sessions spool fragments
//! into temporary files (see [`ReassembledFile`]) which are released on every
//! exit path.
//!
//! Outbound transfers are started with [`send_file`] (awaited inline) or
//! [`spawn_file_transfer`] (throttled background task).

use std::{
    io,
    path::{Path, PathBuf},
};

use thiserror::Error;

pub mod aggregator;
pub mod outbound;
pub mod router;
mod segment;

pub use aggregator::{Acceptance, ReassembledFile, TransferSession};
pub use outbound::{
    MAX_FRAGMENT_SIZE,
    MIN_ASYNC_FRAGMENT_SIZE,
    OutboundOptions,
    TransferHandle,
    TransferSummary,
    fragment_count,
    send_file,
    spawn_file_transfer,
};
pub use router::{CompletedTransfer, RouterLimits, TransferEvent, TransferRouter};

use crate::connection::SendError;

/// Errors raised by inbound or outbound transfers.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The source path is missing or not a regular file.
    #[error("{} is not a readable regular file", path.display())]
    NotFound {
        /// Offending path.
        path: PathBuf,
    },
    /// The source file needs more fragments than the wire can count.
    #[error("file of {len} bytes needs too many fragments")]
    TooLarge {
        /// File length in bytes.
        len: u64,
    },
    /// Spool or source file I/O failed.
    #[error("transfer I/O failed: {0}")]
    Io(#[from] io::Error),
    /// A transfer packet could not be sent.
    #[error("transfer packet not sent: {0}")]
    Send(#[from] SendError),
    /// The transfer was cancelled before completion.
    #[error("transfer cancelled")]
    Cancelled,
    /// The background transfer task panicked or was aborted.
    #[error("transfer task failed: {0}")]
    Task(String),
}

/// Reduce a peer-supplied name to a bare file name safe to join onto a
/// storage directory.
///
/// Directory components are stripped; names that reduce to nothing, `.` or
/// `..` are refused.
///
/// ```
/// use filewire::transfer::safe_file_name;
///
/// assert_eq!(safe_file_name("../../etc/passwd").as_deref(), Some("passwd"));
/// assert_eq!(safe_file_name(r"C:\tmp\notes.txt").as_deref(), Some("notes.txt"));
/// assert_eq!(safe_file_name(".."), None);
/// ```
#[must_use]
pub fn safe_file_name(raw: &str) -> Option<String> {
    let unified = raw.trim().replace('\\', "/");
    let name = Path::new(&unified).file_name()?.to_str()?;
    (!name.is_empty() && name != "." && name != "..").then(|| name.to_owned())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::safe_file_name;

    #[rstest]
    #[case("report.pdf", Some("report.pdf"))]
    #[case("nested/dir/report.pdf", Some("report.pdf"))]
    #[case("  spaced.txt ", Some("spaced.txt"))]
    #[case("win\\path\\a.bin", Some("a.bin"))]
    #[case("", None)]
    #[case("/", None)]
    #[case("..", None)]
    #[case("dir/..", None)]
    fn file_names_are_reduced(#[case] raw: &str, #[case] expected: Option<&str>) {
        assert_eq!(safe_file_name(raw).as_deref(), expected);
    }
}
