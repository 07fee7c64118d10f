//! Errors raised by [`FileServer`](super::FileServer) operations.

use std::{io, net::SocketAddr, path::PathBuf};

use thiserror::Error;

/// Errors that may occur while starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listen address could not be bound.
    #[error("cannot bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying error.
        source: io::Error,
    },
    /// A storage or spool directory could not be created.
    #[error("cannot prepare directory {}: {source}", path.display())]
    Directory {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
    /// Listener I/O failed outside the accept loop.
    #[error("listener error: {0}")]
    Io(#[from] io::Error),
}
