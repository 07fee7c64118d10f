//! Errors raised by [`FileClient`](super::FileClient).

use std::{io, net::SocketAddr};

use thiserror::Error;

use crate::{config::ConfigError, connection::SendError, transfer::TransferError};

/// Errors emitted by client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server could not be reached.
    #[error("cannot connect to {addr}: {source}")]
    Connect {
        /// Server address.
        addr: SocketAddr,
        /// Underlying error.
        source: io::Error,
    },
    /// Local directory or file I/O failed.
    #[error("client I/O failed: {0}")]
    Io(#[from] io::Error),
    /// Persisted client state could not be read or written.
    #[error(transparent)]
    State(#[from] ConfigError),
    /// A request could not be sent.
    #[error("request not sent: {0}")]
    Send(#[from] SendError),
    /// An upload could not be started or failed.
    #[error("upload failed: {0}")]
    Transfer(#[from] TransferError),
    /// The connection driver stopped with a stream error.
    #[error("connection failed: {0}")]
    Connection(#[from] crate::codec::CodecError),
    /// The connection driver task panicked.
    #[error("connection task failed: {0}")]
    Task(String),
}
