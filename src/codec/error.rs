//! Error types for the frame codec.
//!
//! The codec distinguishes wire-level framing problems from transport I/O
//! failures and from the stream ending part-way through a frame. None of these
//! can be answered with an error packet: once the header stream is out of step
//! the only safe recovery is to close the connection.

use std::io;

use thiserror::Error;

/// Framing-level errors raised while locating frame boundaries.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    /// The length field declares a payload larger than the codec accepts.
    #[error("frame exceeds max length: {size} > {max}")]
    OversizedFrame {
        /// Payload size declared (or attempted) for the frame.
        size: usize,
        /// Maximum allowed payload size.
        max: usize,
    },

    /// The payload length cannot be represented in the 4-byte length field.
    #[error("payload of {size} bytes does not fit the length field")]
    LengthOverflow {
        /// Attempted payload size.
        size: usize,
    },
}

/// End-of-stream conditions.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum EofError {
    /// The peer closed the stream at a frame boundary.
    #[error("connection closed cleanly at frame boundary")]
    CleanClose,

    /// The peer closed the stream after the header but before the payload
    /// completed.
    #[error("premature EOF: {bytes_received} bytes of {expected} byte payload received")]
    MidFrame {
        /// Payload bytes received before EOF.
        bytes_received: usize,
        /// Payload length declared by the header.
        expected: usize,
    },

    /// The peer closed the stream inside a frame header.
    #[error("premature EOF during header: {bytes_received} of {header_size} header bytes")]
    MidHeader {
        /// Header bytes received before EOF.
        bytes_received: usize,
        /// Size of a complete header.
        header_size: usize,
    },
}

/// Top-level codec error.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Frame boundaries could not be established.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// Transport failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The stream ended.
    #[error("EOF: {0}")]
    Eof(#[from] EofError),
}

impl CodecError {
    /// Returns true if the peer closed the stream at a frame boundary.
    ///
    /// ```
    /// use filewire::codec::{CodecError, EofError};
    ///
    /// assert!(CodecError::Eof(EofError::CleanClose).is_clean_close());
    /// assert!(
    ///     !CodecError::Eof(EofError::MidHeader {
    ///         bytes_received: 2,
    ///         header_size: 5,
    ///     })
    ///     .is_clean_close()
    /// );
    /// ```
    #[must_use]
    pub fn is_clean_close(&self) -> bool { matches!(self, Self::Eof(EofError::CleanClose)) }

    /// Short category name used in logs and metrics labels.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Framing(_) => "framing",
            Self::Io(_) => "io",
            Self::Eof(_) => "eof",
        }
    }
}

impl From<CodecError> for io::Error {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Io(e) => e,
            CodecError::Framing(e) => io::Error::new(io::ErrorKind::InvalidData, e),
            CodecError::Eof(e) => io::Error::new(io::ErrorKind::UnexpectedEof, e),
        }
    }
}
