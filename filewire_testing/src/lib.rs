//! Utilities for exercising `filewire` connections with in-memory streams.
//!
//! The helpers wire a [`Connection`](filewire::connection::Connection) to one
//! half of a `tokio::io::duplex` stream and expose the other half as a raw
//! frame endpoint, so tests can send arbitrary frames and inspect exactly what
//! the connection writes back.
//!
//! ```rust
//! use filewire_testing::split_at;
//!
//! let chunks = split_at(b"abcdef", &[2, 4]);
//! assert_eq!(chunks, vec![b"ab".to_vec(), b"cd".to_vec(), b"ef".to_vec()]);
//! ```

pub mod harness;
pub mod logging;
pub mod split;

pub use harness::{RawPeer, connected_pair, spool_dir};
pub use logging::{LoggerHandle, logger};
pub use split::{chunked, split_at};
