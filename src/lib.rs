//! Peer-to-peer file storage over a framed TCP protocol.
//!
//! Each peer exchanges typed packets inside length-prefixed frames. Files are
//! split into ordinal fragments which may arrive out of order; the receiver
//! spools them to disk and reassembles the file once the sender closes the
//! transfer. The [`server`] and [`client`] modules build a small file storage
//! service on top of that transport.

pub mod auth;
pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod credentials;
pub mod dispatch;
pub mod handler;
pub mod metrics;
pub mod packet;
pub mod registry;
pub mod server;
pub mod session;
pub mod store;
pub mod transfer;
pub mod wire;

pub use client::{ClientError, ClientEvent, FileClient, UploadOptions};
pub use codec::{CodecError, Frame, FrameCodec};
pub use connection::{Connection, ConnectionId, ConnectionSetup, SendError};
pub use packet::{Packet, PacketKind, TransferId};
pub use registry::{PacketRegistry, Role};
pub use server::{FileServer, ServerError};
pub use session::SessionRegistry;
pub use store::{FileStore, MemoryStore};
pub use transfer::TransferError;
