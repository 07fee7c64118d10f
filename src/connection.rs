//! Per-connection context and read loop.
//!
//! [`Connection`] is the handle passed to every handler. It carries the
//! connection's identity, role, verified account and a write half guarded by
//! an async mutex, so responses, command sends and background transfers never
//! interleave partial frames. [`ConnectionDriver`] owns the read half and
//! processes inbound frames strictly in arrival order.

use std::{
    fmt,
    net::SocketAddr,
    path::PathBuf,
    sync::{
        Arc,
        OnceLock,
        Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    sync::Mutex,
    time::{self, MissedTickBehavior},
};
use tokio_util::{
    codec::{FramedRead, FramedWrite},
    sync::CancellationToken,
    task::TaskTracker,
};

use crate::{
    auth::Authorizer,
    codec::{CodecError, Frame, FrameCodec, MAX_FRAME_LENGTH},
    dispatch::{Dispatch, Dispatcher},
    metrics::{self, Direction},
    packet::{Packet, PacketKind},
    registry::{PacketRegistry, Role},
    transfer::{RouterLimits, TransferRouter},
    wire::EncodeError,
};

/// Identifier assigned to a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

impl ConnectionId {
    /// Create a new [`ConnectionId`] with the provided value.
    #[must_use]
    pub fn new(id: u64) -> Self { Self(id) }

    /// Allocate the next process-unique identifier.
    #[must_use]
    pub fn next() -> Self { Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)) }

    /// Return the inner `u64` representation.
    #[must_use]
    pub fn as_u64(&self) -> u64 { self.0 }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "ConnectionId({})", self.0) }
}

/// Account bound to a connection after a successful login.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedAccount {
    /// Account id.
    pub id: i32,
    /// Account username.
    pub username: String,
}

/// Errors raised while sending a packet.
#[derive(Debug, Error)]
pub enum SendError {
    /// No descriptor lets this role send the packet kind.
    #[error("{kind} cannot be sent by a {role}")]
    Unregistered {
        /// Packet kind.
        kind: PacketKind,
        /// Local role.
        role: Role,
    },
    /// The payload could not be encoded.
    #[error("failed to encode packet: {0}")]
    Encode(#[from] EncodeError),
    /// The frame could not be written.
    #[error("failed to write frame: {0}")]
    Codec(#[from] CodecError),
    /// The connection has been closed.
    #[error("connection closed")]
    Closed,
}

type Writer = FramedWrite<Box<dyn AsyncWrite + Send + Unpin>, FrameCodec>;
type Reader = FramedRead<Box<dyn AsyncRead + Send + Unpin>, FrameCodec>;

pub(crate) struct ConnectionInner {
    id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    role: Role,
    registry: Arc<PacketRegistry>,
    writer: Mutex<Writer>,
    account: OnceLock<VerifiedAccount>,
    closed: CancellationToken,
    tracker: TaskTracker,
}

/// Shared handle to one live connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("peer_addr", &self.inner.peer_addr)
            .field("role", &self.inner.role)
            .field("account", &self.inner.account.get())
            .field("closed", &self.inner.closed.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Everything a connection needs besides its stream.
#[derive(Clone)]
pub struct ConnectionSetup {
    /// Role this process plays.
    pub role: Role,
    /// Packet registry shared by all connections of this process.
    pub registry: Arc<PacketRegistry>,
    /// Inbound packet gate.
    pub authorizer: Arc<dyn Authorizer>,
    /// Directory for transfer spool files.
    pub spool_dir: PathBuf,
    /// Session and backlog bounds.
    pub limits: RouterLimits,
    /// Largest accepted frame payload.
    pub max_frame_length: usize,
    /// Period of the stalled-transfer sweep, independent of traffic.
    pub purge_interval: Duration,
}

impl ConnectionSetup {
    /// Setup with default limits, spooling into the system temp dir.
    #[must_use]
    pub fn new(role: Role, registry: Arc<PacketRegistry>, authorizer: Arc<dyn Authorizer>) -> Self {
        Self {
            role,
            registry,
            authorizer,
            spool_dir: std::env::temp_dir(),
            limits: RouterLimits::default(),
            max_frame_length: MAX_FRAME_LENGTH,
            purge_interval: Duration::from_secs(30),
        }
    }
}

impl Connection {
    /// Split `stream` into a [`Connection`] handle and the driver that reads it.
    ///
    /// Nothing is read until [`ConnectionDriver::run`] is awaited.
    pub fn establish<S>(
        stream: S,
        peer_addr: Option<SocketAddr>,
        setup: ConnectionSetup,
    ) -> (Connection, ConnectionDriver)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let codec = FrameCodec::new(setup.max_frame_length);
        let (read_half, write_half) = tokio::io::split(stream);
        let reader: Reader = FramedRead::new(Box::new(read_half), codec);
        let writer: Writer = FramedWrite::new(Box::new(write_half), codec);
        let conn = Connection {
            inner: Arc::new(ConnectionInner {
                id: ConnectionId::next(),
                peer_addr,
                role: setup.role,
                registry: Arc::clone(&setup.registry),
                writer: Mutex::new(writer),
                account: OnceLock::new(),
                closed: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        };
        let router = TransferRouter::new(setup.spool_dir, setup.limits);
        let driver = ConnectionDriver {
            conn: conn.clone(),
            reader,
            dispatcher: Dispatcher::new(setup.registry, setup.authorizer, router),
            purge_interval: setup.purge_interval,
        };
        (conn, driver)
    }

    /// Connection identifier.
    #[must_use]
    pub fn id(&self) -> ConnectionId { self.inner.id }

    /// Remote address, when known.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> { self.inner.peer_addr }

    /// Role this process plays on the connection.
    #[must_use]
    pub fn role(&self) -> Role { self.inner.role }

    /// Registry used to resolve discriminators.
    #[must_use]
    pub fn registry(&self) -> &Arc<PacketRegistry> { &self.inner.registry }

    /// Account verified by login, if any.
    #[must_use]
    pub fn account(&self) -> Option<&VerifiedAccount> { self.inner.account.get() }

    /// Returns true once an account has been verified.
    #[must_use]
    pub fn is_verified(&self) -> bool { self.inner.account.get().is_some() }

    /// Bind `account` to this connection.
    ///
    /// Returns false if an account was already bound; the first binding wins.
    pub fn verify(&self, account: VerifiedAccount) -> bool { self.inner.account.set(account).is_ok() }

    /// Ask the read loop to stop and cancel background transfers.
    pub fn close(&self) { self.inner.closed.cancel(); }

    /// Returns true after [`close`](Self::close).
    #[must_use]
    pub fn is_closed(&self) -> bool { self.inner.closed.is_cancelled() }

    /// Wait until the connection is closed.
    pub async fn closed(&self) { self.inner.closed.cancelled().await; }

    /// Token cancelled when the connection closes.
    #[must_use]
    pub fn close_token(&self) -> &CancellationToken { &self.inner.closed }

    /// Tracker owning this connection's background tasks.
    #[must_use]
    pub fn tracker(&self) -> &TaskTracker { &self.inner.tracker }

    /// Encode `packet` and write it as one frame.
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] if the kind is not sendable by this role, the
    /// payload cannot be encoded, the write fails or the connection is closed.
    pub async fn send(&self, packet: impl Into<Packet>) -> Result<(), SendError> {
        let packet = packet.into();
        if self.is_closed() {
            return Err(SendError::Closed);
        }
        let kind = packet.kind();
        let descriptor = self
            .inner
            .registry
            .for_send(kind, self.inner.role)
            .ok_or(SendError::Unregistered {
                kind,
                role: self.inner.role,
            })?;
        let frame = Frame::new(descriptor.discriminator(), packet.encode()?);
        let mut writer = self.inner.writer.lock().await;
        writer.send(frame).await?;
        metrics::inc_frames(Direction::Outbound);
        Ok(())
    }

    pub(crate) fn downgrade(&self) -> Weak<ConnectionInner> { Arc::downgrade(&self.inner) }

    pub(crate) fn from_inner(inner: Arc<ConnectionInner>) -> Self { Self { inner } }

    async fn shutdown_writer(&self) {
        let mut writer = self.inner.writer.lock().await;
        if let Err(e) = writer.get_mut().shutdown().await {
            debug!("writer shutdown failed: id={}, error={e}", self.inner.id);
        }
    }
}

/// Owns the read half and the dispatcher of one connection.
pub struct ConnectionDriver {
    conn: Connection,
    reader: Reader,
    dispatcher: Dispatcher,
    purge_interval: Duration,
}

impl ConnectionDriver {
    /// The connection this driver reads.
    #[must_use]
    pub fn connection(&self) -> &Connection { &self.conn }

    /// Read and dispatch frames until EOF, a stream error or [`Connection::close`].
    ///
    /// Every exit path releases unfinished transfers, cancels background tasks
    /// and shuts the write half down.
    ///
    /// # Errors
    ///
    /// Returns the [`CodecError`] that ended the stream, if any.
    pub async fn run(mut self) -> Result<(), CodecError> {
        let conn = self.conn.clone();
        let period = self.purge_interval.max(Duration::from_millis(1));
        let mut sweep = time::interval_at(time::Instant::now() + period, period);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let result = loop {
            let next = tokio::select! {
                biased;
                () = conn.closed() => break Ok(()),
                _ = sweep.tick() => {
                    let purged = self.dispatcher.purge_expired();
                    if purged > 0 {
                        debug!("purged {purged} stalled transfers: id={}", conn.id());
                    }
                    continue;
                }
                next = self.reader.next() => next,
            };
            match next {
                Some(Ok(frame)) => {
                    metrics::inc_frames(Direction::Inbound);
                    if self.dispatcher.dispatch(frame, &conn).await == Dispatch::Rejected {
                        info!("closing connection after rejected packet: id={}, peer_addr={:?}", conn.id(), conn.peer_addr());
                        break Ok(());
                    }
                }
                Some(Err(e)) if e.is_clean_close() => break Ok(()),
                Some(Err(e)) => {
                    metrics::inc_errors();
                    warn!("connection stream failed: id={}, peer_addr={:?}, error={e}", conn.id(), conn.peer_addr());
                    break Err(e);
                }
                None => break Ok(()),
            }
        };
        self.dispatcher.clear();
        conn.close();
        conn.tracker().close();
        conn.shutdown_writer().await;
        debug!("connection finished: id={}, peer_addr={:?}", conn.id(), conn.peer_addr());
        result
    }
}

#[cfg(test)]
mod tests;
