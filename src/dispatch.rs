//! Inbound frame dispatch.
//!
//! Each frame is resolved against the registry, decoded, checked by the
//! connection's [`Authorizer`], then handed either to the transfer router or to
//! the registered packet handler.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::{
    auth::Authorizer,
    codec::Frame,
    connection::Connection,
    handler::Route,
    metrics,
    packet::{Packet, PacketKind},
    registry::PacketRegistry,
    transfer::{TransferEvent, TransferRouter},
};

/// Consecutive undecodable payloads tolerated before the connection is closed.
pub const MAX_DECODE_FAILURES: u32 = 10;

/// Outcome of dispatching one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// The packet reached a handler or the transfer router.
    Handled,
    /// The frame was discarded; the connection stays open.
    Dropped,
    /// The connection must be closed without a response.
    Rejected,
}

/// Per-connection dispatcher, owned by the read loop.
pub struct Dispatcher {
    registry: Arc<PacketRegistry>,
    authorizer: Arc<dyn Authorizer>,
    router: TransferRouter,
    decode_failures: u32,
}

impl Dispatcher {
    /// Create a dispatcher for one connection.
    #[must_use]
    pub fn new(
        registry: Arc<PacketRegistry>,
        authorizer: Arc<dyn Authorizer>,
        router: TransferRouter,
    ) -> Self {
        Self {
            registry,
            authorizer,
            router,
            decode_failures: 0,
        }
    }

    /// The connection's transfer router.
    #[must_use]
    pub fn router(&self) -> &TransferRouter { &self.router }

    /// Evict stalled transfers.
    pub fn purge_expired(&mut self) -> usize { self.router.purge_expired() }

    /// Release every unfinished transfer.
    pub fn clear(&mut self) { self.router.clear(); }

    /// Dispatch one inbound frame.
    pub async fn dispatch(&mut self, frame: Frame, conn: &Connection) -> Dispatch {
        let registry = Arc::clone(&self.registry);
        let discriminator = frame.discriminator();
        let Some(descriptor) = registry.by_discriminator(discriminator) else {
            warn!(discriminator, peer_addr = ?conn.peer_addr(), "unknown packet discriminator");
            return Dispatch::Dropped;
        };

        let packet = match Packet::decode(descriptor.kind(), frame.into_payload()) {
            Ok(packet) => {
                self.decode_failures = 0;
                packet
            }
            Err(e) => {
                metrics::inc_errors();
                self.decode_failures += 1;
                warn!(
                    kind = %descriptor.kind(),
                    failures = self.decode_failures,
                    error = %e,
                    "failed to decode packet"
                );
                if self.decode_failures >= MAX_DECODE_FAILURES {
                    error!(peer_addr = ?conn.peer_addr(), "too many undecodable packets; closing connection");
                    return Dispatch::Rejected;
                }
                return Dispatch::Dropped;
            }
        };

        if !self.authorizer.authorize(conn, &packet) {
            warn!(kind = %packet.kind(), peer_addr = ?conn.peer_addr(), "unauthorized packet");
            return Dispatch::Rejected;
        }

        if !descriptor.received_by(conn.role()) {
            warn!(kind = %packet.kind(), role = %conn.role(), "packet not addressed to this role");
            return Dispatch::Dropped;
        }

        if descriptor.is_transfer_control() {
            for event in self.router.route(packet) {
                handle_event(&registry, event, conn).await;
            }
            return Dispatch::Handled;
        }

        match descriptor.route() {
            Route::Packet(handler) => {
                let kind = packet.kind();
                match handler.handle(packet, conn).await {
                    Ok(Some(response)) => respond(conn, response).await,
                    Ok(None) => {}
                    Err(e) => {
                        metrics::inc_errors();
                        warn!(kind = %kind, error = %e, "packet handler failed");
                    }
                }
                Dispatch::Handled
            }
            Route::Transfer(_) | Route::Unhandled => {
                debug!(kind = %packet.kind(), "no handler registered; packet dropped");
                Dispatch::Dropped
            }
        }
    }
}

async fn handle_event(registry: &PacketRegistry, event: TransferEvent, conn: &Connection) {
    let route_for = |kind| {
        registry
            .for_receive(kind, conn.role())
            .map(|d| d.route().clone())
            .unwrap_or_default()
    };
    match event {
        TransferEvent::Completed(transfer) => {
            let Route::Transfer(handler) = route_for(PacketKind::FileStreamClose) else {
                debug!(name = %transfer.start.name, "completed transfer has no handler; discarded");
                return;
            };
            let name = transfer.start.name.clone();
            match handler.on_complete(transfer, conn).await {
                Ok(Some(response)) => respond(conn, response).await,
                Ok(None) => {}
                Err(e) => {
                    metrics::inc_errors();
                    warn!(name = %name, error = %e, "transfer completion handler failed");
                }
            }
        }
        TransferEvent::Terminated { name, transfer_id } => {
            if let Route::Transfer(handler) = route_for(PacketKind::TerminateFileStream)
                && let Err(e) = handler.on_terminate(&name, transfer_id, conn).await
            {
                warn!(name = %name, error = %e, "terminate handler failed");
            }
        }
        TransferEvent::Failed { .. } => {}
    }
}

async fn respond(conn: &Connection, response: Packet) {
    let kind = response.kind();
    if let Err(e) = conn.send(response).await {
        metrics::inc_errors();
        warn!(kind = %kind, error = %e, "failed to send response");
    }
}
