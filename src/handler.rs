//! Handler traits invoked by the dispatcher.

use std::{fmt, io, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    connection::{Connection, SendError},
    packet::{Packet, TransferId},
    transfer::{CompletedTransfer, TransferError},
};

/// Errors surfaced by handlers. They are logged and never close the connection.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Local file or storage I/O failed.
    #[error("handler I/O failed: {0}")]
    Io(#[from] io::Error),
    /// A response could not be sent.
    #[error("handler response not sent: {0}")]
    Send(#[from] SendError),
    /// An outbound transfer failed.
    #[error("handler transfer failed: {0}")]
    Transfer(#[from] TransferError),
    /// The handler received a packet kind it does not process.
    #[error("unexpected packet {0}")]
    Unexpected(crate::packet::PacketKind),
}

/// Handles a decoded application packet.
#[async_trait]
pub trait PacketHandler: Send + Sync {
    /// Process `packet`; a returned packet is sent back on `conn`.
    async fn handle(&self, packet: Packet, conn: &Connection) -> Result<Option<Packet>, HandlerError>;
}

/// Receives the outcome of inbound transfers.
#[async_trait]
pub trait TransferHandler: Send + Sync {
    /// A transfer closed with every fragment present.
    async fn on_complete(
        &self,
        transfer: CompletedTransfer,
        conn: &Connection,
    ) -> Result<Option<Packet>, HandlerError>;

    /// The peer terminated a transfer. Nothing is sent back.
    async fn on_terminate(
        &self,
        name: &str,
        transfer_id: TransferId,
        conn: &Connection,
    ) -> Result<(), HandlerError> {
        let _ = (name, transfer_id, conn);
        Ok(())
    }
}

/// Handler bound to a packet descriptor.
#[derive(Clone, Default)]
pub enum Route {
    /// No local handler; packets of this kind are dropped.
    #[default]
    Unhandled,
    /// Application packet handler.
    Packet(Arc<dyn PacketHandler>),
    /// Transfer outcome handler for close and terminate descriptors.
    Transfer(Arc<dyn TransferHandler>),
}

impl Route {
    /// Wrap an optional packet handler.
    #[must_use]
    pub fn packet(handler: Option<Arc<dyn PacketHandler>>) -> Self {
        handler.map_or(Self::Unhandled, Self::Packet)
    }

    /// Wrap an optional transfer handler.
    #[must_use]
    pub fn transfer(handler: Option<Arc<dyn TransferHandler>>) -> Self {
        handler.map_or(Self::Unhandled, Self::Transfer)
    }

    /// Returns true when no handler is bound.
    #[must_use]
    pub fn is_unhandled(&self) -> bool { matches!(self, Self::Unhandled) }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unhandled => "Unhandled",
            Self::Packet(_) => "Packet",
            Self::Transfer(_) => "Transfer",
        })
    }
}
