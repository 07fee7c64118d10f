//! Packet handlers installed by [`FileClient`](super::FileClient).

use std::{io, sync::Arc};

use async_trait::async_trait;
use tracing::{info, warn};

use super::{ClientEvent, ClientShared};
use crate::{
    connection::Connection,
    handler::{HandlerError, PacketHandler, TransferHandler},
    packet::{Packet, TransferId},
    registry::ProtocolHandlers,
    transfer::{CompletedTransfer, safe_file_name},
};

pub(super) fn protocol_handlers(shared: &Arc<ClientShared>) -> ProtocolHandlers {
    ProtocolHandlers {
        transfers: Some(Arc::new(DownloadSink(Arc::clone(shared)))),
        info_log: Some(Arc::new(InfoLogHandler(Arc::clone(shared)))),
        account_assignment: Some(Arc::new(AccountAssignmentHandler(Arc::clone(shared)))),
        ..ProtocolHandlers::default()
    }
}

struct InfoLogHandler(Arc<ClientShared>);

#[async_trait]
impl PacketHandler for InfoLogHandler {
    async fn handle(&self, packet: Packet, _conn: &Connection) -> Result<Option<Packet>, HandlerError> {
        let Packet::InfoLog(log) = packet else {
            return Err(HandlerError::Unexpected(packet.kind()));
        };
        info!(message = %log.message, "server message");
        self.0.emit(ClientEvent::Info(log.message));
        Ok(None)
    }
}

struct AccountAssignmentHandler(Arc<ClientShared>);

#[async_trait]
impl PacketHandler for AccountAssignmentHandler {
    async fn handle(&self, packet: Packet, _conn: &Connection) -> Result<Option<Packet>, HandlerError> {
        let Packet::AccountIdAssignment(assignment) = packet else {
            return Err(HandlerError::Unexpected(packet.kind()));
        };
        info!(account_id = assignment.account_id, "account id assigned");
        if let Err(e) = self.0.assign_account(assignment.account_id) {
            warn!(error = %e, "failed to persist account id");
        }
        self.0.emit(ClientEvent::AccountAssigned(assignment.account_id));
        Ok(None)
    }
}

/// Writes completed downloads into the downloads directory.
struct DownloadSink(Arc<ClientShared>);

#[async_trait]
impl TransferHandler for DownloadSink {
    async fn on_complete(
        &self,
        transfer: CompletedTransfer,
        _conn: &Connection,
    ) -> Result<Option<Packet>, HandlerError> {
        let CompletedTransfer { start, file } = transfer;
        let Some(name) = safe_file_name(&start.name) else {
            warn!(name = %start.name, "download has no usable file name; discarded");
            return Ok(None);
        };
        let path = self.0.downloads_dir().join(&name);
        let bytes = file.len();
        let target = path.clone();
        tokio::task::spawn_blocking(move || file.persist_to(&target))
            .await
            .map_err(io::Error::other)??;
        info!(name = %name, bytes, path = %path.display(), "download stored");
        self.0.emit(ClientEvent::Downloaded { name, path, bytes });
        Ok(None)
    }

    async fn on_terminate(
        &self,
        name: &str,
        transfer_id: TransferId,
        _conn: &Connection,
    ) -> Result<(), HandlerError> {
        warn!(name, transfer_id = %transfer_id, "download aborted by server");
        self.0.emit(ClientEvent::Aborted {
            name: name.to_owned(),
            transfer_id,
        });
        Ok(())
    }
}
