//! Packet registry: discriminator assignment and handler lookup.
//!
//! Discriminators are assigned sequentially in registration order, so both
//! peers must register the same kinds in the same order.
//! [`PacketRegistry::standard`] is the canonical protocol order.

use std::{fmt, sync::Arc};

use thiserror::Error;

use crate::{
    handler::{PacketHandler, Route, TransferHandler},
    packet::PacketKind,
};

/// Which end of a connection a process plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// Initiates the connection.
    Client,
    /// Accepts connections.
    Server,
}

impl Role {
    /// The role at the other end of the connection.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Client => Self::Server,
            Self::Server => Self::Client,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Client => "client",
            Self::Server => "server",
        })
    }
}

/// Errors raised while building a registry.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Every one-byte discriminator is already taken.
    #[error("packet registry exhausted after {registered} registrations")]
    Exhausted {
        /// Registrations already present.
        registered: usize,
    },
}

/// One registered packet kind.
#[derive(Clone, Debug)]
pub struct PacketDescriptor {
    discriminator: u8,
    kind: PacketKind,
    route: Route,
    receiving_role: Option<Role>,
    transfer_control: bool,
}

impl PacketDescriptor {
    /// Wire discriminator.
    #[must_use]
    pub const fn discriminator(&self) -> u8 { self.discriminator }

    /// Packet kind.
    #[must_use]
    pub const fn kind(&self) -> PacketKind { self.kind }

    /// Handler bound to this descriptor.
    #[must_use]
    pub fn route(&self) -> &Route { &self.route }

    /// Role that receives this packet; `None` means either end.
    #[must_use]
    pub const fn receiving_role(&self) -> Option<Role> { self.receiving_role }

    /// Returns true for packets routed to the transfer router.
    #[must_use]
    pub const fn is_transfer_control(&self) -> bool { self.transfer_control }

    /// Returns true when a process playing `role` may receive this packet.
    #[must_use]
    pub fn received_by(&self, role: Role) -> bool {
        self.receiving_role.is_none_or(|r| r == role)
    }
}

/// Handlers plugged into [`PacketRegistry::standard`].
///
/// A process only needs handlers for the packets its role receives.
#[derive(Clone, Default)]
pub struct ProtocolHandlers {
    /// Completion and terminate handler for inbound transfers.
    pub transfers: Option<Arc<dyn TransferHandler>>,
    /// Info log handler.
    pub info_log: Option<Arc<dyn PacketHandler>>,
    /// Login handler (server).
    pub login: Option<Arc<dyn PacketHandler>>,
    /// Account id assignment handler (client).
    pub account_assignment: Option<Arc<dyn PacketHandler>>,
    /// Download request handler (server).
    pub download: Option<Arc<dyn PacketHandler>>,
    /// Files list handler (server).
    pub files_list: Option<Arc<dyn PacketHandler>>,
    /// Shared files handler (server).
    pub view_shared_files: Option<Arc<dyn PacketHandler>>,
}

impl ProtocolHandlers {
    fn route(&self, slot: Slot) -> Route {
        match slot {
            Slot::Unhandled => Route::Unhandled,
            Slot::Transfers => Route::transfer(self.transfers.clone()),
            Slot::InfoLog => Route::packet(self.info_log.clone()),
            Slot::Login => Route::packet(self.login.clone()),
            Slot::AccountAssignment => Route::packet(self.account_assignment.clone()),
            Slot::Download => Route::packet(self.download.clone()),
            Slot::FilesList => Route::packet(self.files_list.clone()),
            Slot::ViewSharedFiles => Route::packet(self.view_shared_files.clone()),
        }
    }
}

/// [`ProtocolHandlers`] field a standard descriptor takes its route from.
#[derive(Clone, Copy, Debug)]
enum Slot {
    Unhandled,
    Transfers,
    InfoLog,
    Login,
    AccountAssignment,
    Download,
    FilesList,
    ViewSharedFiles,
}

/// Canonical protocol order: kind, handler, receiving role, transfer control.
const STANDARD_ORDER: [(PacketKind, Slot, Option<Role>, bool); 13] = [
    (PacketKind::FileStreamStart, Slot::Unhandled, None, true),
    (PacketKind::FileFragment, Slot::Unhandled, None, true),
    (PacketKind::FileStreamClose, Slot::Transfers, Some(Role::Client), true),
    (PacketKind::FileStreamClose, Slot::Transfers, Some(Role::Server), true),
    (PacketKind::TerminateFileStream, Slot::Transfers, Some(Role::Client), true),
    (PacketKind::TerminateFileStream, Slot::Transfers, Some(Role::Server), true),
    (PacketKind::InfoLog, Slot::InfoLog, Some(Role::Client), false),
    (PacketKind::InfoLog, Slot::InfoLog, Some(Role::Server), false),
    (PacketKind::Login, Slot::Login, Some(Role::Server), false),
    (PacketKind::AccountIdAssignment, Slot::AccountAssignment, Some(Role::Client), false),
    (PacketKind::DownloadRequest, Slot::Download, Some(Role::Server), false),
    (PacketKind::FilesListRequest, Slot::FilesList, Some(Role::Server), false),
    (PacketKind::ViewSharedFilesRequest, Slot::ViewSharedFiles, Some(Role::Server), false),
];

/// Ordered table of packet descriptors.
#[derive(Clone, Debug, Default)]
pub struct PacketRegistry {
    descriptors: Vec<PacketDescriptor>,
}

impl PacketRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Build the registry in canonical protocol order.
    #[must_use]
    pub fn standard(handlers: ProtocolHandlers) -> Self {
        let descriptors = STANDARD_ORDER
            .iter()
            .zip(0u8..)
            .map(|(&(kind, slot, receiving_role, transfer_control), discriminator)| PacketDescriptor {
                discriminator,
                kind,
                route: handlers.route(slot),
                receiving_role,
                transfer_control,
            })
            .collect();
        Self { descriptors }
    }

    fn push(
        &mut self,
        kind: PacketKind,
        route: Route,
        receiving_role: Option<Role>,
        transfer_control: bool,
    ) -> Result<u8, RegistryError> {
        let registered = self.descriptors.len();
        let discriminator = u8::try_from(registered).map_err(|_| RegistryError::Exhausted { registered })?;
        self.descriptors.push(PacketDescriptor {
            discriminator,
            kind,
            route,
            receiving_role,
            transfer_control,
        });
        Ok(discriminator)
    }

    /// Register `kind` received by `role` (`None` for either end).
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Exhausted`] after 256 registrations.
    pub fn register(&mut self, kind: PacketKind, route: Route, role: Option<Role>) -> Result<u8, RegistryError> {
        self.push(kind, route, role, false)
    }

    /// Register `kind` once per role, client first.
    ///
    /// The server descriptor reuses `client` when `server` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Exhausted`] after 256 registrations.
    pub fn register_bidirectional(
        &mut self,
        kind: PacketKind,
        client: Route,
        server: Option<Route>,
    ) -> Result<(u8, u8), RegistryError> {
        let server = server.unwrap_or_else(|| client.clone());
        let first = self.register(kind, client, Some(Role::Client))?;
        let second = self.register(kind, server, Some(Role::Server))?;
        Ok((first, second))
    }

    /// Register a transfer-control `kind` routed to the transfer router.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Exhausted`] after 256 registrations.
    pub fn register_transfer_control(
        &mut self,
        kind: PacketKind,
        route: Route,
        role: Option<Role>,
    ) -> Result<u8, RegistryError> {
        self.push(kind, route, role, true)
    }

    /// Descriptor for an inbound discriminator.
    #[must_use]
    pub fn by_discriminator(&self, discriminator: u8) -> Option<&PacketDescriptor> {
        self.descriptors.get(usize::from(discriminator))
    }

    /// Descriptor used to send `kind` from a process playing `local`.
    #[must_use]
    pub fn for_send(&self, kind: PacketKind, local: Role) -> Option<&PacketDescriptor> {
        self.lookup(kind, local.opposite())
    }

    /// Descriptor used when a process playing `local` receives `kind`.
    #[must_use]
    pub fn for_receive(&self, kind: PacketKind, local: Role) -> Option<&PacketDescriptor> {
        self.lookup(kind, local)
    }

    fn lookup(&self, kind: PacketKind, receiver: Role) -> Option<&PacketDescriptor> {
        self.descriptors
            .iter()
            .find(|d| d.kind == kind && d.received_by(receiver))
    }

    /// Number of registered descriptors.
    #[must_use]
    pub fn len(&self) -> usize { self.descriptors.len() }

    /// Returns true when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.descriptors.is_empty() }

    /// Iterate descriptors in discriminator order.
    pub fn iter(&self) -> impl Iterator<Item = &PacketDescriptor> { self.descriptors.iter() }
}
