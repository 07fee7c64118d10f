//! Inbound packet authorization.

use crate::{
    connection::Connection,
    packet::{Packet, PacketKind},
};

/// Decides whether an inbound packet may be processed.
///
/// Returning false closes the connection without a response.
pub trait Authorizer: Send + Sync {
    /// Check `packet` received on `conn`.
    fn authorize(&self, conn: &Connection, packet: &Packet) -> bool;
}

/// Accepts every packet. Used by clients.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn authorize(&self, _conn: &Connection, _packet: &Packet) -> bool { true }
}

/// Accepts login always and everything else only on verified connections.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoginGate;

impl Authorizer for LoginGate {
    fn authorize(&self, conn: &Connection, packet: &Packet) -> bool {
        packet.kind() == PacketKind::Login || conn.is_verified()
    }
}
