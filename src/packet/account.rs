//! Session packets: login, account assignment, requests and log lines.

use bytes::{BufMut, Bytes, BytesMut};

use super::{PacketKind, Payload};
use crate::wire::{self, DecodeError, EncodeError};

/// Version sent in [`Login`]; the server hints at an upgrade on mismatch.
pub const PROTOCOL_VERSION: i16 = 1;

/// Length of the salted password hash carried by [`Login`].
pub const PASSWORD_HASH_LEN: usize = 32;

/// Account id a client sends before one has been assigned.
pub const NEW_ACCOUNT: i32 = -1;

/// Client login request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Login {
    /// Previously assigned account id, or [`NEW_ACCOUNT`].
    pub account_id: i32,
    /// Account username.
    pub username: String,
    /// Client-side salted password hash.
    pub password_hash: [u8; PASSWORD_HASH_LEN],
    /// Client protocol version.
    pub version: i16,
}

/// Server-assigned account id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccountIdAssignment {
    /// Account id the client should use from now on.
    pub account_id: i32,
}

/// Request to download a stored file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadRequest {
    /// Stored file name.
    pub file: String,
    /// Requesting account.
    pub account_id: i32,
}

/// Request for the list of stored files.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FilesListRequest;

/// Request for files other accounts shared with this one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ViewSharedFilesRequest {
    /// Requesting account.
    pub account_id: i32,
}

/// Human-readable message for the peer's operator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InfoLog {
    /// Message text.
    pub message: String,
}

impl InfoLog {
    /// Convenience constructor.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Payload for Login {
    const KIND: PacketKind = PacketKind::Login;

    fn encode(&self, dst: &mut BytesMut) -> Result<(), EncodeError> {
        dst.put_i32(self.account_id);
        wire::put_string(dst, "username", &self.username)?;
        dst.extend_from_slice(&self.password_hash);
        dst.put_i16(self.version);
        Ok(())
    }

    fn decode(src: &mut Bytes) -> Result<Self, DecodeError> {
        let account_id = wire::get_i32(src, "account_id")?;
        let username = wire::get_string(src, "username")?;
        let raw = wire::get_bytes(src, "password_hash", PASSWORD_HASH_LEN)?;
        let mut password_hash = [0u8; PASSWORD_HASH_LEN];
        password_hash.copy_from_slice(&raw);
        let version = wire::get_i16(src, "version")?;
        Ok(Self {
            account_id,
            username,
            password_hash,
            version,
        })
    }
}

impl Payload for AccountIdAssignment {
    const KIND: PacketKind = PacketKind::AccountIdAssignment;

    fn encode(&self, dst: &mut BytesMut) -> Result<(), EncodeError> {
        dst.put_i32(self.account_id);
        Ok(())
    }

    fn decode(src: &mut Bytes) -> Result<Self, DecodeError> {
        Ok(Self {
            account_id: wire::get_i32(src, "account_id")?,
        })
    }
}

impl Payload for DownloadRequest {
    const KIND: PacketKind = PacketKind::DownloadRequest;

    fn encode(&self, dst: &mut BytesMut) -> Result<(), EncodeError> {
        wire::put_string(dst, "file", &self.file)?;
        dst.put_i32(self.account_id);
        Ok(())
    }

    fn decode(src: &mut Bytes) -> Result<Self, DecodeError> {
        Ok(Self {
            file: wire::get_string(src, "file")?,
            account_id: wire::get_i32(src, "account_id")?,
        })
    }
}

impl Payload for FilesListRequest {
    const KIND: PacketKind = PacketKind::FilesListRequest;

    fn encode(&self, _dst: &mut BytesMut) -> Result<(), EncodeError> { Ok(()) }

    fn decode(_src: &mut Bytes) -> Result<Self, DecodeError> { Ok(Self) }
}

impl Payload for ViewSharedFilesRequest {
    const KIND: PacketKind = PacketKind::ViewSharedFilesRequest;

    fn encode(&self, dst: &mut BytesMut) -> Result<(), EncodeError> {
        dst.put_i32(self.account_id);
        Ok(())
    }

    fn decode(src: &mut Bytes) -> Result<Self, DecodeError> {
        Ok(Self {
            account_id: wire::get_i32(src, "account_id")?,
        })
    }
}

impl Payload for InfoLog {
    const KIND: PacketKind = PacketKind::InfoLog;

    fn encode(&self, dst: &mut BytesMut) -> Result<(), EncodeError> {
        wire::put_string(dst, "message", &self.message)
    }

    fn decode(src: &mut Bytes) -> Result<Self, DecodeError> {
        Ok(Self {
            message: wire::get_string(src, "message")?,
        })
    }
}
