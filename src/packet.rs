//! Packet model: a closed sum type over every kind the protocol carries.
//!
//! Each payload type implements [`Payload`], which pairs it with its
//! [`PacketKind`] and its field encoding. [`Packet`] wraps them so that the
//! registry and dispatcher can treat packets uniformly.

use bytes::{Bytes, BytesMut};

mod account;
mod metadata;
mod transfer;

pub use account::{
    AccountIdAssignment,
    DownloadRequest,
    FilesListRequest,
    InfoLog,
    Login,
    NEW_ACCOUNT,
    PASSWORD_HASH_LEN,
    PROTOCOL_VERSION,
    ViewSharedFilesRequest,
};
pub use metadata::{MetaValue, StreamMetadata, keys};
pub use transfer::{
    FileFragment,
    FileStreamClose,
    FileStreamStart,
    TerminateFileStream,
    TransferControl,
    TransferId,
};

use crate::wire::{DecodeError, EncodeError};

/// Field-less tag for each packet kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PacketKind {
    FileStreamStart,
    FileFragment,
    FileStreamClose,
    TerminateFileStream,
    InfoLog,
    Login,
    AccountIdAssignment,
    DownloadRequest,
    FilesListRequest,
    ViewSharedFilesRequest,
}

impl PacketKind {
    /// Stable name used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FileStreamStart => "file_stream_start",
            Self::FileFragment => "file_fragment",
            Self::FileStreamClose => "file_stream_close",
            Self::TerminateFileStream => "terminate_file_stream",
            Self::InfoLog => "info_log",
            Self::Login => "login",
            Self::AccountIdAssignment => "account_id_assignment",
            Self::DownloadRequest => "download_request",
            Self::FilesListRequest => "files_list_request",
            Self::ViewSharedFilesRequest => "view_shared_files_request",
        }
    }
}

impl std::fmt::Display for PacketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

/// Field encoding of a single packet payload.
pub trait Payload: Sized + Into<Packet> {
    /// Kind tag of this payload.
    const KIND: PacketKind;

    /// Append the payload fields to `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError`] when a field cannot be represented on the wire.
    fn encode(&self, dst: &mut BytesMut) -> Result<(), EncodeError>;

    /// Decode the payload fields from `src`. Trailing bytes are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] when the payload is truncated or malformed.
    fn decode(src: &mut Bytes) -> Result<Self, DecodeError>;
}

/// A decoded packet of any kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Packet {
    FileStreamStart(FileStreamStart),
    FileFragment(FileFragment),
    FileStreamClose(FileStreamClose),
    TerminateFileStream(TerminateFileStream),
    InfoLog(InfoLog),
    Login(Login),
    AccountIdAssignment(AccountIdAssignment),
    DownloadRequest(DownloadRequest),
    FilesListRequest(FilesListRequest),
    ViewSharedFilesRequest(ViewSharedFilesRequest),
}

macro_rules! packet_variants {
    ($($variant:ident),+ $(,)?) => {
        $(impl From<$variant> for Packet {
            fn from(value: $variant) -> Self { Self::$variant(value) }
        })+

        impl Packet {
            /// Kind tag of this packet.
            #[must_use]
            pub const fn kind(&self) -> PacketKind {
                match self {
                    $(Self::$variant(_) => PacketKind::$variant,)+
                }
            }

            /// Encode the payload fields (without the frame header).
            ///
            /// # Errors
            ///
            /// Returns [`EncodeError`] when a field cannot be represented.
            pub fn encode(&self) -> Result<Bytes, EncodeError> {
                let mut dst = BytesMut::new();
                match self {
                    $(Self::$variant(p) => p.encode(&mut dst)?,)+
                }
                Ok(dst.freeze())
            }

            /// Decode a payload of the given `kind`.
            ///
            /// # Errors
            ///
            /// Returns [`DecodeError`] when the payload is truncated or malformed.
            pub fn decode(kind: PacketKind, mut payload: Bytes) -> Result<Self, DecodeError> {
                match kind {
                    $(PacketKind::$variant => $variant::decode(&mut payload).map(Self::$variant),)+
                }
            }
        }
    };
}

packet_variants!(
    FileStreamStart,
    FileFragment,
    FileStreamClose,
    TerminateFileStream,
    InfoLog,
    Login,
    AccountIdAssignment,
    DownloadRequest,
    FilesListRequest,
    ViewSharedFilesRequest,
);

impl Packet {
    /// Returns true for start, fragment, close and terminate packets.
    #[must_use]
    pub const fn is_transfer_control(&self) -> bool {
        matches!(
            self,
            Self::FileStreamStart(_)
                | Self::FileFragment(_)
                | Self::FileStreamClose(_)
                | Self::TerminateFileStream(_)
        )
    }
}

#[cfg(test)]
mod tests;
