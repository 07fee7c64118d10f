//! Transfer-control packets: start, fragment, close and terminate.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use bytes::{BufMut, Bytes, BytesMut};

use super::{Payload, PacketKind, StreamMetadata};
use crate::wire::{self, DecodeError, EncodeError};

/// Identifier distinguishing concurrent transfers that share a file name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(u64);

static NEXT_TRANSFER_ID: AtomicU64 = AtomicU64::new(1);

impl TransferId {
    /// Wrap a raw identifier.
    #[must_use]
    pub const fn new(id: u64) -> Self { Self(id) }

    /// Allocate a fresh identifier, unique within this process.
    #[must_use]
    pub fn next() -> Self { Self(NEXT_TRANSFER_ID.fetch_add(1, Ordering::Relaxed)) }

    /// Return the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 { self.0 }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// Common identity of every transfer-control packet.
pub trait TransferControl {
    /// File name the transfer is keyed on.
    fn name(&self) -> &str;

    /// Transfer identifier disambiguating same-named transfers.
    fn transfer_id(&self) -> TransferId;

    /// Returns true when `other` refers to the same transfer.
    fn same_transfer(&self, other: &impl TransferControl) -> bool {
        self.transfer_id() == other.transfer_id() && self.name() == other.name()
    }
}

macro_rules! impl_transfer_control {
    ($($ty:ty),+ $(,)?) => {
        $(impl TransferControl for $ty {
            fn name(&self) -> &str { &self.name }

            fn transfer_id(&self) -> TransferId { self.transfer_id }
        })+
    };
}

/// Opens a transfer and declares its shape.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileStreamStart {
    /// Base name of the source file.
    pub name: String,
    /// Free-form label for the source (the sender's path).
    pub label: String,
    /// Transfer identifier.
    pub transfer_id: TransferId,
    /// Number of fragments that will follow.
    pub fragment_count: i32,
    /// Total file length in bytes.
    pub file_length: i64,
    /// Application metadata.
    pub metadata: StreamMetadata,
}

/// One ordinal chunk of a file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileFragment {
    /// Base name of the source file.
    pub name: String,
    /// Transfer identifier.
    pub transfer_id: TransferId,
    /// Zero-based fragment ordinal.
    pub index: i32,
    /// Fragment bytes.
    pub data: Bytes,
}

/// Signals that every fragment has been sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileStreamClose {
    /// Base name of the source file.
    pub name: String,
    /// Transfer identifier.
    pub transfer_id: TransferId,
}

/// Aborts a transfer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TerminateFileStream {
    /// Base name of the source file.
    pub name: String,
    /// Transfer identifier.
    pub transfer_id: TransferId,
}

impl_transfer_control!(FileStreamStart, FileFragment, FileStreamClose, TerminateFileStream);

impl FileStreamClose {
    /// Close token for `control`'s transfer.
    #[must_use]
    pub fn for_transfer(control: &impl TransferControl) -> Self {
        Self {
            name: control.name().to_owned(),
            transfer_id: control.transfer_id(),
        }
    }
}

impl TerminateFileStream {
    /// Terminate request for `control`'s transfer.
    #[must_use]
    pub fn for_transfer(control: &impl TransferControl) -> Self {
        Self {
            name: control.name().to_owned(),
            transfer_id: control.transfer_id(),
        }
    }
}

impl Payload for FileStreamStart {
    const KIND: PacketKind = PacketKind::FileStreamStart;

    fn encode(&self, dst: &mut BytesMut) -> Result<(), EncodeError> {
        wire::put_string(dst, "name", &self.name)?;
        wire::put_string(dst, "label", &self.label)?;
        dst.put_u64(self.transfer_id.as_u64());
        dst.put_i32(self.fragment_count);
        dst.put_i64(self.file_length);
        self.metadata.encode_into(dst)
    }

    fn decode(src: &mut Bytes) -> Result<Self, DecodeError> {
        let name = wire::get_string(src, "name")?;
        let label = wire::get_string(src, "label")?;
        let transfer_id = TransferId::new(wire::get_u64(src, "transfer_id")?);
        let fragment_count = wire::get_i32(src, "fragment_count")?;
        if fragment_count < 0 {
            return Err(DecodeError::InvalidValue {
                field: "fragment_count",
                value: i64::from(fragment_count),
            });
        }
        let file_length = wire::get_i64(src, "file_length")?;
        let metadata = StreamMetadata::decode_from(src)?;
        Ok(Self {
            name,
            label,
            transfer_id,
            fragment_count,
            file_length,
            metadata,
        })
    }
}

impl Payload for FileFragment {
    const KIND: PacketKind = PacketKind::FileFragment;

    fn encode(&self, dst: &mut BytesMut) -> Result<(), EncodeError> {
        let len = i32::try_from(self.data.len()).map_err(|_| EncodeError::TooLong {
            field: "data",
            len: self.data.len(),
        })?;
        wire::put_string(dst, "name", &self.name)?;
        dst.put_u64(self.transfer_id.as_u64());
        dst.put_i32(self.index);
        dst.put_i32(len);
        dst.extend_from_slice(&self.data);
        Ok(())
    }

    fn decode(src: &mut Bytes) -> Result<Self, DecodeError> {
        let name = wire::get_string(src, "name")?;
        let transfer_id = TransferId::new(wire::get_u64(src, "transfer_id")?);
        let index = wire::get_i32(src, "index")?;
        let len = wire::get_i32(src, "length")?;
        let len = usize::try_from(len).map_err(|_| DecodeError::InvalidValue {
            field: "length",
            value: i64::from(len),
        })?;
        let data = wire::get_bytes(src, "data", len)?;
        Ok(Self {
            name,
            transfer_id,
            index,
            data,
        })
    }
}

impl Payload for FileStreamClose {
    const KIND: PacketKind = PacketKind::FileStreamClose;

    fn encode(&self, dst: &mut BytesMut) -> Result<(), EncodeError> {
        wire::put_string(dst, "name", &self.name)?;
        dst.put_u64(self.transfer_id.as_u64());
        Ok(())
    }

    fn decode(src: &mut Bytes) -> Result<Self, DecodeError> {
        Ok(Self {
            name: wire::get_string(src, "name")?,
            transfer_id: TransferId::new(wire::get_u64(src, "transfer_id")?),
        })
    }
}

impl Payload for TerminateFileStream {
    const KIND: PacketKind = PacketKind::TerminateFileStream;

    fn encode(&self, dst: &mut BytesMut) -> Result<(), EncodeError> {
        wire::put_string(dst, "name", &self.name)?;
        dst.put_u64(self.transfer_id.as_u64());
        Ok(())
    }

    fn decode(src: &mut Bytes) -> Result<Self, DecodeError> {
        Ok(Self {
            name: wire::get_string(src, "name")?,
            transfer_id: TransferId::new(wire::get_u64(src, "transfer_id")?),
        })
    }
}
