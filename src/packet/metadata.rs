//! Free-form key/value bag carried by a stream start packet.

use std::collections::BTreeMap;

use bincode::config;
use bytes::BytesMut;

use crate::wire::{DecodeError, EncodeError};

/// Well-known metadata keys.
pub mod keys {
    /// Overrides the stored file name on the receiving side.
    pub const FILE_OUT: &str = "file_out";
    /// Marks an upload as shared with the accounts in [`DOWNLOADERS`].
    pub const SHARED: &str = "shared";
    /// Usernames allowed to download a shared upload.
    pub const DOWNLOADERS: &str = "downloaders";
}

/// A single metadata value.
#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub enum MetaValue {
    /// UTF-8 text.
    Text(String),
    /// Boolean flag.
    Flag(bool),
    /// Signed integer.
    Int(i64),
    /// List of strings.
    TextList(Vec<String>),
}

/// Ordered metadata bag.
///
/// An empty bag occupies zero bytes on the wire; a non-empty bag is the
/// `bincode` standard encoding of its entries.
#[derive(Clone, Debug, Default, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct StreamMetadata {
    entries: BTreeMap<String, MetaValue>,
}

impl StreamMetadata {
    /// Create an empty bag.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Returns true when the bag has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize { self.entries.len() }

    /// Insert or replace `key`.
    pub fn insert(&mut self, key: impl Into<String>, value: MetaValue) -> &mut Self {
        self.entries.insert(key.into(), value);
        self
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: MetaValue) -> Self {
        self.insert(key, value);
        self
    }

    /// Look up a raw value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&MetaValue> { self.entries.get(key) }

    /// Text value for `key`, if present and textual.
    #[must_use]
    pub fn text(&self, key: &str) -> Option<&str> {
        match self.entries.get(key) {
            Some(MetaValue::Text(value)) => Some(value),
            _ => None,
        }
    }

    /// Flag value for `key`; absent or non-flag values read as `false`.
    #[must_use]
    pub fn flag(&self, key: &str) -> bool {
        matches!(self.entries.get(key), Some(MetaValue::Flag(true)))
    }

    /// String list for `key`; absent or non-list values read as empty.
    #[must_use]
    pub fn text_list(&self, key: &str) -> &[String] {
        match self.entries.get(key) {
            Some(MetaValue::TextList(values)) => values,
            _ => &[],
        }
    }

    pub(crate) fn encode_into(&self, dst: &mut BytesMut) -> Result<(), EncodeError> {
        if self.is_empty() {
            return Ok(());
        }
        let bytes = bincode::encode_to_vec(self, config::standard())
            .map_err(|e| EncodeError::Metadata(e.to_string()))?;
        dst.extend_from_slice(&bytes);
        Ok(())
    }

    pub(crate) fn decode_from(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }
        let (metadata, _) = bincode::decode_from_slice(bytes, config::standard())
            .map_err(|e| DecodeError::Metadata(e.to_string()))?;
        Ok(metadata)
    }
}
