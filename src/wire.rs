//! Primitive field encoding shared by every packet payload.
//!
//! Integers are big-endian. Strings are UTF-8 terminated by a single NUL byte,
//! so they may not contain NUL themselves.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Errors raised while decoding a packet payload.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The payload ended before a field was complete.
    #[error("payload truncated reading {field}: need {needed} bytes, have {remaining}")]
    Truncated {
        /// Field being read.
        field: &'static str,
        /// Bytes required by the field.
        needed: usize,
        /// Bytes left in the payload.
        remaining: usize,
    },
    /// A string field was not terminated before the end of the payload.
    #[error("unterminated string in {field}")]
    UnterminatedString {
        /// Field being read.
        field: &'static str,
    },
    /// A string field was not valid UTF-8.
    #[error("invalid UTF-8 in {field}")]
    InvalidUtf8 {
        /// Field being read.
        field: &'static str,
    },
    /// A numeric field held a value outside its domain.
    #[error("invalid value {value} for {field}")]
    InvalidValue {
        /// Field being read.
        field: &'static str,
        /// Offending value.
        value: i64,
    },
    /// The metadata bag could not be decoded.
    #[error("invalid metadata: {0}")]
    Metadata(String),
}

/// Errors raised while encoding a packet payload.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    /// A string field contains an interior NUL byte.
    #[error("string field {field} contains a NUL byte")]
    InteriorNul {
        /// Field being written.
        field: &'static str,
    },
    /// A length does not fit the field's integer width.
    #[error("{field} length {len} does not fit the wire field")]
    TooLong {
        /// Field being written.
        field: &'static str,
        /// Offending length.
        len: usize,
    },
    /// The metadata bag could not be encoded.
    #[error("metadata encoding failed: {0}")]
    Metadata(String),
}

/// Write `value` followed by a NUL terminator.
///
/// # Errors
///
/// Returns [`EncodeError::InteriorNul`] if `value` contains a NUL byte.
pub fn put_string(dst: &mut BytesMut, field: &'static str, value: &str) -> Result<(), EncodeError> {
    if value.as_bytes().contains(&0) {
        return Err(EncodeError::InteriorNul { field });
    }
    dst.reserve(value.len() + 1);
    dst.extend_from_slice(value.as_bytes());
    dst.put_u8(0);
    Ok(())
}

/// Read a NUL-terminated UTF-8 string.
///
/// # Errors
///
/// Returns [`DecodeError`] if no terminator is found or the bytes are not
/// UTF-8.
pub fn get_string(src: &mut Bytes, field: &'static str) -> Result<String, DecodeError> {
    let end = src
        .iter()
        .position(|b| *b == 0)
        .ok_or(DecodeError::UnterminatedString { field })?;
    let raw = src.split_to(end);
    src.advance(1);
    String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::InvalidUtf8 { field })
}

fn ensure(src: &Bytes, field: &'static str, needed: usize) -> Result<(), DecodeError> {
    if src.remaining() < needed {
        return Err(DecodeError::Truncated {
            field,
            needed,
            remaining: src.remaining(),
        });
    }
    Ok(())
}

/// Read a big-endian `i16`.
///
/// # Errors
///
/// Returns [`DecodeError::Truncated`] if fewer than 2 bytes remain.
pub fn get_i16(src: &mut Bytes, field: &'static str) -> Result<i16, DecodeError> {
    ensure(src, field, 2)?;
    Ok(src.get_i16())
}

/// Read a big-endian `i32`.
///
/// # Errors
///
/// Returns [`DecodeError::Truncated`] if fewer than 4 bytes remain.
pub fn get_i32(src: &mut Bytes, field: &'static str) -> Result<i32, DecodeError> {
    ensure(src, field, 4)?;
    Ok(src.get_i32())
}

/// Read a big-endian `i64`.
///
/// # Errors
///
/// Returns [`DecodeError::Truncated`] if fewer than 8 bytes remain.
pub fn get_i64(src: &mut Bytes, field: &'static str) -> Result<i64, DecodeError> {
    ensure(src, field, 8)?;
    Ok(src.get_i64())
}

/// Read a big-endian `u64`.
///
/// # Errors
///
/// Returns [`DecodeError::Truncated`] if fewer than 8 bytes remain.
pub fn get_u64(src: &mut Bytes, field: &'static str) -> Result<u64, DecodeError> {
    ensure(src, field, 8)?;
    Ok(src.get_u64())
}

/// Split off exactly `len` raw bytes.
///
/// # Errors
///
/// Returns [`DecodeError::Truncated`] if fewer than `len` bytes remain.
pub fn get_bytes(src: &mut Bytes, field: &'static str, len: usize) -> Result<Bytes, DecodeError> {
    ensure(src, field, len)?;
    Ok(src.split_to(len))
}
