//! Frame codec turning a byte stream into discriminated frames.
//!
//! Every frame on the wire is a 5-byte header followed by the payload:
//!
//! ```text
//! +---------------+---------------------------+----------------+
//! | discriminator | payload length (u32, BE)  | payload ...    |
//! |    1 byte     |         4 bytes           | length bytes   |
//! +---------------+---------------------------+----------------+
//! ```
//!
//! Frames are self-delimiting. [`FrameCodec`] plugs into
//! `tokio_util::codec::{FramedRead, FramedWrite}` for socket I/O, and
//! [`FrameAccumulator`] exposes the same logic for callers that are handed raw
//! byte chunks.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

pub mod error;

pub use error::{CodecError, EofError, FramingError};

/// Size of the frame header: discriminator plus 4-byte length.
pub const HEADER_LEN: usize = 5;

/// Smallest maximum frame length a codec may be configured with.
pub const MIN_FRAME_LENGTH: usize = 64;

/// Largest maximum frame length a codec may be configured with (16 MiB).
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

pub(crate) fn clamp_frame_length(value: usize) -> usize {
    value.clamp(MIN_FRAME_LENGTH, MAX_FRAME_LENGTH)
}

/// One complete unit on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    discriminator: u8,
    payload: Bytes,
}

impl Frame {
    /// Build a frame from a discriminator and its payload.
    #[must_use]
    pub fn new(discriminator: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            discriminator,
            payload: payload.into(),
        }
    }

    /// Wire discriminator identifying the packet kind.
    #[must_use]
    pub const fn discriminator(&self) -> u8 { self.discriminator }

    /// Borrow the payload bytes.
    #[must_use]
    pub fn payload(&self) -> &Bytes { &self.payload }

    /// Consume the frame, returning its payload.
    #[must_use]
    pub fn into_payload(self) -> Bytes { self.payload }
}

/// Codec for the discriminator + length framing.
///
/// Decoding never looks past the declared payload length. A header declaring
/// more than `max_frame_length` bytes is reported as
/// [`FramingError::OversizedFrame`]; callers treat that as a lost stream
/// because the following bytes can no longer be trusted as a header.
#[derive(Clone, Copy, Debug)]
pub struct FrameCodec {
    max_frame_length: usize,
}

impl FrameCodec {
    /// Construct a codec accepting payloads up to `max_frame_length` bytes.
    ///
    /// The value is clamped into [`MIN_FRAME_LENGTH`]`..=`[`MAX_FRAME_LENGTH`].
    #[must_use]
    pub fn new(max_frame_length: usize) -> Self {
        Self {
            max_frame_length: clamp_frame_length(max_frame_length),
        }
    }

    /// Return the maximum payload length accepted by this codec.
    #[must_use]
    pub const fn max_frame_length(&self) -> usize { self.max_frame_length }

    fn declared_len(src: &[u8]) -> usize {
        let mut header = &src[1..HEADER_LEN];
        header.get_u32() as usize
    }
}

impl Default for FrameCodec {
    fn default() -> Self { Self::new(MAX_FRAME_LENGTH) }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let len = Self::declared_len(&src[..]);
        if len > self.max_frame_length {
            return Err(FramingError::OversizedFrame {
                size: len,
                max: self.max_frame_length,
            }
            .into());
        }
        let needed = HEADER_LEN + len;
        if src.len() < needed {
            src.reserve(needed - src.len());
            return Ok(None);
        }
        let discriminator = src[0];
        src.advance(HEADER_LEN);
        let payload = src.split_to(len).freeze();
        Ok(Some(Frame::new(discriminator, payload)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if src.is_empty() {
            return Ok(None);
        }
        Err(build_eof_error(src).into())
    }
}

/// Work out whether the stream ended inside a header or inside a payload.
fn build_eof_error(src: &BytesMut) -> EofError {
    if src.len() < HEADER_LEN {
        EofError::MidHeader {
            bytes_received: src.len(),
            header_size: HEADER_LEN,
        }
    } else {
        EofError::MidFrame {
            bytes_received: src.len() - HEADER_LEN,
            expected: FrameCodec::declared_len(src),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let size = item.payload.len();
        if size > self.max_frame_length {
            return Err(FramingError::OversizedFrame {
                size,
                max: self.max_frame_length,
            }
            .into());
        }
        let len = u32::try_from(size).map_err(|_| FramingError::LengthOverflow { size })?;
        dst.reserve(HEADER_LEN + size);
        dst.put_u8(item.discriminator);
        dst.put_u32(len);
        dst.extend_from_slice(&item.payload);
        Ok(())
    }
}

/// Incremental frame extractor for externally supplied byte chunks.
///
/// Bytes that do not yet form a whole frame are retained until the next call
/// to [`append`](Self::append).
///
/// ```
/// use filewire::codec::FrameAccumulator;
///
/// let mut acc = FrameAccumulator::default();
/// assert!(acc.append(&[7, 0, 0]).expect("decode").is_empty());
/// let frames = acc.append(&[0, 2, b'h', b'i']).expect("decode");
/// assert_eq!(frames.len(), 1);
/// assert_eq!(frames[0].discriminator(), 7);
/// assert_eq!(&frames[0].payload()[..], b"hi");
/// ```
#[derive(Debug, Default)]
pub struct FrameAccumulator {
    codec: FrameCodec,
    buffer: BytesMut,
}

impl FrameAccumulator {
    /// Create an accumulator using `codec` for frame extraction.
    #[must_use]
    pub fn new(codec: FrameCodec) -> Self {
        Self {
            codec,
            buffer: BytesMut::new(),
        }
    }

    /// Append `bytes` and return every frame completed by them, in order.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Framing`] when a header declares an oversized
    /// payload. The accumulator should be discarded afterwards.
    pub fn append(&mut self, bytes: &[u8]) -> Result<Vec<Frame>, CodecError> {
        self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();
        while let Some(frame) = self.codec.decode(&mut self.buffer)? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Number of buffered bytes not yet forming a complete frame.
    #[must_use]
    pub fn pending(&self) -> usize { self.buffer.len() }
}

/// Encode `frame` into a fresh buffer using the default codec limits.
///
/// # Errors
///
/// Returns [`CodecError::Framing`] when the payload is too large.
pub fn encode_frame(frame: Frame) -> Result<BytesMut, CodecError> {
    let mut dst = BytesMut::new();
    FrameCodec::default().encode(frame, &mut dst)?;
    Ok(dst)
}
