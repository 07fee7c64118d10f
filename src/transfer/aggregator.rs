//! Per-transfer reassembly of out-of-order fragments.
//!
//! A [`TransferSession`] keeps one disk-backed segment per contiguous run of
//! received fragment indices. On close the segments are concatenated into the
//! run starting at index 0 and handed to the caller as a [`ReassembledFile`].

use std::{
    fs,
    io::{self, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    time::Instant,
};

use tempfile::NamedTempFile;

use super::{TransferError, segment::Segment};
use crate::packet::{
    FileFragment,
    FileStreamClose,
    FileStreamStart,
    StreamMetadata,
    TransferControl,
    TransferId,
};

/// Result of offering a fragment to a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acceptance {
    /// The fragment was spooled into a segment.
    Accepted,
    /// The fragment belongs to another transfer, or this one has finished.
    Foreign,
    /// The fragment index was already received.
    Duplicate,
    /// The fragment index lies outside the declared fragment count.
    OutOfRange,
}

/// Reassembly state for one inbound transfer.
#[derive(Debug)]
pub struct TransferSession {
    start: FileStreamStart,
    declared_count: i32,
    received_count: i32,
    segments: Vec<Segment>,
    spool_dir: PathBuf,
    finished: bool,
    last_activity: Instant,
}

impl TransferSession {
    /// Open a session for `start`, spooling segments into `spool_dir`.
    ///
    /// A declared count of zero is treated as one fragment so that empty files
    /// still complete with their single empty fragment.
    #[must_use]
    pub fn new(start: FileStreamStart, spool_dir: impl Into<PathBuf>, now: Instant) -> Self {
        let declared_count = start.fragment_count.max(1);
        Self {
            start,
            declared_count,
            received_count: 0,
            segments: Vec::new(),
            spool_dir: spool_dir.into(),
            finished: false,
            last_activity: now,
        }
    }

    /// The start packet that opened this session.
    #[must_use]
    pub fn start(&self) -> &FileStreamStart { &self.start }

    /// Number of fragments the sender declared.
    #[must_use]
    pub fn declared_count(&self) -> i32 { self.declared_count }

    /// Number of distinct fragments accepted so far.
    #[must_use]
    pub fn received_count(&self) -> i32 { self.received_count }

    /// Number of segments currently backing this session.
    #[must_use]
    pub fn segment_count(&self) -> usize { self.segments.len() }

    /// Returns true once every declared fragment has been accepted.
    #[must_use]
    pub fn is_complete(&self) -> bool { self.received_count == self.declared_count }

    /// Returns true once [`finish`](Self::finish) has succeeded.
    #[must_use]
    pub fn is_finished(&self) -> bool { self.finished }

    /// Time of the last accepted fragment, or of creation.
    #[must_use]
    pub fn last_activity(&self) -> Instant { self.last_activity }

    /// Offer a fragment to this session.
    ///
    /// The fragment is appended to the segment expecting its index, or opens a
    /// new segment. Duplicates and out-of-range indices leave the session
    /// untouched.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Io`] if the spool file cannot be written. The
    /// session should be discarded afterwards.
    pub fn accept_fragment(
        &mut self,
        fragment: &FileFragment,
        now: Instant,
    ) -> Result<Acceptance, TransferError> {
        if self.finished || !self.start.same_transfer(fragment) {
            return Ok(Acceptance::Foreign);
        }
        let index = fragment.index;
        if !(0..self.declared_count).contains(&index) {
            return Ok(Acceptance::OutOfRange);
        }
        if self.segments.iter().any(|s| s.covers(index)) {
            return Ok(Acceptance::Duplicate);
        }

        match self.segments.iter_mut().find(|s| s.next_expected() == index) {
            Some(segment) => segment.append(&fragment.data)?,
            None => self
                .segments
                .push(Segment::open(&self.spool_dir, index, &fragment.data)?),
        }
        self.received_count += 1;
        self.last_activity = now;
        Ok(Acceptance::Accepted)
    }

    /// Merge every segment into the run starting at index 0.
    ///
    /// Returns `Ok(None)` without changing state when `close` names another
    /// transfer or fragments are still missing.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Io`] if merging fails; all spool files are
    /// released in that case.
    pub fn finish(
        &mut self,
        close: &FileStreamClose,
    ) -> Result<Option<ReassembledFile>, TransferError> {
        if self.finished || !self.start.same_transfer(close) || !self.is_complete() {
            return Ok(None);
        }
        let mut segments = std::mem::take(&mut self.segments);
        segments.sort_by_key(Segment::start_index);
        let mut segments = segments.into_iter();
        let Some(mut head) = segments.next() else {
            return Ok(None);
        };
        for segment in segments {
            head.absorb(segment)?;
        }
        self.finished = true;
        let (file, len) = head.into_file()?;
        Ok(Some(ReassembledFile::new(
            self.start.name.clone(),
            self.start.transfer_id,
            file,
            len,
        )))
    }

    /// Total bytes currently spooled across all segments.
    #[must_use]
    pub fn spooled_bytes(&self) -> u64 { self.segments.iter().map(Segment::len).sum() }

    /// Metadata sent with the start packet.
    #[must_use]
    pub fn metadata(&self) -> &StreamMetadata { &self.start.metadata }
}

impl TransferControl for TransferSession {
    fn name(&self) -> &str { &self.start.name }

    fn transfer_id(&self) -> TransferId { self.start.transfer_id }
}

/// Reconstructed file content, owned by whoever holds this value.
///
/// The spool file is deleted on drop unless [`persist_to`](Self::persist_to)
/// moved it into place.
#[derive(Debug)]
pub struct ReassembledFile {
    name: String,
    transfer_id: TransferId,
    file: NamedTempFile,
    len: u64,
}

impl ReassembledFile {
    fn new(name: String, transfer_id: TransferId, file: NamedTempFile, len: u64) -> Self {
        Self {
            name,
            transfer_id,
            file,
            len,
        }
    }

    /// Name of the transfer this content came from.
    #[must_use]
    pub fn name(&self) -> &str { &self.name }

    /// Identifier of the transfer this content came from.
    #[must_use]
    pub fn transfer_id(&self) -> TransferId { self.transfer_id }

    /// Content length in bytes.
    #[must_use]
    pub fn len(&self) -> u64 { self.len }

    /// Returns true for zero-length content.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.len == 0 }

    /// Location of the spool file.
    #[must_use]
    pub fn path(&self) -> &Path { self.file.path() }

    /// Read the whole content into memory, releasing the spool file.
    ///
    /// # Errors
    ///
    /// Returns any I/O error raised while reading.
    pub fn read_all(mut self) -> io::Result<Vec<u8>> {
        let file = self.file.as_file_mut();
        file.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::with_capacity(usize::try_from(self.len).unwrap_or(0));
        file.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Move the content to `dest`, replacing any existing file.
    ///
    /// Falls back to copying when the spool directory and `dest` live on
    /// different filesystems.
    ///
    /// # Errors
    ///
    /// Returns any I/O error raised while moving or copying.
    pub fn persist_to(self, dest: &Path) -> io::Result<()> {
        match self.file.persist(dest) {
            Ok(_) => Ok(()),
            Err(err) => {
                let spool = err.file;
                fs::copy(spool.path(), dest)?;
                Ok(())
            }
        }
    }
}
