//! Disk-backed contiguous run of fragments.

use std::{
    io::{self, Seek, SeekFrom, Write},
    path::Path,
};

use tempfile::NamedTempFile;

/// One maximal run of consecutive fragment indices, spooled to a temp file.
///
/// The backing file is removed when the segment is dropped.
#[derive(Debug)]
pub(crate) struct Segment {
    start_index: i32,
    next_expected: i32,
    len: u64,
    file: NamedTempFile,
}

impl Segment {
    /// Open a new segment at `index` seeded with `data`.
    pub(crate) fn open(spool_dir: &Path, index: i32, data: &[u8]) -> io::Result<Self> {
        let file = tempfile::Builder::new()
            .prefix("filewire-")
            .suffix(".part")
            .tempfile_in(spool_dir)?;
        let mut segment = Self {
            start_index: index,
            next_expected: index,
            len: 0,
            file,
        };
        segment.append(data)?;
        Ok(segment)
    }

    pub(crate) fn start_index(&self) -> i32 { self.start_index }

    pub(crate) fn next_expected(&self) -> i32 { self.next_expected }

    pub(crate) fn len(&self) -> u64 { self.len }

    /// Returns true when `index` already landed in this segment.
    pub(crate) fn covers(&self, index: i32) -> bool {
        (self.start_index..self.next_expected).contains(&index)
    }

    /// Append the bytes of fragment `next_expected`.
    pub(crate) fn append(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.as_file_mut().write_all(data)?;
        self.next_expected += 1;
        self.len += data.len() as u64;
        Ok(())
    }

    /// Copy all of `other` onto the end of this segment, then release it.
    pub(crate) fn absorb(&mut self, mut other: Segment) -> io::Result<()> {
        let source = other.file.as_file_mut();
        source.flush()?;
        source.seek(SeekFrom::Start(0))?;
        let copied = io::copy(source, self.file.as_file_mut())?;
        self.len += copied;
        self.next_expected = other.next_expected;
        Ok(())
    }

    /// Flush and hand over the backing file.
    pub(crate) fn into_file(mut self) -> io::Result<(NamedTempFile, u64)> {
        self.file.as_file_mut().flush()?;
        Ok((self.file, self.len))
    }
}
