//! Helpers for slicing byte streams into arbitrary reads.

/// Split `bytes` at the given offsets.
///
/// Offsets are sorted, de-duplicated and clamped to the input length, so any
/// list of indices yields a valid partition whose concatenation equals `bytes`.
#[must_use]
pub fn split_at(bytes: &[u8], points: &[usize]) -> Vec<Vec<u8>> {
    let mut cuts: Vec<usize> = points.iter().map(|p| (*p).min(bytes.len())).collect();
    cuts.sort_unstable();
    cuts.dedup();
    let mut chunks = Vec::with_capacity(cuts.len() + 1);
    let mut start = 0;
    for cut in cuts.into_iter().chain(std::iter::once(bytes.len())) {
        chunks.push(bytes[start..cut].to_vec());
        start = cut;
    }
    chunks
}

/// Split `bytes` into chunks of at most `size` bytes.
#[must_use]
pub fn chunked(bytes: &[u8], size: usize) -> Vec<Vec<u8>> {
    bytes.chunks(size.max(1)).map(<[u8]>::to_vec).collect()
}
