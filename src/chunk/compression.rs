//! LZ4 compression stage for the replica pipeline
//!
//! Compression is only applied when it actually shrinks the payload; the
//! caller records whether it was applied so reads can reverse it.

use crate::error::{Error, Result};

/// Compress data using LZ4
///
/// Returns None if compression doesn't reduce size
pub fn compress(data: &[u8], threshold: usize) -> Option<Vec<u8>> {
    if data.len() < threshold {
        return None;
    }

    let compressed = lz4_flex::compress_prepend_size(data);

    if compressed.len() < data.len() {
        Some(compressed)
    } else {
        None
    }
}

/// Decompress LZ4 data
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    lz4_flex::decompress_size_prepended(data)
        .map_err(|e| Error::Compression(format!("Decompression failed: {}", e)))
}

/// Compress data, returning original if compression doesn't help
pub fn compress_or_original(data: &[u8], threshold: usize) -> (Vec<u8>, bool) {
    match compress(data, threshold) {
        Some(compressed) => (compressed, true),
        None => (data.to_vec(), false),
    }
}
