//! Fixed-size chunking with per-chunk checksums
//!
//! An upload is split into a contiguous, zero-indexed run of chunks. Each
//! chunk carries the SHA-256 of its own bytes, so reassembly can name the
//! exact chunk that was damaged in transit.

use crate::checksum::{Checksum, ChecksumEngine};
use crate::config::ChunkConfig;
use crate::error::{ChecksumScope, Error, Result};
use bytes::{Bytes, BytesMut};
use std::io::Read;

/// One piece of an upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkInfo {
    /// Position in the sequence (zero-based)
    pub index: u64,
    /// Size in bytes
    pub size: u64,
    /// Checksum of `data`
    pub checksum: Checksum,
    /// Raw chunk bytes
    pub data: Bytes,
}

impl ChunkInfo {
    /// Create a chunk, computing its checksum
    pub fn new(index: u64, data: Bytes, engine: &ChecksumEngine) -> Self {
        ChunkInfo {
            index,
            size: data.len() as u64,
            checksum: engine.checksum(&data),
            data,
        }
    }
}

/// Output of a successful reassembly
#[derive(Debug, Clone)]
pub struct Reassembled {
    /// Concatenated chunk bytes
    pub data: Bytes,
    /// Checksum of the whole buffer
    pub checksum: Checksum,
    /// True only when an expected checksum was supplied and matched
    pub valid: bool,
}

/// Chunker for splitting buffers into fixed-size chunks
#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    engine: ChecksumEngine,
}

impl Chunker {
    /// Create a new chunker with the given configuration
    pub fn new(config: &ChunkConfig) -> Result<Self> {
        Ok(Self::with_size(config.chunk_size)?.with_engine(ChecksumEngine::new(config.checksum_window)))
    }

    /// Create a chunker with a specific chunk size
    pub fn with_size(chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::ValidationFailed(
                "chunk size must be greater than 0".to_string(),
            ));
        }
        Ok(Chunker {
            chunk_size,
            engine: ChecksumEngine::default(),
        })
    }

    /// Use a specific checksum engine
    pub fn with_engine(mut self, engine: ChecksumEngine) -> Self {
        self.engine = engine;
        self
    }

    /// Get the configured chunk size
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Split data into `ceil(len / chunk_size)` chunks.
    ///
    /// Empty input yields a single empty chunk so that an empty object can
    /// still be reassembled.
    pub fn split(&self, data: &[u8]) -> Vec<ChunkInfo> {
        if data.is_empty() {
            return vec![ChunkInfo::new(0, Bytes::new(), &self.engine)];
        }

        let shared = Bytes::copy_from_slice(data);
        let mut chunks = Vec::with_capacity(data.len().div_ceil(self.chunk_size));
        let mut offset = 0usize;
        let mut index = 0u64;

        while offset < shared.len() {
            let end = (offset + self.chunk_size).min(shared.len());
            chunks.push(ChunkInfo::new(index, shared.slice(offset..end), &self.engine));
            offset = end;
            index += 1;
        }

        chunks
    }

    /// Split a reader into chunks
    pub fn split_reader<R: Read>(&self, mut reader: R) -> Result<Vec<ChunkInfo>> {
        let mut chunks = Vec::new();
        let mut buffer = vec![0u8; self.chunk_size];
        let mut index = 0u64;

        loop {
            let mut total_read = 0;

            // Read until buffer is full or EOF
            while total_read < self.chunk_size {
                match reader.read(&mut buffer[total_read..]) {
                    Ok(0) => break,
                    Ok(n) => total_read += n,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(Error::Io(e)),
                }
            }

            if total_read == 0 {
                break;
            }

            let data = Bytes::copy_from_slice(&buffer[..total_read]);
            chunks.push(ChunkInfo::new(index, data, &self.engine));
            index += 1;

            if total_read < self.chunk_size {
                break;
            }
        }

        if chunks.is_empty() {
            chunks.push(ChunkInfo::new(0, Bytes::new(), &self.engine));
        }

        Ok(chunks)
    }

    /// Reassemble chunks into a complete buffer.
    ///
    /// Chunks may arrive in any order. Fails on a gap or duplicate in the
    /// index sequence and on the first chunk whose bytes do not match its
    /// checksum; nothing is concatenated until every chunk has passed.
    pub fn reassemble(&self, chunks: &[ChunkInfo], expected: Option<&str>) -> Result<Reassembled> {
        if chunks.is_empty() {
            return Err(Error::MissingChunk(0));
        }

        let mut sorted: Vec<&ChunkInfo> = chunks.iter().collect();
        sorted.sort_by_key(|c| c.index);

        for (position, chunk) in sorted.iter().enumerate() {
            let position = position as u64;
            if chunk.index < position {
                return Err(Error::DuplicateChunk(chunk.index));
            }
            if chunk.index > position {
                return Err(Error::MissingChunk(position));
            }
        }

        for chunk in &sorted {
            if chunk.size != chunk.data.len() as u64 {
                return Err(Error::ValidationFailed(format!(
                    "chunk {} declares {} bytes but holds {}",
                    chunk.index,
                    chunk.size,
                    chunk.data.len()
                )));
            }
            let computed = self.engine.checksum(&chunk.data);
            if !computed.matches(chunk.checksum.as_str()) {
                return Err(Error::ChecksumMismatch {
                    scope: ChecksumScope::Chunk(chunk.index),
                    expected: chunk.checksum.to_string(),
                    actual: computed.to_string(),
                });
            }
        }

        let total_size: usize = sorted.iter().map(|c| c.data.len()).sum();
        let mut buffer = BytesMut::with_capacity(total_size);
        for chunk in &sorted {
            buffer.extend_from_slice(&chunk.data);
        }
        let data = buffer.freeze();

        let checksum = self.engine.checksum(&data);
        let valid = expected.map(|e| checksum.matches(e)).unwrap_or(false);

        Ok(Reassembled {
            data,
            checksum,
            valid,
        })
    }
}

/// Split `data` into chunks of `chunk_size` bytes
pub fn split(data: &[u8], chunk_size: usize) -> Result<Vec<ChunkInfo>> {
    Ok(Chunker::with_size(chunk_size)?.split(data))
}

/// Reassemble chunks produced by [`split`]
pub fn reassemble(chunks: &[ChunkInfo], expected: Option<&str>) -> Result<Reassembled> {
    // Chunk size only matters for splitting
    Chunker::with_size(1)?.reassemble(chunks, expected)
}
