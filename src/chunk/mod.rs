//! Chunk management module
//!
//! Splits uploads into checksummed fixed-size chunks, reassembles them with
//! verification, and provides the compression stage used by replicas.

mod chunker;
pub mod compression;

pub use chunker::{reassemble, split, ChunkInfo, Chunker, Reassembled};
pub use compression::{compress, compress_or_original, decompress};
