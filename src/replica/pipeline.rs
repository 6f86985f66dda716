//! Replica processing pipeline
//!
//! Writes run compress then encrypt; reads run decrypt then decompress. The
//! flags recorded on a replica say which stages were actually applied, and
//! only those stages are reversed.

use crate::checksum::{Checksum, ChecksumEngine};
use crate::chunk::compression;
use crate::crypto::Cipher;
use crate::error::{Error, Result};
use bytes::Bytes;
use std::sync::Arc;

/// Bytes ready to hand to a backend
#[derive(Debug, Clone)]
pub struct Processed {
    pub data: Bytes,
    /// Checksum of `data`
    pub checksum: Checksum,
    /// Compression was requested and actually shrank the payload
    pub compressed: bool,
    pub encrypted: bool,
}

#[derive(Clone)]
pub struct Pipeline {
    cipher: Arc<dyn Cipher>,
    compression_threshold: usize,
    engine: ChecksumEngine,
}

impl Pipeline {
    pub fn new(cipher: Arc<dyn Cipher>, compression_threshold: usize, engine: ChecksumEngine) -> Self {
        Self {
            cipher,
            compression_threshold,
            engine,
        }
    }

    pub fn engine(&self) -> &ChecksumEngine {
        &self.engine
    }

    /// Apply the write-side stages
    pub fn process(&self, data: &[u8], compress: bool, encrypt: bool) -> Result<Processed> {
        let (mut out, compressed) = if compress {
            compression::compress_or_original(data, self.compression_threshold)
        } else {
            (data.to_vec(), false)
        };

        if encrypt {
            out = self.cipher.encrypt(&out)?;
        }

        let data = Bytes::from(out);
        Ok(Processed {
            checksum: self.engine.checksum(&data),
            data,
            compressed,
            encrypted: encrypt,
        })
    }

    /// Undo the stages recorded on a replica, strictly in reverse order
    pub fn reverse(&self, data: &[u8], compressed: bool, encrypted: bool) -> Result<Bytes> {
        let mut out = if encrypted {
            self.cipher.decrypt(data)?
        } else {
            data.to_vec()
        };

        if compressed {
            out = compression::decompress(&out)?;
        }

        Ok(Bytes::from(out))
    }

    /// [`process`](Self::process) on the blocking pool for buffers larger
    /// than one checksum window
    pub async fn process_offloaded(&self, data: Bytes, compress: bool, encrypt: bool) -> Result<Processed> {
        if data.len() <= self.engine.window_size() {
            return self.process(&data, compress, encrypt);
        }
        let pipeline = self.clone();
        tokio::task::spawn_blocking(move || pipeline.process(&data, compress, encrypt))
            .await
            .map_err(|e| Error::Internal(format!("pipeline task failed: {}", e)))?
    }

    /// [`reverse`](Self::reverse) on the blocking pool for large buffers
    pub async fn reverse_offloaded(&self, data: Bytes, compressed: bool, encrypted: bool) -> Result<Bytes> {
        if data.len() <= self.engine.window_size() {
            return self.reverse(&data, compressed, encrypted);
        }
        let pipeline = self.clone();
        tokio::task::spawn_blocking(move || pipeline.reverse(&data, compressed, encrypted))
            .await
            .map_err(|e| Error::Internal(format!("pipeline task failed: {}", e)))?
    }
}
