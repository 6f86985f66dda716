//! SHA-256 checksums over chunked byte buffers
//!
//! Every other component verifies data through this module. Digests are
//! computed by feeding fixed-size windows into a streaming context so that
//! memory stays bounded for large sources; the result is identical to a
//! one-shot digest of the same bytes.

use crate::error::{Error, Result};
use bytes::Bytes;
use ring::digest::{Context, SHA256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;

/// Default hashing window: 1MB
pub const DEFAULT_WINDOW_SIZE: usize = 1024 * 1024;

/// Length of a hex-encoded SHA-256 digest
pub const CHECKSUM_HEX_LEN: usize = 64;

/// Lowercase hex-encoded SHA-256 digest
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(String);

impl Checksum {
    /// Parse a hex digest, normalising to lowercase
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != CHECKSUM_HEX_LEN || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::ValidationFailed(format!(
                "'{}' is not a SHA-256 hex digest",
                s
            )));
        }
        Ok(Checksum(s.to_ascii_lowercase()))
    }

    fn from_digest(digest: &[u8]) -> Self {
        Checksum(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compare against a textual digest (case-insensitive, length-checked)
    pub fn matches(&self, expected: &str) -> bool {
        verify_checksum(&self.0, expected)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Checksum {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Incremental SHA-256 that accepts data in arbitrary pieces
pub struct StreamingChecksum {
    context: Context,
    bytes_seen: u64,
}

impl StreamingChecksum {
    pub fn new() -> Self {
        StreamingChecksum {
            context: Context::new(&SHA256),
            bytes_seen: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.context.update(data);
        self.bytes_seen += data.len() as u64;
    }

    /// Number of bytes fed so far
    pub fn bytes_seen(&self) -> u64 {
        self.bytes_seen
    }

    pub fn finalize(self) -> Checksum {
        Checksum::from_digest(self.context.finish().as_ref())
    }
}

impl Default for StreamingChecksum {
    fn default() -> Self {
        Self::new()
    }
}

/// Windowed SHA-256 engine
#[derive(Debug, Clone, Copy)]
pub struct ChecksumEngine {
    window_size: usize,
}

impl ChecksumEngine {
    /// Create an engine hashing in windows of `window_size` bytes
    pub fn new(window_size: usize) -> Self {
        ChecksumEngine {
            window_size: window_size.max(1),
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Checksum a complete buffer
    pub fn checksum(&self, data: &[u8]) -> Checksum {
        let mut hasher = StreamingChecksum::new();
        for window in data.chunks(self.window_size) {
            hasher.update(window);
        }
        hasher.finalize()
    }

    /// Checksum everything a reader yields
    pub fn checksum_reader<R: Read>(&self, mut reader: R) -> Result<Checksum> {
        let mut hasher = StreamingChecksum::new();
        let mut buffer = vec![0u8; self.window_size];

        loop {
            match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => hasher.update(&buffer[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }

        Ok(hasher.finalize())
    }

    /// Check `data` against an expected digest
    pub fn verify(&self, data: &[u8], expected: &str) -> bool {
        self.checksum(data).matches(expected)
    }

    /// Checksum on the blocking pool when the buffer spans more than one
    /// window, inline otherwise
    pub async fn checksum_offloaded(&self, data: Bytes) -> Result<Checksum> {
        if data.len() <= self.window_size {
            return Ok(self.checksum(&data));
        }
        let engine = *self;
        tokio::task::spawn_blocking(move || engine.checksum(&data))
            .await
            .map_err(|e| Error::Internal(format!("checksum task failed: {}", e)))
    }
}

impl Default for ChecksumEngine {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

/// Checksum a buffer with the default window size
pub fn checksum(data: &[u8]) -> Checksum {
    ChecksumEngine::default().checksum(data)
}

/// Check a buffer against an expected digest
pub fn verify(data: &[u8], expected: &str) -> bool {
    ChecksumEngine::default().verify(data, expected)
}

/// Case-insensitive, length-checked digest comparison
pub fn verify_checksum(computed: &str, expected: &str) -> bool {
    if computed.len() != expected.len() {
        return false;
    }
    computed.eq_ignore_ascii_case(expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    // sha256("abc")
    const ABC_DIGEST: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
    // sha256("")
    const EMPTY_DIGEST: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_known_digests() {
        assert_eq!(checksum(b"abc").as_str(), ABC_DIGEST);
        assert_eq!(checksum(b"").as_str(), EMPTY_DIGEST);
    }

    #[test]
    fn test_window_size_does_not_change_digest() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i * 31 % 251) as u8).collect();
        let one_pass = ChecksumEngine::new(data.len()).checksum(&data);

        for window in [1, 7, 64, 1000, 4096] {
            assert_eq!(ChecksumEngine::new(window).checksum(&data), one_pass);
        }
    }

    #[test]
    fn test_streaming_matches_one_shot() {
        let data = vec![0x5au8; 3000];
        let mut hasher = StreamingChecksum::new();
        hasher.update(&data[..1]);
        hasher.update(&data[1..2048]);
        hasher.update(&data[2048..]);
        assert_eq!(hasher.bytes_seen(), 3000);
        assert_eq!(hasher.finalize(), checksum(&data));
    }

    #[test]
    fn test_checksum_reader() {
        let data = vec![0x42u8; 5000];
        let engine = ChecksumEngine::new(1024);
        let from_reader = engine.checksum_reader(Cursor::new(&data)).unwrap();
        assert_eq!(from_reader, checksum(&data));
    }

    #[test]
    fn test_verify_is_case_insensitive() {
        assert!(verify(b"abc", &ABC_DIGEST.to_uppercase()));
        assert!(verify(b"abc", ABC_DIGEST));
    }

    #[test]
    fn test_verify_rejects_length_mismatch() {
        assert!(!verify(b"abc", &ABC_DIGEST[..63]));
        assert!(!verify(b"abc", ""));
        assert!(!verify_checksum(ABC_DIGEST, &format!("{}0", ABC_DIGEST)));
    }

    #[test]
    fn test_verify_rejects_different_data() {
        assert!(!verify(b"abd", ABC_DIGEST));
    }

    #[test]
    fn test_parse_normalises_case() {
        let parsed = Checksum::parse(&ABC_DIGEST.to_uppercase()).unwrap();
        assert_eq!(parsed.as_str(), ABC_DIGEST);
        assert!(Checksum::parse("xyz").is_err());
        assert!(Checksum::parse(&"g".repeat(64)).is_err());
    }

    #[tokio::test]
    async fn test_offloaded_matches_inline() {
        let engine = ChecksumEngine::new(128);
        let data = Bytes::from(vec![7u8; 1000]);
        let offloaded = engine.checksum_offloaded(data.clone()).await.unwrap();
        assert_eq!(offloaded, engine.checksum(&data));
    }
}
