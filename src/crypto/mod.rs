//! Replica encryption stage
//!
//! The encryption step of the replica pipeline is a pluggable [`Cipher`].
//! The bundled [`XorCipher`] is a reversible keystream placeholder and gives
//! no confidentiality; swap in a real cipher where that matters.

mod keystore;

pub use keystore::VaultKey;

use crate::error::{Error, Result};

/// Size of the vault key in bytes
pub const KEY_SIZE: usize = 32;

/// Reversible transform applied to processed replica bytes
pub trait Cipher: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &'static str;

    fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>>;

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Repeating-key XOR
pub struct XorCipher {
    key: VaultKey,
}

impl XorCipher {
    pub fn new(key: VaultKey) -> Self {
        Self { key }
    }

    fn apply(&self, data: &[u8]) -> Result<Vec<u8>> {
        let key = self.key.as_bytes();
        if key.is_empty() {
            return Err(Error::Encryption("empty key".to_string()));
        }
        Ok(data
            .iter()
            .zip(key.iter().cycle())
            .map(|(b, k)| b ^ k)
            .collect())
    }
}

impl Cipher for XorCipher {
    fn name(&self) -> &'static str {
        "xor"
    }

    fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.apply(data)
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        // XOR is its own inverse
        self.apply(data)
    }
}
