//! Process-wide vault key
//!
//! One key encrypts every replica. It is generated once, persisted in the
//! metadata store's keystore tree and reused on every later open. Rotation is
//! not supported.

use crate::crypto::KEY_SIZE;
use crate::error::{Error, Result};
use crate::metadata::{MetadataStore, Tree};
use rand::RngCore;
use tracing::info;
use zeroize::Zeroizing;

const VAULT_KEY_NAME: &str = "vault_key";

/// Vault key material (zeroized on drop)
#[derive(Clone)]
pub struct VaultKey {
    key: Zeroizing<[u8; KEY_SIZE]>,
}

impl VaultKey {
    /// Generate a fresh random key
    pub fn generate() -> Self {
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        rand::thread_rng().fill_bytes(key.as_mut());
        Self { key }
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self {
            key: Zeroizing::new(bytes),
        }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    /// Load the persisted key, generating and storing one if absent
    pub fn load_or_create(store: &dyn MetadataStore) -> Result<Self> {
        if let Some(bytes) = store.get(Tree::Keystore, VAULT_KEY_NAME)? {
            let bytes = Zeroizing::new(bytes);
            if bytes.len() != KEY_SIZE {
                return Err(Error::Encryption(format!(
                    "Stored vault key has {} bytes, expected {}",
                    bytes.len(),
                    KEY_SIZE
                )));
            }
            let mut key = Zeroizing::new([0u8; KEY_SIZE]);
            key.copy_from_slice(&bytes);
            return Ok(Self { key });
        }

        let key = Self::generate();
        store.put(Tree::Keystore, VAULT_KEY_NAME, key.key.to_vec())?;
        store.flush()?;
        info!("Generated new vault key");
        Ok(key)
    }
}

impl std::fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("VaultKey(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{MemoryMetadataStore, SledMetadataStore};

    #[test]
    fn test_generate_is_random() {
        assert_ne!(VaultKey::generate().as_bytes(), VaultKey::generate().as_bytes());
    }

    #[test]
    fn test_load_or_create_is_stable() {
        let store = MemoryMetadataStore::new();
        let first = VaultKey::load_or_create(&store).unwrap();
        let second = VaultKey::load_or_create(&store).unwrap();
        assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let key = {
            let store = SledMetadataStore::open(dir.path()).unwrap();
            VaultKey::load_or_create(&store).unwrap()
        };
        let store = SledMetadataStore::open(dir.path()).unwrap();
        assert_eq!(
            VaultKey::load_or_create(&store).unwrap().as_bytes(),
            key.as_bytes()
        );
    }

    #[test]
    fn test_rejects_truncated_key() {
        let store = MemoryMetadataStore::new();
        store.put(Tree::Keystore, VAULT_KEY_NAME, vec![1, 2, 3]).unwrap();
        assert!(matches!(
            VaultKey::load_or_create(&store),
            Err(Error::Encryption(_))
        ));
    }

    #[test]
    fn test_debug_hides_material() {
        assert_eq!(format!("{:?}", VaultKey::from_bytes([7; KEY_SIZE])), "VaultKey(..)");
    }
}
