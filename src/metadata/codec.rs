//! Binary codec for persisted records
//!
//! Every record written to a [`MetadataStore`](super::MetadataStore) goes
//! through these two functions. Records must stay bincode-compatible: no
//! `skip_serializing_if`, `flatten` or untagged enums.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encode a record
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| Error::Serialization(e.to_string()))
}

/// Decode a record
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| Error::Deserialization(e.to_string()))
}
