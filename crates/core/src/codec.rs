//! Serialization boundary between typed values and cached bytes.

use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{Error, Result};

/// Converts values to and from the opaque bytes held by the cache tiers.
pub trait Codec<T>: Send + Sync {
    fn encode(&self, value: &T) -> Result<Bytes>;

    fn decode(&self, raw: &[u8]) -> Result<T>;
}

/// JSON codec for any serde type.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<T> Codec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> Result<Bytes> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| Error::serialization(format!("Failed to encode value: {}", e)))
    }

    fn decode(&self, raw: &[u8]) -> Result<T> {
        serde_json::from_slice(raw)
            .map_err(|e| Error::serialization(format!("Failed to decode value: {}", e)))
    }
}
