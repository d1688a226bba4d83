use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

use crate::error::{Error, Result};

const ENVELOPE_VERSION: u8 = 1;

/// Longest TTL any tier honors; larger values are clamped to it.
pub const MAX_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 3600);

/// The stored unit of the distributed tier.
///
/// Timestamps are wall-clock unix milliseconds so every process sharing the
/// backend agrees on an entry's age.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(rename = "v")]
    version: u8,
    #[serde(with = "base64_bytes")]
    pub value: Bytes,
    pub stored_at: i64,
    pub expires_at: i64,
}

impl CacheEntry {
    /// Create an entry stored now and living for `ttl`, at most [`MAX_TTL`].
    pub fn new(value: Bytes, ttl: Duration) -> Self {
        let now = now_millis();
        let ttl_ms = ttl.min(MAX_TTL).as_millis() as i64;
        Self::with_times(value, now, now.saturating_add(ttl_ms))
    }

    pub fn with_times(value: Bytes, stored_at: i64, expires_at: i64) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            value,
            stored_at,
            expires_at,
        }
    }

    /// Time since the entry was stored.
    pub fn age(&self) -> Duration {
        millis_to_duration(now_millis() - self.stored_at)
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining(&self) -> Duration {
        millis_to_duration(self.expires_at - now_millis())
    }

    pub fn is_expired(&self) -> bool {
        now_millis() >= self.expires_at
    }

    /// Serialize into the storage envelope.
    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Parse a storage envelope.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let entry: Self = serde_json::from_slice(raw)?;
        if entry.version != ENVELOPE_VERSION {
            return Err(Error::serialization(format!(
                "unsupported cache envelope version {}",
                entry.version
            )));
        }
        Ok(entry)
    }
}

/// Current wall-clock time in unix milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn millis_to_duration(ms: i64) -> Duration {
    Duration::from_millis(ms.max(0) as u64)
}

mod base64_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Bytes, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
