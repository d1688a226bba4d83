//! Cache tiers for the LLM cache gateway.
//!
//! This crate provides the bounded in-process cache (L1) and the
//! distributed-tier backends (L2): Redis for real deployments and an
//! in-memory stand-in for tests and single-node runs.

pub mod local;
pub mod memory;
pub mod redis;

pub use local::{LocalCache, LocalCacheStats, LocalHit};
pub use memory::InMemoryBackend;
pub use self::redis::RedisCacheBackend;
