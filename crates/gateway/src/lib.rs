//! Response cache gateway for LLM calls.
//!
//! This crate derives cache keys from call descriptors, coalesces concurrent
//! identical calls, coordinates fills across processes through a distributed
//! lock, and serves results from an in-process L1 and a distributed L2.

pub mod builder;
pub mod canonical;
pub mod gateway;
pub mod lock;
pub mod settings;
pub mod single_flight;
pub mod tier;

pub use builder::CacheGatewayBuilder;
pub use canonical::{CanonicalRule, KeyCanonicalizer, TRANSPORT_OPTION_KEYS};
pub use gateway::{CacheGateway, L2Status, Removal, StatsReport};
pub use lock::{DistributedLock, LockGuard, LockOutcome};
pub use settings::GatewaySettings;
pub use single_flight::{FlightAborted, FlightResult, SingleFlight};
pub use tier::L2Tier;
