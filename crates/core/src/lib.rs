//! Core types, traits, and error definitions for the LLM cache gateway.
//!
//! This crate provides the foundational building blocks shared by the cache
//! tiers, the gateway orchestration, and the admin surface.

pub mod codec;
pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use codec::{Codec, JsonCodec};
pub use error::{Error, Result};
pub use traits::*;
pub use types::*;
