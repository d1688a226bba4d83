//! Core type definitions for the LLM cache gateway.
//!
//! Broken down into submodules: call descriptors and keys, per-call policy,
//! stored entries, and counters.

pub mod descriptor;
pub mod entry;
pub mod policy;
pub mod stats;

pub use descriptor::*;
pub use entry::*;
pub use policy::*;
pub use stats::*;
