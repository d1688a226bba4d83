//! Core traits for the LLM cache gateway.
//!
//! - `backend`: distributed cache tier (key-value store with expiry and locks)

pub mod backend;

pub use backend::*;
