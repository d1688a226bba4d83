use serde::{Deserialize, Serialize};
use std::fmt;

/// Process-local gateway counters. Reset only on restart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayStats {
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub misses: u64,
    /// Calls that joined an in-flight computation instead of starting one.
    pub coalesced: u64,
    /// Compute failures.
    pub errors: u64,
    /// Failed distributed-tier operations, including lock operations.
    pub backend_errors: u64,
    /// Cached payloads or envelopes that could not be decoded.
    pub serialization_errors: u64,
    /// Lock waits that ran out of budget.
    pub lock_timeouts: u64,
}

/// How the distributed tier is operated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum L2Mode {
    /// No distributed tier.
    Disabled,
    /// Always used; failing calls degrade individually.
    Forced,
    /// Used only while reachability probes succeed.
    Auto,
}

impl fmt::Display for L2Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disabled => "disabled",
            Self::Forced => "forced",
            Self::Auto => "auto",
        };
        f.write_str(s)
    }
}
