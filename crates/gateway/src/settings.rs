//! Gateway-wide defaults resolved from configuration.

use std::collections::HashMap;
use std::time::Duration;

use llm_cache_core::{config::CacheConfig, CachePolicy, CallDescriptor};

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Global switch. When off every call goes straight to compute.
    pub enabled: bool,
    pub namespace: String,
    pub gateway_version: String,
    pub content_version: String,
    /// Upper bound for L1 lifetimes unless a policy sets its own TTL.
    pub l1_ttl: Duration,
    pub default_ttl: Duration,
    pub cache_type_ttls: HashMap<String, Duration>,
    pub lock_ttl: Duration,
    pub lock_wait: Duration,
}

impl GatewaySettings {
    /// TTL for the distributed tier: policy, then cache_type, then global default.
    pub fn effective_ttl(&self, cache_type: &str, policy: &CachePolicy) -> Duration {
        policy
            .ttl()
            .or_else(|| self.cache_type_ttls.get(cache_type).copied())
            .unwrap_or(self.default_ttl)
    }

    /// TTL for L1. An explicit policy TTL wins; otherwise L1 never outlives
    /// what the distributed tier would keep.
    pub fn l1_ttl_for(&self, cache_type: &str, policy: &CachePolicy) -> Duration {
        policy
            .ttl()
            .unwrap_or_else(|| self.l1_ttl.min(self.effective_ttl(cache_type, policy)))
    }

    /// Fill in namespace and versions the caller left empty.
    pub fn resolve(&self, descriptor: &CallDescriptor, policy: &CachePolicy) -> CallDescriptor {
        let mut resolved = descriptor.clone();
        if let Some(namespace) = &policy.namespace {
            resolved.namespace = namespace.clone();
        } else if resolved.namespace.is_empty() {
            resolved.namespace = self.namespace.clone();
        }
        if resolved.gateway_version.is_empty() {
            resolved.gateway_version = self.gateway_version.clone();
        }
        if resolved.content_version.is_empty() {
            resolved.content_version = self.content_version.clone();
        }
        resolved
    }
}

impl From<&CacheConfig> for GatewaySettings {
    fn from(config: &CacheConfig) -> Self {
        Self {
            enabled: config.enabled,
            namespace: config.namespace.clone(),
            gateway_version: config.gateway_version.clone(),
            content_version: config.prompt_version.clone(),
            l1_ttl: config.l1_ttl(),
            default_ttl: config.default_ttl(),
            cache_type_ttls: config
                .cache_type_ttls
                .iter()
                .map(|(cache_type, secs)| (cache_type.clone(), Duration::from_secs(*secs)))
                .collect(),
            lock_ttl: config.lock_ttl(),
            lock_wait: config.lock_wait(),
        }
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}
