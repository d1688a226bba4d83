use config::{Config, ConfigError, Environment, File};
use secrecy::Secret;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::types::L2Mode;

/// Gateway configuration.
///
/// Sources, later ones winning: optional `config/llm_cache.*` file, the
/// `LLM_CACHE_*` environment, then `LLM_GATEWAY_VERSION` / `PROMPT_VERSION`.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    /// Global kill switch.
    pub enabled: bool,
    pub namespace: String,

    pub l1_max_entries: usize,
    pub l1_ttl_seconds: u64,
    /// Interval of the background expiry sweep. Zero disables it.
    pub l1_sweep_interval_seconds: u64,

    pub l2_enabled: bool,
    pub redis_url: Option<String>,
    pub l2_auto_enable: bool,
    /// Interval between reachability probes in auto mode. Zero disables re-probing.
    pub l2_probe_interval_seconds: u64,
    /// Upper bound for a single backend command or connect.
    pub l2_timeout_ms: u64,
    pub key_prefix: String,

    /// Global default TTL for cache writes.
    pub default_ttl_seconds: u64,
    /// Per cache_type default TTLs.
    pub cache_type_ttls: HashMap<String, u64>,

    pub lock_ttl_ms: u64,
    pub lock_wait_ms: u64,

    pub gateway_version: String,
    pub prompt_version: String,

    pub admin_host: String,
    pub admin_port: u16,
    pub admin_token: Option<Secret<String>>,
    pub log_json: bool,
}

impl CacheConfig {
    /// Load from the config file and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::build(None)
    }

    /// Load from an explicit set of environment-style variables only.
    pub fn from_env_map(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::build(Some(vars))
    }

    fn build(vars: Option<HashMap<String, String>>) -> Result<Self, ConfigError> {
        let lookup = |name: &str| match &vars {
            Some(map) => map.get(name).cloned(),
            None => std::env::var(name).ok(),
        };
        let gateway_version = lookup("LLM_GATEWAY_VERSION");
        let prompt_version = lookup("PROMPT_VERSION");

        let mut builder = Config::builder();
        if vars.is_none() {
            builder = builder.add_source(File::with_name("config/llm_cache").required(false));
        }

        let s = builder
            // Maps LLM_CACHE_L1_MAX_ENTRIES=500 to l1_max_entries
            .add_source(
                Environment::with_prefix("LLM_CACHE")
                    .try_parsing(true)
                    .source(vars),
            )
            .set_override_option("gateway_version", gateway_version)?
            .set_override_option("prompt_version", prompt_version)?
            .build()?;

        s.try_deserialize()
    }

    /// The backend URL, treating an empty string as absent.
    pub fn redis_url(&self) -> Option<&str> {
        self.redis_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    /// How the distributed tier should be operated.
    pub fn l2_mode(&self) -> L2Mode {
        if self.redis_url().is_none() {
            L2Mode::Disabled
        } else if self.l2_enabled {
            L2Mode::Forced
        } else if self.l2_auto_enable {
            L2Mode::Auto
        } else {
            L2Mode::Disabled
        }
    }

    pub fn l1_ttl(&self) -> Duration {
        Duration::from_secs(self.l1_ttl_seconds)
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }

    pub fn l2_timeout(&self) -> Duration {
        Duration::from_millis(self.l2_timeout_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: "default".into(),
            l1_max_entries: 10_000,
            l1_ttl_seconds: 60,
            l1_sweep_interval_seconds: 30,
            l2_enabled: false,
            redis_url: None,
            l2_auto_enable: true,
            l2_probe_interval_seconds: 30,
            l2_timeout_ms: 500,
            key_prefix: "llmcache".into(),
            default_ttl_seconds: 3600,
            cache_type_ttls: HashMap::from([("parameter_extraction".to_string(), 7200)]),
            lock_ttl_ms: 30_000,
            lock_wait_ms: 5_000,
            gateway_version: "v1".into(),
            prompt_version: "v1".into(),
            admin_host: "0.0.0.0".into(),
            admin_port: 9400,
            admin_token: None,
            log_json: false,
        }
    }
}
