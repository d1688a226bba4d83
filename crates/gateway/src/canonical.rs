//! Deterministic cache keys for model calls.
//!
//! A descriptor is normalized (roles, per-cache_type content rules, transport
//! options removed), serialized with a fixed field order and sorted map keys,
//! and hashed with SHA-256. The key depends on nothing but the descriptor.

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

use llm_cache_core::{CacheKey, CallDescriptor, Error, Message, Result};

/// Option keys that only affect transport, never the generated output.
pub const TRANSPORT_OPTION_KEYS: &[&str] = &[
    "timeout",
    "request_timeout",
    "connect_timeout",
    "stream",
    "keep_alive",
    "retries",
    "max_retries",
];

/// Bumped when the canonical form itself changes.
const CANONICAL_SCHEMA: u32 = 1;

/// Content normalization for one cache_type.
#[derive(Debug, Clone, Default)]
pub struct CanonicalRule {
    collapse_whitespace: bool,
    volatile_patterns: Vec<Regex>,
}

impl CanonicalRule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat whitespace differences in message content as insignificant.
    pub fn collapse_whitespace(mut self) -> Self {
        self.collapse_whitespace = true;
        self
    }

    /// Strip every match of `pattern` from message content before hashing.
    pub fn strip(mut self, pattern: Regex) -> Self {
        self.volatile_patterns.push(pattern);
        self
    }

    /// Like [`strip`](Self::strip), compiling the pattern first.
    pub fn strip_pattern(self, pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| Error::config(format!("Invalid volatile pattern '{}': {}", pattern, e)))?;
        Ok(self.strip(regex))
    }

    fn apply(&self, content: &str) -> String {
        let mut text = content.to_string();
        for pattern in &self.volatile_patterns {
            text = pattern.replace_all(&text, "").into_owned();
        }
        if self.collapse_whitespace {
            text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        }
        text
    }
}

/// Canonical form that gets hashed. Field order is part of the key.
#[derive(Serialize)]
struct CanonicalCall<'a> {
    schema: u32,
    cache_type: &'a str,
    namespace: &'a str,
    gateway_version: &'a str,
    content_version: &'a str,
    model: &'a str,
    messages: Vec<Message>,
    options: BTreeMap<&'a str, Value>,
}

/// Turns call descriptors into cache keys.
#[derive(Debug, Clone)]
pub struct KeyCanonicalizer {
    rules: HashMap<String, CanonicalRule>,
}

impl KeyCanonicalizer {
    /// Canonicalizer with the built-in per-cache_type rules.
    pub fn new() -> Self {
        let mut rules = HashMap::new();
        rules.insert(
            "parameter_extraction".to_string(),
            CanonicalRule::new().collapse_whitespace(),
        );
        // Reports quote earlier generated reports, whose header carries a
        // fresh timestamp line on every run.
        rules.insert(
            "report_synthesis".to_string(),
            CanonicalRule::new()
                .strip(Regex::new(r"(?m)^[ \t]*Generated:.*$").expect("valid volatile pattern"))
                .collapse_whitespace(),
        );
        Self { rules }
    }

    /// Canonicalizer without any content rules.
    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    /// Set the rule for a cache_type, replacing any previous one.
    pub fn with_rule(mut self, cache_type: impl Into<String>, rule: CanonicalRule) -> Self {
        self.rules.insert(cache_type.into(), rule);
        self
    }

    /// Canonical bytes of a descriptor, before hashing.
    pub fn canonical_bytes(&self, descriptor: &CallDescriptor) -> Result<Vec<u8>> {
        let rule = self.rules.get(&descriptor.cache_type);

        let messages = descriptor
            .messages
            .iter()
            .map(|m| Message {
                role: m.role.trim().to_lowercase(),
                content: match rule {
                    Some(rule) => rule.apply(&m.content),
                    None => m.content.clone(),
                },
            })
            .collect();

        let options = descriptor
            .options
            .iter()
            .filter(|(k, _)| !TRANSPORT_OPTION_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.as_str(), sorted_value(v)))
            .collect();

        let canonical = CanonicalCall {
            schema: CANONICAL_SCHEMA,
            cache_type: &descriptor.cache_type,
            namespace: &descriptor.namespace,
            gateway_version: &descriptor.gateway_version,
            content_version: &descriptor.content_version,
            model: &descriptor.model,
            messages,
            options,
        };

        serde_json::to_vec(&canonical)
            .map_err(|e| Error::serialization(format!("Failed to canonicalize call: {}", e)))
    }

    /// Derive the cache key of a descriptor.
    pub fn canonicalize(&self, descriptor: &CallDescriptor) -> Result<CacheKey> {
        let bytes = self.canonical_bytes(descriptor)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(CacheKey::from_raw(format!("{:x}", hasher.finalize())))
    }
}

impl Default for KeyCanonicalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Rebuild nested objects with sorted keys, whatever map order serde_json uses.
fn sorted_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, sorted_value(v))).collect();
            Value::Object(
                sorted
                    .into_iter()
                    .map(|(k, v)| (k.clone(), v))
                    .collect::<Map<String, Value>>(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted_value).collect()),
        other => other.clone(),
    }
}
