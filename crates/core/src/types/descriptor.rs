use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// Call Descriptor
// =============================================================================

/// One conversational turn of a model call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Role (system, user, assistant, tool).
    pub role: String,
    /// Message content.
    pub content: String,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Structured description of a model call, the input to key canonicalization.
///
/// Empty `namespace`, `gateway_version` and `content_version` are filled from
/// gateway configuration before the key is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallDescriptor {
    /// Logical operation tag, e.g. `parameter_extraction`.
    pub cache_type: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub gateway_version: String,
    #[serde(default)]
    pub content_version: String,
    /// Backend model identifier.
    pub model: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Generation parameters. Transport-only keys are ignored for hashing.
    #[serde(default)]
    pub options: BTreeMap<String, Value>,
}

impl CallDescriptor {
    /// Create a descriptor with no messages and no options.
    pub fn new(cache_type: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            cache_type: cache_type.into(),
            namespace: String::new(),
            gateway_version: String::new(),
            content_version: String::new(),
            model: model.into(),
            messages: Vec::new(),
            options: BTreeMap::new(),
        }
    }

    /// Append a message.
    pub fn with_message(mut self, role: impl Into<String>, content: impl Into<String>) -> Self {
        self.messages.push(Message::new(role, content));
        self
    }

    /// Set a generation option.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Set the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set both cache-busting versions.
    pub fn with_versions(
        mut self,
        gateway_version: impl Into<String>,
        content_version: impl Into<String>,
    ) -> Self {
        self.gateway_version = gateway_version.into();
        self.content_version = content_version.into();
        self
    }
}

// =============================================================================
// Cache Key
// =============================================================================

/// Opaque, fixed-length key derived deterministically from a [`CallDescriptor`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wrap an already-derived key, e.g. one received on the admin surface.
    pub fn from_raw(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key of the distributed lock guarding this cache key.
    pub fn lock_key(&self) -> String {
        format!("lock:{}", self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
