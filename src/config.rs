//! Engine configuration: extensible type registry and override sink
//!
//! The type registry mirrors what the engine reads from external
//! configuration: per-type validation overrides, recognition heuristics for
//! rule reclassification, and optional custom cast functions.

use crate::cast::SettingValue;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Custom cast function registered for a configured type.
///
/// Returns an error string when the raw value cannot be converted; this is
/// the only cast path that may fail.
pub type CastFn = Arc<dyn Fn(&str) -> std::result::Result<SettingValue, String> + Send + Sync>;

/// A configured semantic type, extending the built-in boolean/integer/
/// numeric/string set.
#[derive(Clone, Default)]
pub struct TypeDef {
    /// Type name as it appears inside rule strings (e.g. "isEmailList")
    pub name: String,

    /// Concrete rule string enforced for this type. When set it replaces the
    /// bare type token during rule resolution (either a pipe-delimited token
    /// list or a single `regex:/…/` rule).
    pub validate: Option<String>,

    /// Recognition heuristics for rule reclassification, each either
    /// `contains:<needle>` or `noContains:<needle>`.
    pub recognize: Vec<String>,

    /// Custom cast function. Fully overrides the built-in cast for this type
    /// name, including the built-in type names themselves.
    pub cast: Option<CastFn>,
}

impl TypeDef {
    /// Create a type definition with just a name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the concrete rule string enforced for this type
    #[must_use]
    pub fn validate(mut self, rule: impl Into<String>) -> Self {
        self.validate = Some(rule.into());
        self
    }

    /// Add a recognition heuristic (`contains:…` / `noContains:…`)
    #[must_use]
    pub fn recognize(mut self, rule: impl Into<String>) -> Self {
        self.recognize.push(rule.into());
        self
    }

    /// Register a custom cast function for this type
    #[must_use]
    pub fn cast_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> std::result::Result<SettingValue, String> + Send + Sync + 'static,
    {
        self.cast = Some(Arc::new(f));
        self
    }
}

impl std::fmt::Debug for TypeDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeDef")
            .field("name", &self.name)
            .field("validate", &self.validate)
            .field("recognize", &self.recognize)
            .field("cast", &self.cast.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

// =============================================================================
// Engine Configuration
// =============================================================================

/// Static configuration snapshot for a [`SettingsEngine`](crate::SettingsEngine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Cache namespace shared by every process pointing at the same backing
    /// store. The builder suffixes it with the store identity so engines over
    /// different stores never collide.
    pub namespace: String,

    /// Master enable flag; when false, startup loading is a no-op.
    pub enabled: bool,

    /// Keys whose values are stored encrypted.
    pub encrypted_keys: Vec<String>,

    /// Configured types, in declaration order. Order matters: configured
    /// types are consulted ahead of the built-ins during type resolution.
    pub types: Vec<TypeDef>,

    /// Staleness bound for the local cache tier, in seconds.
    pub local_expire_secs: u64,

    /// Reload window for the in-memory map, in seconds.
    pub memory_expire_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            namespace: "livecfg:settings".into(),
            enabled: true,
            encrypted_keys: Vec::new(),
            types: Vec::new(),
            local_expire_secs: 300,
            memory_expire_secs: 600,
        }
    }
}

impl EngineConfig {
    /// Look up a configured type by name
    pub fn type_def(&self, name: &str) -> Option<&TypeDef> {
        self.types.iter().find(|t| t.name == name)
    }

    /// Whether the given settings key is stored encrypted
    pub fn is_encrypted_key(&self, key: &str) -> bool {
        self.encrypted_keys.iter().any(|k| k == key)
    }
}

// =============================================================================
// Config-Override Sink
// =============================================================================

/// External configuration slots that settings flagged with `config_override`
/// overwrite at startup.
///
/// Read-write from the engine's perspective: `get` is consulted to decide
/// whether boolean coercion applies, `set` installs the setting's value.
pub trait ConfigSink: Send + Sync {
    /// Current value of a configuration slot, if present
    fn get(&self, key: &str) -> Option<Value>;

    /// Overwrite a configuration slot
    fn set(&self, key: &str, value: Value);
}

/// In-memory [`ConfigSink`] backed by a hash map. Useful for tests and for
/// applications keeping runtime config in process memory.
#[derive(Debug, Default)]
pub struct MemoryConfigSink {
    values: RwLock<HashMap<String, Value>>,
}

impl MemoryConfigSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a slot with an initial value (determines coercion behavior)
    pub fn seed(&self, key: impl Into<String>, value: Value) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value);
    }
}

impl ConfigSink for MemoryConfigSink {
    fn get(&self, key: &str) -> Option<Value> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: Value) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
    }
}

// =============================================================================
// Tests
// =============================================================================
