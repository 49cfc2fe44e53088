//! Fluent construction of [`SettingsEngine`] instances

use super::SettingsEngine;
use crate::cache::{CacheBackend, MemoryCache, TieredCache};
use crate::config::{ConfigSink, EngineConfig, TypeDef};
use crate::crypto::Crypto;
use crate::error::{Error, Result};
use crate::store::SettingsStore;
use crate::validate::{RuleValidator, StandardValidator};
use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex, RwLock};

/// Builder for [`SettingsEngine`].
///
/// A backing store is the only required piece. The shared cache defaults to
/// an in-process [`MemoryCache`]; the local tier is off unless configured.
pub struct SettingsEngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn SettingsStore>>,
    shared_cache: Option<Arc<dyn CacheBackend>>,
    local_cache: Option<Arc<dyn CacheBackend>>,
    crypto: Option<Arc<dyn Crypto>>,
    validator: Arc<dyn RuleValidator>,
    override_sink: Option<Arc<dyn ConfigSink>>,
}

impl SettingsEngineBuilder {
    pub(super) fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            store: None,
            shared_cache: None,
            local_cache: None,
            crypto: None,
            validator: Arc::new(StandardValidator),
            override_sink: None,
        }
    }

    /// Set the backing store (required)
    #[must_use]
    pub fn store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the shared cache tier; defaults to an in-process [`MemoryCache`]
    #[must_use]
    pub fn shared_cache(mut self, cache: Arc<dyn CacheBackend>) -> Self {
        self.shared_cache = Some(cache);
        self
    }

    /// Configure a local cache tier shadowing the shared one
    #[must_use]
    pub fn local_cache(mut self, cache: Arc<dyn CacheBackend>) -> Self {
        self.local_cache = Some(cache);
        self
    }

    /// Set the encryption primitive used for encrypted keys
    #[must_use]
    pub fn crypto(mut self, crypto: Arc<dyn Crypto>) -> Self {
        self.crypto = Some(crypto);
        self
    }

    /// Replace the rule validator; defaults to [`StandardValidator`]
    #[must_use]
    pub fn validator(mut self, validator: Arc<dyn RuleValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// Set the sink receiving `config_override` values at startup
    #[must_use]
    pub fn override_sink(mut self, sink: Arc<dyn ConfigSink>) -> Self {
        self.override_sink = Some(sink);
        self
    }

    /// Base cache namespace; the store identity is appended on build
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.namespace = namespace.into();
        self
    }

    /// Flag a key as stored encrypted
    #[must_use]
    pub fn encrypt_key(mut self, key: impl Into<String>) -> Self {
        self.config.encrypted_keys.push(key.into());
        self
    }

    /// Replace the encrypted-key list
    #[must_use]
    pub fn encrypted_keys(mut self, keys: Vec<String>) -> Self {
        self.config.encrypted_keys = keys;
        self
    }

    /// Register a configured type (consulted ahead of the built-ins)
    #[must_use]
    pub fn register_type(mut self, def: TypeDef) -> Self {
        self.config.types.push(def);
        self
    }

    /// Replace the configured-type list
    #[must_use]
    pub fn types(mut self, types: Vec<TypeDef>) -> Self {
        self.config.types = types;
        self
    }

    /// Staleness bound for the local cache tier, in seconds
    #[must_use]
    pub fn local_expire(mut self, secs: u64) -> Self {
        self.config.local_expire_secs = secs;
        self
    }

    /// Reload window for the in-memory map, in seconds
    #[must_use]
    pub fn memory_expire(mut self, secs: u64) -> Self {
        self.config.memory_expire_secs = secs;
        self
    }

    /// Master enable flag; a disabled engine skips startup loading
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    /// Build the engine.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when no store was supplied, or when
    /// encrypted keys are configured without a crypto implementation.
    pub fn build(mut self) -> Result<SettingsEngine> {
        let store = self
            .store
            .take()
            .ok_or_else(|| Error::Config("a backing store is required".into()))?;

        if !self.config.encrypted_keys.is_empty() && self.crypto.is_none() {
            return Err(Error::Config(
                "encrypted keys are configured but no crypto implementation was supplied".into(),
            ));
        }

        // engines over different stores must never share cached state
        let identity = store.identity();
        if !identity.is_empty() {
            self.config.namespace = format!("{}:{identity}", self.config.namespace);
        }

        let shared = self
            .shared_cache
            .unwrap_or_else(|| Arc::new(MemoryCache::new()));
        let cache = TieredCache::new(shared, self.local_cache, self.config.local_expire_secs);
        let memory_expire = AtomicU64::new(self.config.memory_expire_secs);

        Ok(SettingsEngine {
            config: self.config,
            store,
            cache,
            crypto: self.crypto,
            validator: self.validator,
            override_sink: self.override_sink,
            settings: RwLock::new(HashMap::new()),
            dirty: Mutex::new(HashMap::new()),
            last_loaded: RwLock::new(None),
            memory_expire_secs: memory_expire,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn build_requires_a_store() {
        let err = SettingsEngine::builder().build().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn encrypted_keys_require_crypto() {
        let err = SettingsEngine::builder()
            .store(Arc::new(MemoryStore::new()))
            .encrypt_key("secret.token")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn namespace_gains_store_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = crate::store::JsonStore::open(&path).unwrap();

        let engine = SettingsEngine::builder()
            .store(Arc::new(store))
            .namespace("app:settings")
            .build()
            .unwrap();

        assert!(engine.namespace().starts_with("app:settings:"));
        assert!(engine.namespace().ends_with("settings.json"));
    }
}
