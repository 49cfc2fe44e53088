//! Settings engine: the orchestrator tying store, cache tiers, validation,
//! casting and encryption together
//!
//! Each process holds its own engine instance with a private in-memory map
//! and dirty set; the shared cache tier is the cross-process coordination
//! point and the backing store is the durable source of truth. Reads resolve
//! through the in-memory map, then the shared cache, then the store; writes
//! go to memory and the shared cache immediately and reach the store on
//! [`SettingsEngine::store`].
//!
//! Read-path failures prefer availability: an invalid stored value logs a
//! warning and degrades to the caller's default. Decrypt failures are the
//! exception and always propagate, since masking a rotated master key with a
//! default would hide operational misconfiguration. Write-path failures
//! always propagate and commit nothing.

mod builder;
mod reclassify;

pub use builder::SettingsEngineBuilder;

use crate::cache::TieredCache;
use crate::cast::{SettingValue, cast_value};
use crate::config::{ConfigSink, EngineConfig};
use crate::crypto::Crypto;
use crate::error::{Error, Result};
use crate::model::{CacheEntry, Setting, SettingDraft};
use crate::rule::{resolve_rules, resolve_type};
use crate::store::SettingsStore;
use crate::validate::RuleValidator;
use log::{debug, info, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use time::OffsetDateTime;

/// Typed, validated settings store front-end.
///
/// Construct through [`SettingsEngine::builder`]. All methods take `&self`;
/// internal state is synchronized so one instance can be shared across
/// threads behind an [`Arc`].
pub struct SettingsEngine {
    config: EngineConfig,
    store: Arc<dyn SettingsStore>,
    cache: TieredCache,
    crypto: Option<Arc<dyn Crypto>>,
    validator: Arc<dyn RuleValidator>,
    override_sink: Option<Arc<dyn ConfigSink>>,

    /// In-memory map of currently loaded settings
    settings: RwLock<HashMap<String, CacheEntry>>,
    /// Keys mutated since the last flush, mapped to their state at
    /// dirty-start (None for keys with no prior state) so repeated sets and
    /// reverts coalesce into at most one write-back.
    dirty: Mutex<HashMap<String, Option<CacheEntry>>>,
    /// Unix timestamp of the last startup load, None before the first
    last_loaded: RwLock<Option<i64>>,
    /// Reload window, mutable at runtime via [`Self::set_memory_expire`]
    memory_expire_secs: AtomicU64,
}

fn now_ts() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

impl SettingsEngine {
    /// Start building an engine
    pub fn builder() -> SettingsEngineBuilder {
        SettingsEngineBuilder::new()
    }

    /// The engine's configuration snapshot
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The cache namespace this engine reads and writes
    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    /// Change the in-memory reload window at runtime
    pub fn set_memory_expire(&self, secs: u64) {
        self.memory_expire_secs.store(secs, Ordering::Relaxed);
    }

    // =========================================================================
    // Read Path
    // =========================================================================

    /// Read a setting as its typed value.
    ///
    /// Returns `Ok(None)` when the key does not exist or its stored value no
    /// longer satisfies its own rule (logged, never raised). Decrypt failures
    /// propagate.
    pub fn get(&self, key: &str) -> Result<Option<SettingValue>> {
        let Some((plain, rule)) = self.read_plain(key)? else {
            return Ok(None);
        };
        if !self.passes(key, &plain, &rule) {
            return Ok(None);
        }
        let type_name = resolve_type(&rule, &self.config.types);
        cast_value(key, &plain, type_name, &self.config.types).map(Some)
    }

    /// Read a setting, falling back to `default` on miss or invalid value
    pub fn get_or(&self, key: &str, default: impl Into<SettingValue>) -> Result<SettingValue> {
        Ok(self.get(key)?.unwrap_or_else(|| default.into()))
    }

    /// Read the raw string value, skipping validation and cast entirely.
    /// Encrypted values are still decrypted.
    pub fn get_raw(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_plain(key)?.map(|(plain, _)| plain))
    }

    /// Read the validated value in its pre-cast string form
    pub fn get_as_string(&self, key: &str) -> Result<Option<String>> {
        let Some((plain, rule)) = self.read_plain(key)? else {
            return Ok(None);
        };
        if !self.passes(key, &plain, &rule) {
            return Ok(None);
        }
        Ok(Some(plain))
    }

    /// Whether the key exists and its stored value satisfies its rule.
    /// Missing keys, invalid values and decrypt failures all report false.
    pub fn is_valid(&self, key: &str) -> bool {
        match self.read_plain(key) {
            Ok(Some((plain, rule))) => {
                rule.is_empty() || self.validate_value(key, &plain, &rule).is_ok()
            }
            Ok(None) => false,
            Err(_) => false,
        }
    }

    /// Typed convenience accessor
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        Ok(self.get(key)?.and_then(|v| v.as_bool()))
    }

    /// Typed convenience accessor
    pub fn get_int(&self, key: &str) -> Result<Option<i64>> {
        Ok(self.get(key)?.and_then(|v| v.as_i64()))
    }

    /// Typed convenience accessor
    pub fn get_float(&self, key: &str) -> Result<Option<f64>> {
        Ok(self.get(key)?.and_then(|v| v.as_f64()))
    }

    /// Resolve a key to its decrypted value and rule string: memory map
    /// first, then shared cache, then the backing store.
    fn read_plain(&self, key: &str) -> Result<Option<(String, String)>> {
        if let Err(e) = self.check_expire() {
            warn!("expiry check failed, continuing with possibly stale state: {e}");
        }

        if let Some(entry) = self.memory_entry(key) {
            let plain = self.decrypt_if_needed(key, &entry.value)?;
            return Ok(Some((plain, entry.validation_rules)));
        }

        match self.cache.get_entry(&self.config.namespace, key) {
            Ok(Some(entry)) => {
                let plain = self.decrypt_if_needed(key, &entry.value)?;
                let rule = entry.validation_rules.clone();
                self.remember(key, entry);
                return Ok(Some((plain, rule)));
            }
            Ok(None) => {}
            Err(e) => warn!("shared cache read for '{key}' failed, falling back to store: {e}"),
        }

        let Some(setting) = self.store.find(key)? else {
            return Ok(None);
        };
        let plain = self.decrypt_if_needed(key, &setting.value)?;
        let entry = CacheEntry::from(&setting);
        if let Err(e) = self
            .cache
            .put_entry(&self.config.namespace, key, &entry)
        {
            warn!("populating shared cache for '{key}' failed: {e}");
        }
        let rule = entry.validation_rules.clone();
        self.remember(key, entry);
        Ok(Some((plain, rule)))
    }

    fn passes(&self, key: &str, plain: &str, rule: &str) -> bool {
        if rule.is_empty() {
            return true;
        }
        match self.validate_value(key, plain, rule) {
            Ok(()) => true,
            Err(e) => {
                warn!("stored value for '{key}' fails its own rule, degrading to default: {e}");
                false
            }
        }
    }

    // =========================================================================
    // Write Path
    // =========================================================================

    /// Set a key's value in memory and the shared cache, marking it dirty
    /// for the next [`store`](Self::store).
    ///
    /// When `rule` is `None` the key's cached rule is reused, falling back
    /// to the persisted row when no tier holds the key; rules are sticky
    /// unless explicitly respecified. Same for `config_override`.
    /// Validation runs eagerly against the plaintext: an invalid value
    /// aborts the set and leaves prior state untouched.
    pub fn set(
        &self,
        key: &str,
        value: &str,
        rule: Option<&str>,
        config_override: Option<&str>,
    ) -> Result<&Self> {
        // sticky rules survive for keys this process never read: a tier
        // miss falls back to the persisted row
        let prior = match self.cached_entry(key) {
            Some(entry) => Some(entry),
            None => self.store.find(key)?.map(|row| CacheEntry::from(&row)),
        };

        let rule = match rule {
            Some(r) => r.to_string(),
            None => prior
                .as_ref()
                .map(|e| e.validation_rules.clone())
                .unwrap_or_default(),
        };
        let config_override = match config_override {
            Some(o) => o.to_string(),
            None => prior
                .as_ref()
                .map(|e| e.config_override.clone())
                .unwrap_or_default(),
        };

        // fast path: identical (value, rule) pair leaves everything untouched
        if let Some(prev) = &prior {
            if prev.validation_rules == rule {
                if let Ok(prev_plain) = self.decrypt_if_needed(key, &prev.value) {
                    if prev_plain == value {
                        debug!("set('{key}') is a no-op, value unchanged");
                        return Ok(self);
                    }
                }
            }
        }

        if !rule.is_empty() {
            self.validate_value(key, value, &rule)?;
        }
        let stored_value = self.encrypt_if_needed(key, value)?;

        // remember the dirty-start state so repeated sets and reverts
        // coalesce into one flush
        {
            let mut dirty = self.dirty.lock().unwrap_or_else(PoisonError::into_inner);
            dirty.entry(key.to_string()).or_insert_with(|| prior.clone());
        }

        let entry = CacheEntry {
            value: stored_value,
            validation_rules: rule,
            config_override,
        };
        if let Err(e) = self
            .cache
            .put_entry(&self.config.namespace, key, &entry)
        {
            warn!("shared cache write for '{key}' failed, tiers may diverge until reload: {e}");
        }
        self.remember(key, entry);
        Ok(self)
    }

    /// Flush every dirty key to the backing store.
    ///
    /// Keys whose value never actually changed are skipped. A dirty key with
    /// no backing record fails with [`Error::MissingKey`]; records are only
    /// ever created through [`update_or_create`](Self::update_or_create).
    pub fn store(&self) -> Result<&Self> {
        let dirty_keys: Vec<(String, Option<CacheEntry>)> = {
            let dirty = self.dirty.lock().unwrap_or_else(PoisonError::into_inner);
            dirty
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };

        for (key, baseline) in dirty_keys {
            let Some(entry) = self.memory_entry(&key) else {
                self.clear_dirty(&key);
                continue;
            };
            // reverted to its dirty-start state, nothing to flush
            if baseline.as_ref() == Some(&entry) {
                self.clear_dirty(&key);
                continue;
            }

            let Some(mut row) = self.store.find(&key)? else {
                return Err(Error::MissingKey(key));
            };
            if row.value == entry.value
                && row.validation_rules == entry.validation_rules
                && row.config_override == entry.config_override
            {
                self.clear_dirty(&key);
                continue;
            }

            row.value = entry.value;
            row.validation_rules = entry.validation_rules;
            row.config_override = entry.config_override;
            self.store.update(&row)?;
            debug!("flushed '{key}' to the backing store");
            self.clear_dirty(&key);
        }
        Ok(self)
    }

    /// [`set`](Self::set) followed by [`store`](Self::store)
    pub fn set_and_store(
        &self,
        key: &str,
        value: &str,
        rule: Option<&str>,
        config_override: Option<&str>,
    ) -> Result<&Self> {
        self.set(key, value, rule, config_override)?.store()
    }

    /// Create a backing-store record, or update it if the key already
    /// exists. This is the only path that may create new keys.
    ///
    /// When `rule` is `None` an existing record keeps its current rule.
    /// Touches the store only; caches pick the row up on the next read.
    pub fn update_or_create(
        &self,
        key: &str,
        descr: &str,
        value: &str,
        rule: Option<&str>,
        config_override: Option<&str>,
        load_on_startup: bool,
    ) -> Result<Setting> {
        let existing = self.store.find(key)?;

        let rule = match rule {
            Some(r) => r.to_string(),
            None => existing
                .as_ref()
                .map(|s| s.validation_rules.clone())
                .unwrap_or_default(),
        };
        if !rule.is_empty() {
            self.validate_value(key, value, &rule)?;
        }
        let stored_value = self.encrypt_if_needed(key, value)?;
        let config_override = match config_override {
            Some(o) => o.to_string(),
            None => existing
                .as_ref()
                .map(|s| s.config_override.clone())
                .unwrap_or_default(),
        };

        match existing {
            Some(mut row) => {
                row.descr = descr.to_string();
                row.value = stored_value;
                row.validation_rules = rule;
                row.config_override = config_override;
                row.load_on_startup = load_on_startup;
                self.store.update(&row)?;
                Ok(row)
            }
            None => {
                let draft = SettingDraft {
                    key: key.to_string(),
                    descr: descr.to_string(),
                    value: stored_value,
                    validation_rules: rule,
                    config_override,
                    load_on_startup,
                    editable: true,
                };
                let row = self.store.create(draft)?;
                info!("created setting '{key}'");
                Ok(row)
            }
        }
    }

    /// [`update_or_create`](Self::update_or_create) with the `url` rule
    pub fn update_or_create_url(&self, key: &str, descr: &str, value: &str) -> Result<Setting> {
        self.update_or_create(key, descr, value, Some("url"), None, false)
    }

    /// [`update_or_create`](Self::update_or_create) with the `email` rule
    pub fn update_or_create_email(&self, key: &str, descr: &str, value: &str) -> Result<Setting> {
        self.update_or_create(key, descr, value, Some("email"), None, false)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Eagerly load settings into memory and the shared cache.
    ///
    /// A warm shared-cache snapshot (non-empty, fully decodable) is adopted
    /// wholesale without touching the store. Otherwise rows flagged
    /// `load_on_startup` or carrying a `config_override` are loaded from the
    /// store, validating each with log-and-skip on bad rows.
    ///
    /// Returns `Ok(false)` without doing anything when the engine is
    /// disabled or the store is unreachable.
    pub fn load_on_startup(&self) -> Result<bool> {
        if !self.config.enabled {
            debug!("engine disabled, skipping startup load");
            return Ok(false);
        }
        if !self.store.available() {
            warn!("backing store unavailable, skipping startup load");
            return Ok(false);
        }

        match self.cache.get_all(&self.config.namespace) {
            Ok(snapshot) if !snapshot.is_empty() => {
                let count = snapshot.len();
                *self
                    .settings
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = snapshot;
                *self
                    .last_loaded
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = Some(now_ts());
                info!("warm-started {count} settings from the shared cache");
                return Ok(true);
            }
            Ok(_) => {}
            // a single corrupt field poisons the whole snapshot
            Err(e) => warn!("shared cache snapshot rejected, reloading from store: {e}"),
        }

        let rows = self.store.startup_rows()?;
        let mut loaded = 0usize;
        for row in rows {
            let plain = match self.decrypt_if_needed(&row.key, &row.value) {
                Ok(p) => p,
                Err(e) => {
                    warn!("skipping '{}' during startup load: {e}", row.key);
                    continue;
                }
            };
            if !row.validation_rules.is_empty() {
                if let Err(e) = self.validate_value(&row.key, &plain, &row.validation_rules) {
                    warn!("skipping '{}' during startup load: {e}", row.key);
                    continue;
                }
            }
            let entry = CacheEntry::from(&row);
            if let Err(e) = self
                .cache
                .put_entry(&self.config.namespace, &row.key, &entry)
            {
                warn!("populating shared cache for '{}' failed: {e}", row.key);
            }
            self.remember(&row.key, entry);
            loaded += 1;
        }
        *self
            .last_loaded
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(now_ts());
        info!("loaded {loaded} settings from the backing store");
        Ok(true)
    }

    /// Push loaded settings into the external configuration sink.
    ///
    /// For every loaded setting with a non-empty `config_override`, each
    /// pipe-delimited slot name receives the setting's value. When the slot
    /// currently holds a boolean the value is coerced to one (empty, `"0"`
    /// and `"false"` count as false).
    pub fn override_config(&self) -> Result<bool> {
        let Some(sink) = &self.override_sink else {
            return Ok(false);
        };

        let overriding: Vec<(String, CacheEntry)> = {
            let settings = self.settings.read().unwrap_or_else(PoisonError::into_inner);
            settings
                .iter()
                .filter(|(_, e)| !e.config_override.is_empty())
                .map(|(k, e)| (k.clone(), e.clone()))
                .collect()
        };

        for (key, entry) in overriding {
            let plain = self.decrypt_if_needed(&key, &entry.value)?;
            for slot in entry.config_override.split('|').filter(|s| !s.is_empty()) {
                let value = match sink.get(slot) {
                    Some(Value::Bool(_)) => Value::Bool(
                        !(plain.is_empty() || plain == "0" || plain.eq_ignore_ascii_case("false")),
                    ),
                    _ => Value::String(plain.clone()),
                };
                debug!("overriding config slot '{slot}' from setting '{key}'");
                sink.set(slot, value);
            }
        }
        Ok(true)
    }

    /// Drop a key from memory and both cache tiers. Used when the backing
    /// record was deleted externally. Cache trouble is logged, not raised.
    pub fn remove(&self, key: &str) -> &Self {
        self.settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        self.clear_dirty(key);
        if let Err(e) = self.cache.del_entry(&self.config.namespace, key) {
            warn!("evicting '{key}' from the shared cache failed: {e}");
        }
        self
    }

    /// Drop the whole cache namespace and this engine's in-memory map.
    /// Operator escape hatch; fails soft. Returns whether the shared tier
    /// was actually cleared.
    pub fn clear_cache(&self) -> bool {
        self.settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        *self
            .last_loaded
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
        match self.cache.clear(&self.config.namespace) {
            Ok(()) => true,
            Err(e) => {
                warn!("clearing the shared cache failed: {e}");
                false
            }
        }
    }

    /// Lazy staleness check run at the top of every read.
    ///
    /// Past `local_expire` the local cache tier is evicted so it cannot
    /// silently diverge; past the memory-expire window the in-memory map is
    /// cleared and the startup load re-run.
    fn check_expire(&self) -> Result<()> {
        let last = *self
            .last_loaded
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        match last {
            None => {
                self.load_on_startup()?;
            }
            Some(ts) => {
                let now = now_ts();
                if now >= ts + self.config.local_expire_secs as i64 {
                    self.cache.drop_local(&self.config.namespace);
                }
                if now >= ts + self.memory_expire_secs.load(Ordering::Relaxed) as i64 {
                    debug!("in-memory settings expired, reloading");
                    self.settings
                        .write()
                        .unwrap_or_else(PoisonError::into_inner)
                        .clear();
                    self.load_on_startup()?;
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn memory_entry(&self, key: &str) -> Option<CacheEntry> {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Last-known entry without falling back to the store; used for sticky
    /// rules and the no-op fast path on set.
    fn cached_entry(&self, key: &str) -> Option<CacheEntry> {
        if let Some(entry) = self.memory_entry(key) {
            return Some(entry);
        }
        match self.cache.get_entry(&self.config.namespace, key) {
            Ok(found) => found,
            Err(e) => {
                debug!("shared cache read for '{key}' failed: {e}");
                None
            }
        }
    }

    fn remember(&self, key: &str, entry: CacheEntry) {
        self.settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), entry);
    }

    fn clear_dirty(&self, key: &str) {
        self.dirty
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    fn validate_value(&self, key: &str, value: &str, rule: &str) -> Result<()> {
        let rules = resolve_rules(rule, &self.config.types);
        self.validator
            .validate(value, &rules)
            .map_err(|reason| Error::Validation {
                key: key.to_string(),
                value: value.to_string(),
                reason,
            })
    }

    fn decrypt_if_needed(&self, key: &str, value: &str) -> Result<String> {
        if !self.config.is_encrypted_key(key) {
            return Ok(value.to_string());
        }
        let crypto = self.crypto.as_ref().ok_or_else(|| {
            Error::Crypto(format!(
                "key '{key}' is flagged encrypted but no crypto is configured"
            ))
        })?;
        crypto.decrypt(key, value)
    }

    fn encrypt_if_needed(&self, key: &str, value: &str) -> Result<String> {
        if !self.config.is_encrypted_key(key) {
            return Ok(value.to_string());
        }
        let crypto = self.crypto.as_ref().ok_or_else(|| {
            Error::Crypto(format!(
                "key '{key}' is flagged encrypted but no crypto is configured"
            ))
        })?;
        crypto.encrypt(value)
    }
}

impl std::fmt::Debug for SettingsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsEngine")
            .field("namespace", &self.config.namespace)
            .field("enabled", &self.config.enabled)
            .field("encrypted_keys", &self.config.encrypted_keys.len())
            .finish_non_exhaustive()
    }
}
