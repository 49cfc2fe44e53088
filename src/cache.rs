//! Cache tiers shadowing the backing store
//!
//! The cache speaks a small hash-per-namespace vocabulary (hget/hset/hdel
//! plus namespace expiry), which maps directly onto Redis hashes while
//! staying trivial to implement in memory. [`TieredCache`] composes a shared
//! tier (authoritative between processes) with an optional local tier that
//! absorbs repeated reads; every cache operation is explicitly fallible so
//! callers decide whether a tier failure degrades or propagates.

use crate::error::{Error, Result};
use crate::model::CacheEntry;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Hash-style cache operations over named namespaces.
pub trait CacheBackend: Send + Sync {
    /// Read one field from a namespace
    fn hget(&self, namespace: &str, field: &str) -> Result<Option<String>>;

    /// Read the whole namespace as a field map
    fn hgetall(&self, namespace: &str) -> Result<HashMap<String, String>>;

    /// Write one field into a namespace
    fn hset(&self, namespace: &str, field: &str, value: &str) -> Result<()>;

    /// Remove one field from a namespace
    fn hdel(&self, namespace: &str, field: &str) -> Result<()>;

    /// Drop an entire namespace
    fn del(&self, namespace: &str) -> Result<()>;

    /// Expire a namespace after `secs` seconds (0 expires immediately)
    fn expire(&self, namespace: &str, secs: u64) -> Result<()>;
}

// =============================================================================
// In-Memory Cache
// =============================================================================

struct Namespace {
    fields: HashMap<String, String>,
    /// unix timestamp past which the namespace counts as gone
    expires_at: Option<i64>,
}

impl Namespace {
    fn expired(&self) -> bool {
        match self.expires_at {
            Some(at) => time::OffsetDateTime::now_utc().unix_timestamp() >= at,
            None => false,
        }
    }
}

/// Process-local cache backend with per-namespace expiry.
#[derive(Default)]
pub struct MemoryCache {
    namespaces: Mutex<HashMap<String, Namespace>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_live<T>(
        &self,
        namespace: &str,
        f: impl FnOnce(Option<&mut Namespace>) -> T,
    ) -> T {
        let mut namespaces = self
            .namespaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if namespaces.get(namespace).is_some_and(Namespace::expired) {
            namespaces.remove(namespace);
        }
        f(namespaces.get_mut(namespace))
    }
}

impl CacheBackend for MemoryCache {
    fn hget(&self, namespace: &str, field: &str) -> Result<Option<String>> {
        Ok(self.with_live(namespace, |ns| {
            ns.and_then(|ns| ns.fields.get(field).cloned())
        }))
    }

    fn hgetall(&self, namespace: &str) -> Result<HashMap<String, String>> {
        Ok(self.with_live(namespace, |ns| {
            ns.map(|ns| ns.fields.clone()).unwrap_or_default()
        }))
    }

    fn hset(&self, namespace: &str, field: &str, value: &str) -> Result<()> {
        let mut namespaces = self
            .namespaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if namespaces.get(namespace).is_some_and(Namespace::expired) {
            namespaces.remove(namespace);
        }
        namespaces
            .entry(namespace.to_string())
            .or_insert_with(|| Namespace {
                fields: HashMap::new(),
                expires_at: None,
            })
            .fields
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    fn hdel(&self, namespace: &str, field: &str) -> Result<()> {
        self.with_live(namespace, |ns| {
            if let Some(ns) = ns {
                ns.fields.remove(field);
            }
        });
        Ok(())
    }

    fn del(&self, namespace: &str) -> Result<()> {
        self.namespaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(namespace);
        Ok(())
    }

    fn expire(&self, namespace: &str, secs: u64) -> Result<()> {
        let at = time::OffsetDateTime::now_utc().unix_timestamp() + secs as i64;
        self.with_live(namespace, |ns| {
            if let Some(ns) = ns {
                ns.expires_at = Some(at);
            }
        });
        Ok(())
    }
}

// =============================================================================
// Tiered Cache
// =============================================================================

/// Shared tier plus optional local tier with a mirroring read path.
///
/// Reads try the local tier first; a local failure only logs and falls
/// through. The shared tier is authoritative, so its read errors propagate
/// and let the caller fall back to the store. Shared hits are mirrored into
/// the local tier best-effort, with the local namespace re-armed to expire
/// after `local_expire_secs`.
pub struct TieredCache {
    shared: Arc<dyn CacheBackend>,
    local: Option<Arc<dyn CacheBackend>>,
    local_expire_secs: u64,
}

impl TieredCache {
    pub fn new(
        shared: Arc<dyn CacheBackend>,
        local: Option<Arc<dyn CacheBackend>>,
        local_expire_secs: u64,
    ) -> Self {
        Self {
            shared,
            local,
            local_expire_secs,
        }
    }

    /// Fetch one entry, local tier first.
    pub fn get_entry(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>> {
        if let Some(local) = &self.local {
            match local.hget(namespace, key) {
                Ok(Some(raw)) => match serde_json::from_str::<CacheEntry>(&raw) {
                    Ok(entry) => return Ok(Some(entry)),
                    Err(e) => {
                        warn!("local cache entry for '{key}' is corrupt, dropping it: {e}");
                        let _ = local.hdel(namespace, key);
                    }
                },
                Ok(None) => {}
                Err(e) => debug!("local cache read for '{key}' failed: {e}"),
            }
        }

        let Some(raw) = self.shared.hget(namespace, key)? else {
            return Ok(None);
        };
        let entry: CacheEntry = serde_json::from_str(&raw)
            .map_err(|e| Error::Cache(format!("shared cache entry for '{key}' is corrupt: {e}")))?;
        self.mirror(namespace, key, &raw);
        Ok(Some(entry))
    }

    /// Fetch the whole namespace, local tier first. A shared-tier fallback
    /// mirrors the field set into the local tier best-effort.
    ///
    /// Any undecodable field invalidates the whole snapshot, since a partial
    /// warm start would hide keys that actually exist. A corrupt local
    /// snapshot is dropped and the read falls through to the shared tier.
    pub fn get_all(&self, namespace: &str) -> Result<HashMap<String, CacheEntry>> {
        if let Some(local) = &self.local {
            match local.hgetall(namespace) {
                Ok(raw) if !raw.is_empty() => match Self::decode_snapshot(&raw) {
                    Ok(entries) => return Ok(entries),
                    Err(e) => {
                        warn!("local cache snapshot is corrupt, dropping it: {e}");
                        let _ = local.del(namespace);
                    }
                },
                Ok(_) => {}
                Err(e) => debug!("local cache snapshot read failed: {e}"),
            }
        }

        let raw = self.shared.hgetall(namespace)?;
        let entries = Self::decode_snapshot(&raw).map_err(Error::Cache)?;
        for (key, value) in &raw {
            self.mirror(namespace, key, value);
        }
        Ok(entries)
    }

    /// Write an entry to the shared tier, mirroring it locally best-effort.
    pub fn put_entry(&self, namespace: &str, key: &str, entry: &CacheEntry) -> Result<()> {
        let raw = serde_json::to_string(entry)?;
        self.shared.hset(namespace, key, &raw)?;
        self.mirror(namespace, key, &raw);
        Ok(())
    }

    /// Remove an entry from both tiers.
    pub fn del_entry(&self, namespace: &str, key: &str) -> Result<()> {
        if let Some(local) = &self.local {
            if let Err(e) = local.hdel(namespace, key) {
                debug!("local cache delete for '{key}' failed: {e}");
            }
        }
        self.shared.hdel(namespace, key)
    }

    /// Drop the whole namespace in both tiers.
    pub fn clear(&self, namespace: &str) -> Result<()> {
        if let Some(local) = &self.local {
            if let Err(e) = local.del(namespace) {
                debug!("local cache clear failed: {e}");
            }
        }
        self.shared.del(namespace)
    }

    /// Drop the local tier's copy of the namespace only; the shared tier
    /// stays warm for other processes.
    pub fn drop_local(&self, namespace: &str) {
        if let Some(local) = &self.local {
            if let Err(e) = local.del(namespace) {
                debug!("local cache clear failed: {e}");
            }
        }
    }

    /// Whether a local tier is configured
    pub fn has_local(&self) -> bool {
        self.local.is_some()
    }

    fn decode_snapshot(
        raw: &HashMap<String, String>,
    ) -> std::result::Result<HashMap<String, CacheEntry>, String> {
        let mut entries = HashMap::with_capacity(raw.len());
        for (key, value) in raw {
            let entry: CacheEntry = serde_json::from_str(value)
                .map_err(|e| format!("cache entry for '{key}' is corrupt: {e}"))?;
            entries.insert(key.clone(), entry);
        }
        Ok(entries)
    }

    fn mirror(&self, namespace: &str, key: &str, raw: &str) {
        let Some(local) = &self.local else { return };
        if let Err(e) = local.hset(namespace, key, raw) {
            debug!("local cache mirror for '{key}' failed: {e}");
            return;
        }
        if let Err(e) = local.expire(namespace, self.local_expire_secs) {
            debug!("local cache expire failed: {e}");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(value: &str) -> CacheEntry {
        CacheEntry {
            value: value.to_string(),
            validation_rules: String::new(),
            config_override: String::new(),
        }
    }

    // ====================
    // MemoryCache
    // ====================

    #[test]
    fn memory_cache_hash_roundtrip() {
        let cache = MemoryCache::new();
        cache.hset("ns", "a", "1").unwrap();
        cache.hset("ns", "b", "2").unwrap();

        assert_eq!(cache.hget("ns", "a").unwrap().as_deref(), Some("1"));
        assert_eq!(cache.hgetall("ns").unwrap().len(), 2);

        cache.hdel("ns", "a").unwrap();
        assert!(cache.hget("ns", "a").unwrap().is_none());

        cache.del("ns").unwrap();
        assert!(cache.hgetall("ns").unwrap().is_empty());
    }

    #[test]
    fn memory_cache_expiry_hides_namespace() {
        let cache = MemoryCache::new();
        cache.hset("ns", "a", "1").unwrap();
        cache.expire("ns", 0).unwrap();

        assert!(cache.hget("ns", "a").unwrap().is_none());
        assert!(cache.hgetall("ns").unwrap().is_empty());
    }

    #[test]
    fn memory_cache_write_resurrects_expired_namespace() {
        let cache = MemoryCache::new();
        cache.hset("ns", "a", "1").unwrap();
        cache.expire("ns", 0).unwrap();

        cache.hset("ns", "b", "2").unwrap();
        assert!(cache.hget("ns", "a").unwrap().is_none());
        assert_eq!(cache.hget("ns", "b").unwrap().as_deref(), Some("2"));
    }

    // ====================
    // TieredCache
    // ====================

    /// Backend that fails every operation, for degradation tests.
    struct BrokenCache;

    impl CacheBackend for BrokenCache {
        fn hget(&self, _: &str, _: &str) -> Result<Option<String>> {
            Err(Error::Cache("backend down".into()))
        }
        fn hgetall(&self, _: &str) -> Result<HashMap<String, String>> {
            Err(Error::Cache("backend down".into()))
        }
        fn hset(&self, _: &str, _: &str, _: &str) -> Result<()> {
            Err(Error::Cache("backend down".into()))
        }
        fn hdel(&self, _: &str, _: &str) -> Result<()> {
            Err(Error::Cache("backend down".into()))
        }
        fn del(&self, _: &str) -> Result<()> {
            Err(Error::Cache("backend down".into()))
        }
        fn expire(&self, _: &str, _: u64) -> Result<()> {
            Err(Error::Cache("backend down".into()))
        }
    }

    #[test]
    fn tiered_reads_local_first() {
        let shared = Arc::new(MemoryCache::new());
        let local = Arc::new(MemoryCache::new());
        let tiered = TieredCache::new(shared.clone(), Some(local.clone()), 300);

        // seed only the local tier; a hit there never touches shared
        let raw = serde_json::to_string(&entry("local-value")).unwrap();
        local.hset("ns", "k", &raw).unwrap();

        let got = tiered.get_entry("ns", "k").unwrap().unwrap();
        assert_eq!(got.value, "local-value");
        assert!(shared.hget("ns", "k").unwrap().is_none());
    }

    #[test]
    fn tiered_shared_hit_mirrors_locally() {
        let shared = Arc::new(MemoryCache::new());
        let local = Arc::new(MemoryCache::new());
        let tiered = TieredCache::new(shared.clone(), Some(local.clone()), 300);

        tiered.put_entry("ns", "k", &entry("v")).unwrap();
        local.del("ns").unwrap();

        let got = tiered.get_entry("ns", "k").unwrap().unwrap();
        assert_eq!(got.value, "v");
        assert!(local.hget("ns", "k").unwrap().is_some());
    }

    #[test]
    fn tiered_local_failure_degrades_to_shared() {
        let shared = Arc::new(MemoryCache::new());
        let tiered = TieredCache::new(shared.clone(), Some(Arc::new(BrokenCache)), 300);

        let raw = serde_json::to_string(&entry("v")).unwrap();
        shared.hset("ns", "k", &raw).unwrap();

        let got = tiered.get_entry("ns", "k").unwrap().unwrap();
        assert_eq!(got.value, "v");
    }

    #[test]
    fn tiered_shared_failure_propagates() {
        let tiered = TieredCache::new(Arc::new(BrokenCache), None, 300);
        assert!(tiered.get_entry("ns", "k").is_err());
        assert!(tiered.put_entry("ns", "k", &entry("v")).is_err());
    }

    #[test]
    fn tiered_corrupt_local_entry_falls_back() {
        let shared = Arc::new(MemoryCache::new());
        let local = Arc::new(MemoryCache::new());
        let tiered = TieredCache::new(shared.clone(), Some(local.clone()), 300);

        local.hset("ns", "k", "not-json").unwrap();
        let raw = serde_json::to_string(&entry("good")).unwrap();
        shared.hset("ns", "k", &raw).unwrap();

        let got = tiered.get_entry("ns", "k").unwrap().unwrap();
        assert_eq!(got.value, "good");
    }

    #[test]
    fn tiered_get_all_prefers_local() {
        let shared = Arc::new(MemoryCache::new());
        let local = Arc::new(MemoryCache::new());
        let tiered = TieredCache::new(shared.clone(), Some(local.clone()), 300);

        let raw = serde_json::to_string(&entry("local-value")).unwrap();
        local.hset("ns", "k", &raw).unwrap();
        let raw = serde_json::to_string(&entry("shared-value")).unwrap();
        shared.hset("ns", "k", &raw).unwrap();

        let all = tiered.get_all("ns").unwrap();
        assert_eq!(all["k"].value, "local-value");
    }

    #[test]
    fn tiered_get_all_corrupt_local_falls_back_to_shared() {
        let shared = Arc::new(MemoryCache::new());
        let local = Arc::new(MemoryCache::new());
        let tiered = TieredCache::new(shared.clone(), Some(local.clone()), 300);

        local.hset("ns", "bad", "not-json").unwrap();
        let raw = serde_json::to_string(&entry("good")).unwrap();
        shared.hset("ns", "k", &raw).unwrap();

        let all = tiered.get_all("ns").unwrap();
        assert_eq!(all["k"].value, "good");
        // the poisoned local snapshot was dropped and re-mirrored
        assert!(local.hget("ns", "bad").unwrap().is_none());
        assert!(local.hget("ns", "k").unwrap().is_some());
    }

    #[test]
    fn tiered_get_all_mirrors_the_snapshot() {
        let shared = Arc::new(MemoryCache::new());
        let local = Arc::new(MemoryCache::new());
        let tiered = TieredCache::new(shared.clone(), Some(local.clone()), 300);

        let raw = serde_json::to_string(&entry("v")).unwrap();
        shared.hset("ns", "a", &raw).unwrap();
        shared.hset("ns", "b", &raw).unwrap();

        let all = tiered.get_all("ns").unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(local.hgetall("ns").unwrap().len(), 2);
    }

    #[test]
    fn tiered_corrupt_shared_snapshot_fails_whole_read() {
        let shared = Arc::new(MemoryCache::new());
        let tiered = TieredCache::new(shared.clone(), None, 300);

        let raw = serde_json::to_string(&entry("good")).unwrap();
        shared.hset("ns", "ok", &raw).unwrap();
        shared.hset("ns", "bad", "not-json").unwrap();

        assert!(tiered.get_all("ns").is_err());
    }

    #[test]
    fn tiered_del_and_clear_hit_both_tiers() {
        let shared = Arc::new(MemoryCache::new());
        let local = Arc::new(MemoryCache::new());
        let tiered = TieredCache::new(shared.clone(), Some(local.clone()), 300);

        tiered.put_entry("ns", "k", &entry("v")).unwrap();
        tiered.del_entry("ns", "k").unwrap();
        assert!(shared.hget("ns", "k").unwrap().is_none());
        assert!(local.hget("ns", "k").unwrap().is_none());

        tiered.put_entry("ns", "k", &entry("v")).unwrap();
        tiered.clear("ns").unwrap();
        assert!(shared.hgetall("ns").unwrap().is_empty());
        assert!(local.hgetall("ns").unwrap().is_empty());
    }

    #[test]
    fn drop_local_leaves_shared_warm() {
        let shared = Arc::new(MemoryCache::new());
        let local = Arc::new(MemoryCache::new());
        let tiered = TieredCache::new(shared.clone(), Some(local.clone()), 300);

        tiered.put_entry("ns", "k", &entry("v")).unwrap();
        tiered.drop_local("ns");

        assert!(local.hget("ns", "k").unwrap().is_none());
        assert!(shared.hget("ns", "k").unwrap().is_some());
    }
}
