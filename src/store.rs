//! Backing store for persisted settings
//!
//! The store is the durable source of truth; caches only shadow it. The
//! trait keeps the engine independent of the persistence engine: anything
//! that can look rows up by key and update them atomically qualifies.
//! [`MemoryStore`] backs tests and embedded use; [`JsonStore`] persists the
//! row set to a single JSON file with atomic writes.

use crate::error::{Error, Result};
use crate::model::{Setting, SettingDraft};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use time::OffsetDateTime;

/// Row-level access to persisted settings.
pub trait SettingsStore: Send + Sync {
    /// Find a setting by its unique key
    fn find(&self, key: &str) -> Result<Option<Setting>>;

    /// Create a new setting row; fails with [`Error::DuplicateKey`] if the
    /// key already exists.
    fn create(&self, draft: SettingDraft) -> Result<Setting>;

    /// Update an existing row (matched by id)
    fn update(&self, setting: &Setting) -> Result<()>;

    /// Rows eligible for eager loading: `load_on_startup` set or a non-empty
    /// `config_override`.
    fn startup_rows(&self) -> Result<Vec<Setting>>;

    /// All rows, ordered by id
    fn all(&self) -> Result<Vec<Setting>>;

    /// Bulk-assign a validation rule to the given row ids; returns the
    /// number of rows touched.
    fn set_validation_rules(&self, ids: &[u64], rule: &str) -> Result<usize>;

    /// Whether the store is reachable; startup loading is skipped when not.
    fn available(&self) -> bool {
        true
    }

    /// Identity suffix mixed into the cache namespace so engines over
    /// different stores never share cached state.
    fn identity(&self) -> String {
        String::new()
    }
}

// =============================================================================
// In-Memory Store
// =============================================================================

/// Volatile store for tests and embedded scenarios.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: RwLock<Vec<Setting>>,
    next_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn rows(&self) -> std::sync::RwLockReadGuard<'_, Vec<Setting>> {
        self.rows.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn rows_mut(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Setting>> {
        self.rows.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn materialize(draft: SettingDraft, id: u64) -> Setting {
    let now = OffsetDateTime::now_utc();
    Setting {
        id,
        key: draft.key,
        descr: draft.descr,
        value: draft.value,
        validation_rules: draft.validation_rules,
        config_override: draft.config_override,
        load_on_startup: draft.load_on_startup,
        editable: draft.editable,
        created_at: now,
        updated_at: now,
    }
}

impl SettingsStore for MemoryStore {
    fn find(&self, key: &str) -> Result<Option<Setting>> {
        Ok(self.rows().iter().find(|s| s.key == key).cloned())
    }

    fn create(&self, draft: SettingDraft) -> Result<Setting> {
        if draft.key.is_empty() {
            return Err(Error::Store("setting key must not be empty".into()));
        }
        let mut rows = self.rows_mut();
        if rows.iter().any(|s| s.key == draft.key) {
            return Err(Error::DuplicateKey(draft.key));
        }
        let setting = materialize(draft, self.next_id.fetch_add(1, Ordering::Relaxed));
        rows.push(setting.clone());
        Ok(setting)
    }

    fn update(&self, setting: &Setting) -> Result<()> {
        let mut rows = self.rows_mut();
        let row = rows
            .iter_mut()
            .find(|s| s.id == setting.id)
            .ok_or_else(|| Error::MissingKey(setting.key.clone()))?;
        *row = setting.clone();
        row.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    fn startup_rows(&self) -> Result<Vec<Setting>> {
        Ok(self
            .rows()
            .iter()
            .filter(|s| s.load_on_startup || !s.config_override.is_empty())
            .cloned()
            .collect())
    }

    fn all(&self) -> Result<Vec<Setting>> {
        let mut rows: Vec<Setting> = self.rows().clone();
        rows.sort_by_key(|s| s.id);
        Ok(rows)
    }

    fn set_validation_rules(&self, ids: &[u64], rule: &str) -> Result<usize> {
        let mut rows = self.rows_mut();
        let mut touched = 0;
        for row in rows.iter_mut().filter(|s| ids.contains(&s.id)) {
            row.validation_rules = rule.to_string();
            row.updated_at = OffsetDateTime::now_utc();
            touched += 1;
        }
        Ok(touched)
    }
}

// =============================================================================
// JSON File Store
// =============================================================================

/// File-backed store persisting the full row set as a JSON document.
///
/// Writes are atomic: serialize to a `.tmp` sibling, then rename over the
/// target so a crash never leaves a half-written file.
pub struct JsonStore {
    path: PathBuf,
    rows: RwLock<Vec<Setting>>,
    next_id: AtomicU64,
}

impl JsonStore {
    /// Open (or initialize) a JSON store at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let rows: Vec<Setting> = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| Error::FileRead {
                path: path.display().to_string(),
                source: e,
            })?;
            serde_json::from_str(&content)?
        } else {
            Vec::new()
        };
        let next_id = rows.iter().map(|s| s.id).max().unwrap_or(0) + 1;

        Ok(Self {
            path,
            rows: RwLock::new(rows),
            next_id: AtomicU64::new(next_id),
        })
    }

    fn persist(&self, rows: &[Setting]) -> Result<()> {
        let content = serde_json::to_string_pretty(rows)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::FileWrite {
                path: parent.display().to_string(),
                source: e,
            })?;
        }

        // atomic write: temp file + rename
        let file_name = self.path.file_name().ok_or_else(|| {
            Error::Config(format!(
                "invalid store path '{}': must have a filename",
                self.path.display()
            ))
        })?;
        let mut temp_name = file_name.to_os_string();
        temp_name.push(".tmp");
        let temp_path = self.path.with_file_name(temp_name);

        std::fs::write(&temp_path, &content).map_err(|e| Error::FileWrite {
            path: temp_path.display().to_string(),
            source: e,
        })?;
        std::fs::rename(&temp_path, &self.path).map_err(|e| Error::FileWrite {
            path: self.path.display().to_string(),
            source: e,
        })
    }

    fn rows(&self) -> std::sync::RwLockReadGuard<'_, Vec<Setting>> {
        self.rows.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn rows_mut(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Setting>> {
        self.rows.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for JsonStore {
    fn find(&self, key: &str) -> Result<Option<Setting>> {
        Ok(self.rows().iter().find(|s| s.key == key).cloned())
    }

    fn create(&self, draft: SettingDraft) -> Result<Setting> {
        if draft.key.is_empty() {
            return Err(Error::Store("setting key must not be empty".into()));
        }
        let mut rows = self.rows_mut();
        if rows.iter().any(|s| s.key == draft.key) {
            return Err(Error::DuplicateKey(draft.key));
        }
        let setting = materialize(draft, self.next_id.fetch_add(1, Ordering::Relaxed));
        rows.push(setting.clone());
        self.persist(&rows)?;
        Ok(setting)
    }

    fn update(&self, setting: &Setting) -> Result<()> {
        let mut rows = self.rows_mut();
        let row = rows
            .iter_mut()
            .find(|s| s.id == setting.id)
            .ok_or_else(|| Error::MissingKey(setting.key.clone()))?;
        *row = setting.clone();
        row.updated_at = OffsetDateTime::now_utc();
        self.persist(&rows)
    }

    fn startup_rows(&self) -> Result<Vec<Setting>> {
        Ok(self
            .rows()
            .iter()
            .filter(|s| s.load_on_startup || !s.config_override.is_empty())
            .cloned()
            .collect())
    }

    fn all(&self) -> Result<Vec<Setting>> {
        let mut rows: Vec<Setting> = self.rows().clone();
        rows.sort_by_key(|s| s.id);
        Ok(rows)
    }

    fn set_validation_rules(&self, ids: &[u64], rule: &str) -> Result<usize> {
        let mut rows = self.rows_mut();
        let mut touched = 0;
        for row in rows.iter_mut().filter(|s| ids.contains(&s.id)) {
            row.validation_rules = rule.to_string();
            row.updated_at = OffsetDateTime::now_utc();
            touched += 1;
        }
        if touched > 0 {
            self.persist(&rows)?;
        }
        Ok(touched)
    }

    fn identity(&self) -> String {
        self.path.display().to_string()
    }
}

// =============================================================================
// Helpers shared with tests
// =============================================================================

/// Build a key → row map (handy in tests and bulk operations)
pub fn index_by_key(rows: Vec<Setting>) -> HashMap<String, Setting> {
    rows.into_iter().map(|s| (s.key.clone(), s)).collect()
}

// =============================================================================
// Tests
// =============================================================================
