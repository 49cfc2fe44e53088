//! Persisted setting rows and cached snapshots

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A persisted setting row.
///
/// `key` is unique and immutable after creation; `value` is the raw string
/// payload and may be ciphertext when the key is in the encrypted-keys list.
/// An empty `validation_rules` string means "no validation"; an empty
/// `config_override` means "no override".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setting {
    pub id: u64,
    pub key: String,
    pub descr: String,
    pub value: String,
    #[serde(default)]
    pub validation_rules: String,
    #[serde(default)]
    pub config_override: String,
    #[serde(default)]
    pub load_on_startup: bool,
    #[serde(default = "default_editable")]
    pub editable: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

fn default_editable() -> bool {
    true
}

/// Fields supplied when creating a new setting row; the store assigns `id`
/// and timestamps.
#[derive(Debug, Clone, Default)]
pub struct SettingDraft {
    pub key: String,
    pub descr: String,
    pub value: String,
    pub validation_rules: String,
    pub config_override: String,
    pub load_on_startup: bool,
    pub editable: bool,
}

impl SettingDraft {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            editable: true,
            ..Self::default()
        }
    }
}

/// Per-key snapshot mirrored across the in-memory map and both cache tiers.
///
/// This is the JSON wire form stored in cache hash fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: String,
    #[serde(default)]
    pub validation_rules: String,
    #[serde(default)]
    pub config_override: String,
}

impl From<&Setting> for CacheEntry {
    fn from(setting: &Setting) -> Self {
        Self {
            value: setting.value.clone(),
            validation_rules: setting.validation_rules.clone(),
            config_override: setting.config_override.clone(),
        }
    }
}
