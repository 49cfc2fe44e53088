//! Typed values and rule-driven casting
//!
//! Validation confirms a raw string conforms to its rule set; casting then
//! turns it into the typed representation the resolved type calls for.
//! Configured types may register their own cast functions and fully override
//! the built-ins.

use crate::config::TypeDef;
use crate::error::{Error, Result};
use serde::Serialize;

/// A typed setting value produced by the cast pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl SettingValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SettingValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SettingValue::Float(f) => Some(*f),
            SettingValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SettingValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for SettingValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingValue::Bool(b) => write!(f, "{b}"),
            SettingValue::Int(i) => write!(f, "{i}"),
            SettingValue::Float(x) => write!(f, "{x}"),
            SettingValue::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for SettingValue {
    fn from(b: bool) -> Self {
        SettingValue::Bool(b)
    }
}

impl From<i64> for SettingValue {
    fn from(i: i64) -> Self {
        SettingValue::Int(i)
    }
}

impl From<f64> for SettingValue {
    fn from(f: f64) -> Self {
        SettingValue::Float(f)
    }
}

impl From<&str> for SettingValue {
    fn from(s: &str) -> Self {
        SettingValue::Str(s.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(s: String) -> Self {
        SettingValue::Str(s)
    }
}

// =============================================================================
// Built-in Casts
// =============================================================================

/// Canonical truthy/falsy mapping for boolean casts.
///
/// Malformed input degrades to `false`; validation rejects it upstream.
pub fn cast_boolean(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "on" | "yes"
    )
}

/// Integer cast with permissive fallback to 0 for malformed input
pub fn cast_integer(value: &str) -> i64 {
    value.parse().unwrap_or(0)
}

/// Float cast with permissive fallback to 0.0 for malformed input
pub fn cast_numeric(value: &str) -> f64 {
    value.parse().unwrap_or(0.0)
}

/// Cast a validated raw value into its typed representation.
///
/// A configured cast function for `type_name` takes full priority, including
/// over the built-in type names. Otherwise: `boolean`, `integer` and
/// `numeric` use the built-in casts and everything else (including `custom`
/// and unknown types) is string passthrough.
///
/// # Errors
///
/// Only a configured custom cast function may fail; built-ins never do.
pub fn cast_value(key: &str, value: &str, type_name: &str, types: &[TypeDef]) -> Result<SettingValue> {
    if let Some(custom) = types
        .iter()
        .find(|t| t.name == type_name)
        .and_then(|t| t.cast.as_ref())
    {
        return custom(value).map_err(|reason| Error::Cast {
            key: key.to_string(),
            type_name: type_name.to_string(),
            reason,
        });
    }

    Ok(match type_name {
        "boolean" => SettingValue::Bool(cast_boolean(value)),
        "integer" => SettingValue::Int(cast_integer(value)),
        "numeric" => SettingValue::Float(cast_numeric(value)),
        _ => SettingValue::Str(value.to_string()),
    })
}

// =============================================================================
// Tests
// =============================================================================
