//! # livecfg
//!
//! Typed, validated key/value settings store with a two-tier cache,
//! rule-driven casting and transparent encryption.
//!
//! Settings are persisted as rows in a backing store and served through a
//! shared cache tier (cross-process) with an optional short-lived local
//! tier. Each setting carries a validation-rule string (pipe-delimited
//! tokens or a single `regex:/…/` rule) that resolves to a semantic type
//! driving both validation and the cast applied on reads. Keys flagged as
//! encrypted have their values wrapped through AES-256-GCM exactly once per
//! write and unwrapped once per read.
//!
//! ## Quick Start
//!
//! ```no_run
//! use livecfg::{MemoryStore, SettingsEngine};
//! use std::sync::Arc;
//!
//! # fn main() -> livecfg::Result<()> {
//! let engine = SettingsEngine::builder()
//!     .store(Arc::new(MemoryStore::new()))
//!     .build()?;
//!
//! engine.update_or_create(
//!     "retry.max",
//!     "Maximum retry attempts",
//!     "5",
//!     Some("integer"),
//!     None,
//!     true,
//! )?;
//!
//! engine.load_on_startup()?;
//! assert_eq!(engine.get_int("retry.max")?, Some(5));
//!
//! engine.set_and_store("retry.max", "8", None, None)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`SettingsEngine`] orchestrates reads and writes: memory map → shared
//!   cache → backing store, with dirty-tracking write-back via
//!   [`store`](SettingsEngine::store).
//! - [`SettingsStore`] is the durable source of truth ([`MemoryStore`],
//!   [`JsonStore`]).
//! - [`CacheBackend`] provides hash-per-namespace cache semantics;
//!   [`TieredCache`] composes the shared and local tiers.
//! - [`RuleValidator`] / [`StandardValidator`] judge raw values against
//!   resolved rule sets; [`TypeDef`] extends the type registry with custom
//!   validation and cast functions.
//! - [`Crypto`] / [`AesGcmCrypto`] wrap values of encrypted keys.

pub mod cache;
pub mod cast;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod model;
pub mod rule;
pub mod store;
pub mod validate;

pub use cache::{CacheBackend, MemoryCache, TieredCache};
pub use cast::SettingValue;
pub use config::{CastFn, ConfigSink, EngineConfig, MemoryConfigSink, TypeDef};
pub use crypto::{AesGcmCrypto, Crypto};
pub use engine::{SettingsEngine, SettingsEngineBuilder};
pub use error::{Error, Result};
pub use model::{CacheEntry, Setting, SettingDraft};
pub use rule::{Rule, RuleSet, RuleToken, patterns};
pub use store::{JsonStore, MemoryStore, SettingsStore};
pub use validate::{RuleValidator, StandardValidator};
