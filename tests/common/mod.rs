//! Shared test fixtures
#![allow(dead_code)]

use livecfg::{
    AesGcmCrypto, MemoryCache, MemoryConfigSink, MemoryStore, SettingsEngine, SettingValue,
    TypeDef,
};
use std::sync::Arc;

/// Engine wired over in-memory collaborators, with handles kept on each so
/// tests can observe and manipulate them directly.
pub struct Fixture {
    pub engine: SettingsEngine,
    pub store: Arc<MemoryStore>,
    pub shared: Arc<MemoryCache>,
    pub local: Arc<MemoryCache>,
    pub sink: Arc<MemoryConfigSink>,
}

/// A custom type validating comma-separated numeric lists and casting them
/// to their element count.
pub fn csv_count_type() -> TypeDef {
    TypeDef::new("csvCount")
        .validate("regex:/(^[0-9,]+$)|(^.{0}$)/")
        .recognize("contains:,")
        .cast_with(|raw| {
            if raw.is_empty() {
                return Ok(SettingValue::Int(0));
            }
            Ok(SettingValue::Int(raw.split(',').count() as i64))
        })
}

pub fn fixture() -> Fixture {
    fixture_with(|b| b)
}

pub fn fixture_with(
    configure: impl FnOnce(livecfg::SettingsEngineBuilder) -> livecfg::SettingsEngineBuilder,
) -> Fixture {
    let _ = env_logger::builder().is_test(true).try_init();

    let store = Arc::new(MemoryStore::new());
    let shared = Arc::new(MemoryCache::new());
    let local = Arc::new(MemoryCache::new());
    let sink = Arc::new(MemoryConfigSink::new());

    let builder = SettingsEngine::builder()
        .store(store.clone())
        .shared_cache(shared.clone())
        .local_cache(local.clone())
        .override_sink(sink.clone())
        .register_type(csv_count_type());

    let engine = configure(builder)
        .build()
        .expect("fixture engine builds");

    Fixture {
        engine,
        store,
        shared,
        local,
        sink,
    }
}

/// Fixture with crypto configured and `secret.token` flagged encrypted.
/// Returns the key so a second engine can share (or rotate) it.
pub fn encrypted_fixture() -> (Fixture, [u8; 32]) {
    let key = AesGcmCrypto::generate_key();
    let fx = fixture_with(|b| {
        b.crypto(Arc::new(AesGcmCrypto::new(&key).expect("valid key")))
            .encrypt_key("secret.token")
    });
    (fx, key)
}
