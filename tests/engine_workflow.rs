//! End-to-end engine behavior over in-memory collaborators

mod common;

use common::{fixture, fixture_with};
use livecfg::{CacheBackend, ConfigSink, Error, SettingValue, SettingsStore};
use serde_json::json;

// =============================================================================
// Read / Write Round-Trips
// =============================================================================

#[test]
fn integer_setting_round_trips_typed() {
    let fx = fixture();
    fx.engine
        .update_or_create("retry.max", "Max retries", "42", Some("integer"), None, false)
        .unwrap();

    assert_eq!(fx.engine.get("retry.max").unwrap(), Some(SettingValue::Int(42)));
    assert_eq!(fx.engine.get_int("retry.max").unwrap(), Some(42));
    assert_eq!(
        fx.engine.get_as_string("retry.max").unwrap().as_deref(),
        Some("42")
    );
}

#[test]
fn invalid_value_aborts_set() {
    let fx = fixture();
    fx.engine
        .update_or_create("retry.max", "", "42", Some("integer"), None, false)
        .unwrap();

    let err = fx.engine.set("retry.max", "abc", None, None).unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
    // prior state untouched
    assert_eq!(fx.engine.get_int("retry.max").unwrap(), Some(42));
}

#[test]
fn nullable_rule_accepts_empty_value() {
    let fx = fixture();
    fx.engine
        .update_or_create("mail.cc", "", "", Some("nullable|email"), None, false)
        .unwrap();

    assert_eq!(fx.engine.get_as_string("mail.cc").unwrap().as_deref(), Some(""));
}

#[test]
fn required_is_injected_for_plain_rules() {
    let fx = fixture();
    let err = fx
        .engine
        .update_or_create("mail.from", "", "", Some("email"), None, false)
        .unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
}

#[test]
fn regex_rule_round_trips_as_string() {
    let fx = fixture();
    fx.engine
        .update_or_create(
            "ids.allowed",
            "",
            "17,15",
            Some("regex:/(^[0-9,]+$)|(^.{0}$)/"),
            None,
            false,
        )
        .unwrap();

    assert_eq!(
        fx.engine.get("ids.allowed").unwrap(),
        Some(SettingValue::Str("17,15".into()))
    );
}

#[test]
fn custom_type_uses_registered_cast() {
    let fx = fixture();
    fx.engine
        .update_or_create("ids.allowed", "", "17,15,3", Some("csvCount"), None, false)
        .unwrap();

    assert_eq!(fx.engine.get_int("ids.allowed").unwrap(), Some(3));
}

#[test]
fn boolean_setting_casts() {
    let fx = fixture();
    fx.engine
        .update_or_create("feature.on", "", "1", Some("boolean"), None, false)
        .unwrap();
    assert_eq!(fx.engine.get_bool("feature.on").unwrap(), Some(true));
}

#[test]
fn missing_key_reads_as_none_and_default() {
    let fx = fixture();
    assert_eq!(fx.engine.get("nope").unwrap(), None);
    assert_eq!(
        fx.engine.get_or("nope", 7i64).unwrap(),
        SettingValue::Int(7)
    );
    assert!(!fx.engine.is_valid("nope"));
}

#[test]
fn corrupt_stored_value_degrades_to_default() {
    let fx = fixture();
    // created without a rule, then a rule is attached on top of a value
    // that cannot satisfy it
    fx.engine
        .update_or_create("retry.max", "", "abc", None, None, false)
        .unwrap();
    let row = fx.store.find("retry.max").unwrap().unwrap();
    fx.store
        .set_validation_rules(&[row.id], "integer")
        .unwrap();

    assert_eq!(fx.engine.get("retry.max").unwrap(), None);
    assert_eq!(
        fx.engine.get_or("retry.max", 9i64).unwrap(),
        SettingValue::Int(9)
    );
    assert!(!fx.engine.is_valid("retry.max"));
    // raw read still hands out the stored string
    assert_eq!(fx.engine.get_raw("retry.max").unwrap().as_deref(), Some("abc"));
}

// =============================================================================
// Set / Store Write-Back
// =============================================================================

#[test]
fn set_is_visible_before_store() {
    let fx = fixture();
    fx.engine
        .update_or_create("app.mode", "", "live", None, None, false)
        .unwrap();

    fx.engine.set("app.mode", "maintenance", None, None).unwrap();
    assert_eq!(
        fx.engine.get_as_string("app.mode").unwrap().as_deref(),
        Some("maintenance")
    );
    // the backing store still holds the old value until store()
    assert_eq!(fx.store.find("app.mode").unwrap().unwrap().value, "live");

    fx.engine.store().unwrap();
    assert_eq!(
        fx.store.find("app.mode").unwrap().unwrap().value,
        "maintenance"
    );
}

#[test]
fn store_on_unknown_key_is_missing_key_error() {
    let fx = fixture();
    fx.engine.set("ghost", "value", None, None).unwrap();

    let err = fx.engine.store().unwrap_err();
    assert!(matches!(err, Error::MissingKey(_)));
    assert!(err.is_not_found());
}

#[test]
fn identical_set_is_a_no_op() {
    let fx = fixture();
    fx.engine
        .update_or_create("app.mode", "", "live", None, None, false)
        .unwrap();
    fx.engine
        .set_and_store("app.mode", "maintenance", None, None)
        .unwrap();

    // identical (value, rule) pair: nothing new becomes dirty
    fx.engine.set("app.mode", "maintenance", None, None).unwrap();

    // mutate the row behind the engine's back; a flush with no dirty keys
    // must not overwrite it
    let mut row = fx.store.find("app.mode").unwrap().unwrap();
    row.value = "external".into();
    fx.store.update(&row).unwrap();

    fx.engine.store().unwrap();
    assert_eq!(fx.store.find("app.mode").unwrap().unwrap().value, "external");
}

#[test]
fn repeated_sets_coalesce_into_one_flush() {
    let fx = fixture();
    fx.engine
        .update_or_create("app.mode", "", "live", None, None, false)
        .unwrap();

    fx.engine.set("app.mode", "a", None, None).unwrap();
    fx.engine.set("app.mode", "b", None, None).unwrap();
    fx.engine.set("app.mode", "c", None, None).unwrap();
    fx.engine.store().unwrap();

    assert_eq!(fx.store.find("app.mode").unwrap().unwrap().value, "c");
}

#[test]
fn rules_are_sticky_across_sets() {
    let fx = fixture();
    fx.engine
        .update_or_create("retry.max", "", "5", Some("integer"), None, false)
        .unwrap();
    fx.engine.get("retry.max").unwrap();

    // no rule supplied: the cached "integer" rule still applies
    let err = fx.engine.set("retry.max", "abc", None, None).unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));

    fx.engine.set_and_store("retry.max", "8", None, None).unwrap();
    let row = fx.store.find("retry.max").unwrap().unwrap();
    assert_eq!(row.value, "8");
    assert_eq!(row.validation_rules, "integer");
}

#[test]
fn cold_set_preserves_persisted_rule() {
    let fx = fixture();
    fx.engine
        .update_or_create("retry.max", "", "5", Some("integer"), None, false)
        .unwrap();

    // no read ever warmed a tier; the persisted rule still governs the set
    let err = fx.engine.set("retry.max", "abc", None, None).unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));

    fx.engine.set_and_store("retry.max", "8", None, None).unwrap();
    let row = fx.store.find("retry.max").unwrap().unwrap();
    assert_eq!(row.value, "8");
    assert_eq!(row.validation_rules, "integer");
}

#[test]
fn revert_to_dirty_start_skips_the_flush() {
    let fx = fixture();
    fx.engine
        .update_or_create("app.mode", "", "live", None, None, false)
        .unwrap();

    fx.engine.set("app.mode", "maintenance", None, None).unwrap();
    fx.engine.set("app.mode", "live", None, None).unwrap();

    // the key reverted to its dirty-start state; a flush that still ran
    // would clobber this external write
    let mut row = fx.store.find("app.mode").unwrap().unwrap();
    row.value = "external".into();
    fx.store.update(&row).unwrap();

    fx.engine.store().unwrap();
    assert_eq!(fx.store.find("app.mode").unwrap().unwrap().value, "external");
}

#[test]
fn update_or_create_reuses_prior_rule() {
    let fx = fixture();
    fx.engine
        .update_or_create("retry.max", "", "5", Some("integer"), None, false)
        .unwrap();

    let err = fx
        .engine
        .update_or_create("retry.max", "", "abc", None, None, false)
        .unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));

    let row = fx
        .engine
        .update_or_create("retry.max", "updated", "9", None, None, false)
        .unwrap();
    assert_eq!(row.validation_rules, "integer");
    assert_eq!(row.descr, "updated");
}

#[test]
fn update_or_create_email_and_url_wrappers() {
    let fx = fixture();
    fx.engine
        .update_or_create_email("mail.from", "", "ops@example.com")
        .unwrap();
    fx.engine
        .update_or_create_url("site.home", "", "https://example.com")
        .unwrap();

    assert!(fx.engine.is_valid("mail.from"));
    assert!(fx
        .engine
        .update_or_create_email("mail.from", "", "not-an-email")
        .is_err());
    assert!(fx
        .engine
        .update_or_create_url("site.home", "", "not a url")
        .is_err());
}

// =============================================================================
// Startup Load & Config Override
// =============================================================================

#[test]
fn startup_load_picks_flagged_rows() {
    let fx = fixture();
    fx.engine
        .update_or_create("eager", "", "1", None, None, true)
        .unwrap();
    fx.engine
        .update_or_create("lazy", "", "2", None, None, false)
        .unwrap();

    assert!(fx.engine.load_on_startup().unwrap());

    // the eager row reached the shared cache; the lazy one did not
    let ns = fx.engine.namespace();
    assert!(fx.shared.hget(ns, "eager").unwrap().is_some());
    assert!(fx.shared.hget(ns, "lazy").unwrap().is_none());
}

#[test]
fn startup_load_skips_rows_failing_their_rule() {
    let fx = fixture();
    fx.engine
        .update_or_create("good", "", "5", Some("integer"), None, true)
        .unwrap();
    let bad = fx
        .engine
        .update_or_create("bad", "", "abc", None, None, true)
        .unwrap();
    fx.store.set_validation_rules(&[bad.id], "integer").unwrap();

    assert!(fx.engine.load_on_startup().unwrap());
    let ns = fx.engine.namespace();
    assert!(fx.shared.hget(ns, "good").unwrap().is_some());
    assert!(fx.shared.hget(ns, "bad").unwrap().is_none());
}

#[test]
fn disabled_engine_skips_startup_load() {
    let fx = fixture_with(|b| b.enabled(false));
    fx.engine
        .update_or_create("eager", "", "1", None, None, true)
        .unwrap();
    assert!(!fx.engine.load_on_startup().unwrap());
}

#[test]
fn warm_start_adopts_shared_snapshot() {
    let fx = fixture();
    let ns = fx.engine.namespace().to_string();
    // a value another process cached but that has no local store row
    fx.shared
        .hset(&ns, "remote.key", r#"{"value":"from-cache"}"#)
        .unwrap();

    assert!(fx.engine.load_on_startup().unwrap());
    assert_eq!(
        fx.engine.get_raw("remote.key").unwrap().as_deref(),
        Some("from-cache")
    );
}

#[test]
fn corrupt_snapshot_is_discarded_wholesale() {
    let fx = fixture();
    fx.engine
        .update_or_create("eager", "", "1", None, None, true)
        .unwrap();
    let ns = fx.engine.namespace().to_string();
    fx.shared.hset(&ns, "broken", "not-json").unwrap();

    // snapshot rejected, store rows still loaded
    assert!(fx.engine.load_on_startup().unwrap());
    assert_eq!(fx.engine.get_raw("eager").unwrap().as_deref(), Some("1"));
    assert_eq!(fx.engine.get_raw("broken").unwrap(), None);
}

#[test]
fn override_config_writes_slots_with_bool_coercion() {
    let fx = fixture();
    fx.sink.seed("mail.enabled", json!(false));

    fx.engine
        .update_or_create("mail.flag", "", "1", None, Some("mail.enabled|mail.flag.copy"), true)
        .unwrap();
    fx.engine.load_on_startup().unwrap();
    assert!(fx.engine.override_config().unwrap());

    // bool slot coerced, fresh slot written as string
    assert_eq!(fx.sink.get("mail.enabled"), Some(json!(true)));
    assert_eq!(fx.sink.get("mail.flag.copy"), Some(json!("1")));
}

#[test]
fn override_config_without_sink_reports_false() {
    let store = std::sync::Arc::new(livecfg::MemoryStore::new());
    let engine = livecfg::SettingsEngine::builder().store(store).build().unwrap();
    assert!(!engine.override_config().unwrap());
}

// =============================================================================
// Expiry & Eviction
// =============================================================================

#[test]
fn memory_expiry_picks_up_external_changes() {
    let fx = fixture();
    fx.engine
        .update_or_create("app.mode", "", "live", None, None, false)
        .unwrap();
    assert_eq!(fx.engine.get_raw("app.mode").unwrap().as_deref(), Some("live"));

    // another process rewrites the row and drops the shared namespace
    let mut row = fx.store.find("app.mode").unwrap().unwrap();
    row.value = "maintenance".into();
    fx.store.update(&row).unwrap();
    fx.shared.del(fx.engine.namespace()).unwrap();
    // the local shadow lapses too
    fx.local.del(fx.engine.namespace()).unwrap();

    // within the window the stale in-memory value is still served
    assert_eq!(fx.engine.get_raw("app.mode").unwrap().as_deref(), Some("live"));

    // collapsing the window forces a reload on the next read
    fx.engine.set_memory_expire(0);
    assert_eq!(
        fx.engine.get_raw("app.mode").unwrap().as_deref(),
        Some("maintenance")
    );
}

#[test]
fn remove_evicts_key_everywhere() {
    let fx = fixture();
    fx.engine
        .update_or_create("app.mode", "", "live", None, None, false)
        .unwrap();
    fx.engine.get("app.mode").unwrap();

    fx.engine.remove("app.mode");
    let ns = fx.engine.namespace();
    assert!(fx.shared.hget(ns, "app.mode").unwrap().is_none());
    assert!(fx.local.hget(ns, "app.mode").unwrap().is_none());
    // the store row survives; the next read repopulates
    assert_eq!(fx.engine.get_raw("app.mode").unwrap().as_deref(), Some("live"));
}

#[test]
fn clear_cache_drops_the_namespace() {
    let fx = fixture();
    fx.engine
        .update_or_create("app.mode", "", "live", None, None, false)
        .unwrap();
    fx.engine.get("app.mode").unwrap();

    assert!(fx.engine.clear_cache());
    assert!(fx
        .shared
        .hgetall(fx.engine.namespace())
        .unwrap()
        .is_empty());
}
