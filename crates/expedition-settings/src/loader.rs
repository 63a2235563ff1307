//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ExpeditionSettings::default()`]
//! 2. If `~/.expedition/settings.json` exists, deep-merge it over the defaults
//! 3. Apply `EXPEDITION_*` environment overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{ExpeditionSettings, expedition_home};

/// Resolve the path to the settings file (`~/.expedition/settings.json`).
pub fn settings_path() -> PathBuf {
    expedition_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ExpeditionSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON, or values that fail
/// [`ExpeditionSettings::validate`], are errors.
pub fn load_settings_from_path(path: &Path) -> Result<ExpeditionSettings> {
    let mut settings = merge_file(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn merge_file(path: &Path) -> Result<ExpeditionSettings> {
    let defaults = serde_json::to_value(ExpeditionSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Integers must parse and fall inside their range; booleans accept
/// `true`/`1`/`yes`/`on` and `false`/`0`/`no`/`off`. Anything else is
/// ignored with a warning.
pub fn apply_env_overrides(settings: &mut ExpeditionSettings) {
    // ── Storage ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("EXPEDITION_DB_PATH") {
        settings.storage.database_path = v;
    }
    if let Some(v) = read_env_in_range("EXPEDITION_BUSY_TIMEOUT_MS", 0, 600_000) {
        settings.storage.busy_timeout_ms = v;
    }

    // ── Retention ───────────────────────────────────────────────────
    if let Some(v) = read_env_in_range("EXPEDITION_RETENTION_CAPACITY", 1, 1_000_000) {
        settings.retention.capacity = v;
    }
    if let Some(v) = read_env_bool("EXPEDITION_PURGE_ON_BEGIN") {
        settings.retention.purge_on_begin = v;
    }
    if let Some(v) = read_env_in_range("EXPEDITION_PURGE_INTERVAL_SECS", 0, 86_400) {
        settings.retention.purge_interval_secs = v;
    }

    // ── Worker ──────────────────────────────────────────────────────
    if let Some(v) = read_env_in_range("EXPEDITION_QUEUE_DEPTH", 1, 65_536) {
        settings.worker.queue_depth = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("EXPEDITION_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("EXPEDITION_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing (testable without env vars) ────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a number and accept it only inside `min..=max`.
pub fn parse_in_range<T>(val: &str, min: T, max: T) -> Option<T>
where
    T: FromStr + PartialOrd,
{
    val.trim()
        .parse()
        .ok()
        .filter(|n| (min..=max).contains(n))
}

// ── Env var readers ─────────────────────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_in_range<T>(name: &str, min: T, max: T) -> Option<T>
where
    T: FromStr + PartialOrd + Display + Copy,
{
    let val = std::env::var(name).ok()?;
    let result = parse_in_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, %min, %max, "out-of-range env var, ignoring");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"retention": {"capacity": 200, "purgeOnBegin": true}});
        let source = serde_json::json!({"retention": {"capacity": 50}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["retention"]["capacity"], 50);
        assert_eq!(merged["retention"]["purgeOnBegin"], true);
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4]});
        assert_eq!(deep_merge(target, source)["items"], serde_json::json!([4]));
    }

    #[test]
    fn merge_new_keys_added() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"b": 2}));
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let source = serde_json::json!({"a": 42});
        assert_eq!(deep_merge(target, source)["a"], 42);
    }

    // ── file layer ──────────────────────────────────────────────────

    #[test]
    fn missing_file_returns_defaults() {
        let settings = merge_file(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings, ExpeditionSettings::default());
    }

    #[test]
    fn partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"retention": {"capacity": 25}, "logging": {"json": true, "level": null}}"#,
        )
        .unwrap();

        let settings = merge_file(&path).unwrap();
        assert_eq!(settings.retention.capacity, 25);
        assert!(settings.logging.json);
        assert_eq!(settings.logging.level, "info");
        assert_eq!(settings.worker.queue_depth, 64);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();
        assert!(matches!(merge_file(&path), Err(SettingsError::Json(_))));
    }

    #[test]
    fn wrong_type_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"retention": {"capacity": "lots"}}"#).unwrap();
        assert!(matches!(merge_file(&path), Err(SettingsError::Json(_))));
    }

    #[test]
    fn zero_capacity_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"retention": {"capacity": 0}}"#).unwrap();
        let err = merge_file(&path).unwrap().validate().unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue(_)));
    }

    // ── pure parsers ────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for v in ["true", "TRUE", "1", "yes", "On"] {
            assert_eq!(parse_bool(v), Some(true), "{v}");
        }
        for v in ["false", "0", "no", "OFF"] {
            assert_eq!(parse_bool(v), Some(false), "{v}");
        }
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_bool(""), None);
    }

    #[test]
    fn parse_in_range_bounds() {
        assert_eq!(parse_in_range("200", 1u32, 1000), Some(200));
        assert_eq!(parse_in_range("1", 1u32, 1000), Some(1));
        assert_eq!(parse_in_range(" 1000 ", 1u32, 1000), Some(1000));
        assert_eq!(parse_in_range("0", 1u32, 1000), None);
        assert_eq!(parse_in_range("1001", 1u32, 1000), None);
        assert_eq!(parse_in_range("-5", 1u32, 1000), None);
        assert_eq!(parse_in_range("abc", 1u32, 1000), None);
    }

    #[test]
    fn parse_in_range_other_widths() {
        assert_eq!(parse_in_range("0", 0u64, 86_400), Some(0));
        assert_eq!(parse_in_range("86401", 0u64, 86_400), None);
        assert_eq!(parse_in_range("1.5", 0u64, 86_400), None);
        assert_eq!(parse_in_range("64", 1usize, 65_536), Some(64));
        assert_eq!(parse_in_range("0", 1usize, 65_536), None);
    }

    #[test]
    fn settings_path_ends_with_expedition_dir() {
        let path = settings_path();
        assert!(path.ends_with(".expedition/settings.json"));
    }
}
