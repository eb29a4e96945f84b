//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::ParlorSettings;

/// Resolve the path to the settings file (`~/.parlor/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".parlor").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ParlorSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON or values are errors.
pub fn load_settings_from_path(path: &Path) -> Result<ParlorSettings> {
    let mut settings = read_file_layer(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn read_file_layer(path: &Path) -> Result<ParlorSettings> {
    let defaults = serde_json::to_value(ParlorSettings::default())?;

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

/// Apply `PARLOR_*` environment overrides.
///
/// Invalid values are logged and ignored.
pub fn apply_env_overrides(settings: &mut ParlorSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup` instead of the process environment.
pub fn apply_overrides_from<F>(settings: &mut ParlorSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Orchestrator ────────────────────────────────────────────────
    if let Some(v) = env.u32_in("PARLOR_MAX_FOLLOW_UP_ROUNDS", 0, 100) {
        settings.orchestrator.max_follow_up_rounds = v;
    }
    if let Some(v) = env.u32_in("PARLOR_MAX_TOTAL_MESSAGES", 1, 10_000) {
        settings.orchestrator.max_total_messages = v;
    }

    // ── Pool ────────────────────────────────────────────────────────
    if let Some(v) = env.usize_in("PARLOR_MAX_CONNECTIONS", 1, 1_000) {
        settings.pool.max_concurrent_connections = v;
    }

    // ── Scheduler ───────────────────────────────────────────────────
    if let Some(v) = env.bool("PARLOR_SCHEDULER_ENABLED") {
        settings.scheduler.enabled = v;
    }
    if let Some(v) = env.u64_in("PARLOR_SCHEDULER_INTERVAL_MS", 100, 3_600_000) {
        settings.scheduler.interval_ms = v;
    }
    if let Some(v) = env.usize_in("PARLOR_MAX_CONCURRENT_ROOMS", 1, 1_000) {
        settings.scheduler.max_concurrent_rooms = v;
    }

    // ── Cache / conversation / logging ──────────────────────────────
    if let Some(v) = env.u64_in("PARLOR_CACHE_TTL_MS", 0, 600_000) {
        settings.cache.ttl_ms = v;
    }
    if let Some(v) = env.string("PARLOR_USER_NAME") {
        settings.conversation.user_name = v;
    }
    if let Some(v) = env.string("PARLOR_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

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

/// Parse a string as a `u32` within a range.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env readers ─────────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, kind: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        let val = (self.lookup)(name)?;
        let result = parse(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, kind, "invalid env var, ignoring");
        }
        result
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.parsed(name, "bool", parse_bool)
    }

    fn u32_in(&self, name: &str, min: u32, max: u32) -> Option<u32> {
        self.parsed(name, "u32", |v| parse_u32_range(v, min, max))
    }

    fn u64_in(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.parsed(name, "u64", |v| parse_u64_range(v, min, max))
    }

    fn usize_in(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.parsed(name, "usize", |v| parse_usize_range(v, min, max))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;
    use crate::errors::SettingsError;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"pool": {"connectRetries": 3, "connectBackoffBaseMs": 300}});
        let source = serde_json::json!({"pool": {"connectRetries": 1}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["pool"]["connectRetries"], 1);
        assert_eq!(merged["pool"]["connectBackoffBaseMs"], 300);
    }

    #[test]
    fn merge_null_preserves_target() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_array_replaces() {
        let merged = deep_merge(
            serde_json::json!({"items": [1, 2, 3]}),
            serde_json::json!({"items": [4]}),
        );
        assert_eq!(merged["items"], serde_json::json!([4]));
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let merged = deep_merge(
            serde_json::json!({"a": {"nested": true}}),
            serde_json::json!({"a": 42}),
        );
        assert_eq!(merged["a"], 42);
    }

    // ── file layer ──────────────────────────────────────────────────

    #[test]
    fn missing_file_returns_defaults() {
        let settings = read_file_layer(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings, ParlorSettings::default());
    }

    #[test]
    fn partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"scheduler": {"intervalMs": 500}, "conversation": {"userName": "Mina"}}"#,
        )
        .unwrap();

        let settings = read_file_layer(&path).unwrap();
        assert_eq!(settings.scheduler.interval_ms, 500);
        assert_eq!(settings.scheduler.max_concurrent_rooms, 5);
        assert_eq!(settings.conversation.user_name, "Mina");
        assert_eq!(settings.conversation.context_limit, 25);
    }

    #[test]
    fn invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json").unwrap();
        assert_matches!(read_file_layer(&path), Err(SettingsError::Json(_)));
    }

    #[test]
    fn zero_interval_in_file_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"scheduler": {"intervalMs": 0}}"#).unwrap();
        assert_matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue(_))
        );
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn env_overrides_apply() {
        let mut s = ParlorSettings::default();
        apply_overrides_from(
            &mut s,
            env(&[
                ("PARLOR_MAX_FOLLOW_UP_ROUNDS", "2"),
                ("PARLOR_MAX_CONNECTIONS", "4"),
                ("PARLOR_SCHEDULER_ENABLED", "off"),
                ("PARLOR_CACHE_TTL_MS", "0"),
                ("PARLOR_USER_NAME", "Mina"),
            ]),
        );
        assert_eq!(s.orchestrator.max_follow_up_rounds, 2);
        assert_eq!(s.pool.max_concurrent_connections, 4);
        assert!(!s.scheduler.enabled);
        assert_eq!(s.cache.ttl_ms, 0);
        assert_eq!(s.conversation.user_name, "Mina");
    }

    #[test]
    fn invalid_env_values_ignored() {
        let mut s = ParlorSettings::default();
        apply_overrides_from(
            &mut s,
            env(&[
                ("PARLOR_MAX_CONNECTIONS", "0"),
                ("PARLOR_SCHEDULER_ENABLED", "maybe"),
                ("PARLOR_MAX_TOTAL_MESSAGES", "lots"),
                ("PARLOR_USER_NAME", ""),
            ]),
        );
        assert_eq!(s, ParlorSettings::default());
    }

    // ── parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for v in ["true", "TRUE", "1", "yes", "on"] {
            assert_eq!(parse_bool(v), Some(true), "{v}");
        }
        for v in ["false", "0", "No", "off"] {
            assert_eq!(parse_bool(v), Some(false), "{v}");
        }
        assert_eq!(parse_bool(""), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u32_range("5", 1, 10), Some(5));
        assert_eq!(parse_u32_range("11", 1, 10), None);
        assert_eq!(parse_u64_range("-1", 0, 10), None);
        assert_eq!(parse_usize_range("1", 1, 1), Some(1));
    }
}
