//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ApiSyncSettings::default()`]
//! 2. If `~/.apisync/settings.json` exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{ApiSyncSettings, LogFormat};

/// Resolve the path to the settings file (`~/.apisync/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".apisync").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ApiSyncSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<ApiSyncSettings> {
    let defaults = serde_json::to_value(ApiSyncSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: ApiSyncSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
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

/// Apply `APISYNC_*` environment overrides. Invalid values are logged and ignored.
pub fn apply_env_overrides(settings: &mut ApiSyncSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary variable source.
fn apply_overrides(settings: &mut ApiSyncSettings, var: impl Fn(&str) -> Option<String>) {
    let string = |name: &str| var(name).filter(|v| !v.is_empty());
    let number = |name: &str, min: u64, max: u64| {
        let raw = string(name)?;
        let parsed = parse_u64_range(&raw, min, max);
        if parsed.is_none() {
            tracing::warn!(key = name, value = %raw, "invalid numeric env var, ignoring");
        }
        parsed
    };

    if let Some(v) = string("APISYNC_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = number("APISYNC_PORT", 0, u64::from(u16::MAX)).and_then(|v| u16::try_from(v).ok()) {
        settings.server.port = v;
    }
    if let Some(v) = string("APISYNC_PATH") {
        settings.server.path = v.trim_start_matches('/').to_string();
    }
    if let Some(v) = number("APISYNC_HEARTBEAT_INTERVAL_SECS", 1, 3600) {
        settings.server.heartbeat_interval_secs = v;
    }
    if let Some(v) = number("APISYNC_MAX_MISSED_PONGS", 1, 100).and_then(|v| u32::try_from(v).ok()) {
        settings.server.max_missed_pongs = v;
    }
    if let Some(v) = string("APISYNC_URL") {
        settings.client.url = v;
    }
    if let Some(v) = number("APISYNC_CALL_TIMEOUT_SECS", 1, 3600) {
        settings.client.call_timeout_secs = v;
    }
    if let Some(v) = string("APISYNC_STRICT_PATHS") {
        match parse_bool(&v) {
            Some(b) => settings.client.strict_paths = b,
            None => tracing::warn!(key = "APISYNC_STRICT_PATHS", value = %v, "invalid boolean env var, ignoring"),
        }
    }
    if let Some(v) = string("APISYNC_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = string("APISYNC_LOG_FORMAT") {
        match v.to_lowercase().as_str() {
            "json" => settings.logging.format = LogFormat::Json,
            "pretty" => settings.logging.format = LogFormat::Pretty,
            _ => tracing::warn!(key = "APISYNC_LOG_FORMAT", value = %v, "invalid log format, ignoring"),
        }
    }
}

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

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
