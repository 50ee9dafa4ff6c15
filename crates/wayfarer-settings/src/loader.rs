//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`PlayerSettings::default()`]
//! 2. If `~/.wayfarer/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `WAYFARER_*` environment overrides
//! 4. Validate ranges
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{PlayerSettings, SchedulerSettings};

/// Path to the settings file (`~/.wayfarer/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".wayfarer").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<PlayerSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON or out-of-range values are
/// errors.
pub fn load_settings_from_path(path: &Path) -> Result<PlayerSettings> {
    let defaults = serde_json::to_value(PlayerSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: PlayerSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `WAYFARER_*` environment overrides.
pub fn apply_env_overrides(settings: &mut PlayerSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary variable source.
///
/// Invalid values are logged and ignored, keeping the file/default value.
pub fn apply_overrides(settings: &mut PlayerSettings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = read("WAYFARER_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read("WAYFARER_DEVICE_NAME") {
        settings.device.name = v;
    }
    if let Some(v) = read("WAYFARER_DEVICE_ID") {
        settings.device.id = v;
    }
    if let Some(v) = read("WAYFARER_YIELD_DELAY_MS") {
        match parse_u64_range(&v, 0, SchedulerSettings::MAX_YIELD_DELAY_MS) {
            Some(ms) => settings.scheduler.yield_delay_ms = ms,
            None => warn!(key = "WAYFARER_YIELD_DELAY_MS", value = %v, "invalid env var, ignoring"),
        }
    }
    if let Some(v) = read("WAYFARER_MAX_SCRIPT_FAILURES") {
        match parse_u64_range(&v, 1, u64::from(u32::MAX)).and_then(|n| u32::try_from(n).ok()) {
            Some(n) => settings.session.max_script_failures = n,
            None => {
                warn!(
                    key = "WAYFARER_MAX_SCRIPT_FAILURES",
                    value = %v,
                    "invalid env var, ignoring"
                );
            }
        }
    }
}

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
