//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`PonderSettings::default()`]
//! 2. If `~/.ponder/settings.json` exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::PonderSettings;

/// Root of Ponder's per-user state (`~/.ponder`).
pub fn ponder_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".ponder")
}

/// Resolve the path to the settings file (`~/.ponder/settings.json`).
pub fn settings_path() -> PathBuf {
    ponder_home().join("settings.json")
}

/// Resolve the history directory; relative paths land under `~/.ponder`.
pub fn history_dir(settings: &PonderSettings) -> PathBuf {
    let dir = Path::new(&settings.history.directory);
    if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        ponder_home().join(dir)
    }
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or values that fail
/// [`PonderSettings::validate`] are errors.
pub fn load_settings_from_path(path: &Path) -> Result<PonderSettings> {
    let defaults = serde_json::to_value(PonderSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: PonderSettings = serde_json::from_value(merged)?;
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
/// Integers must parse and fall within range; invalid values are logged
/// and ignored.
pub fn apply_env_overrides(settings: &mut PonderSettings) {
    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("PONDER_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("PONDER_PORT", 1, 65535) {
        settings.server.port = v;
    }

    // ── Models ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("PONDER_DEFAULT_MODEL") {
        settings.models.default_model = v;
    }
    if let Some(v) = read_env_string("PONDER_SUPPORTED_MODELS") {
        settings.models.supported = parse_list(&v);
    }
    if let Some(v) = read_env_string("GOOGLE_API_KEY") {
        settings.models.api_key = Some(v);
    }

    // ── Engine ──────────────────────────────────────────────────────
    if let Some(v) = read_env_u32("PONDER_PLANNING_INTERVAL", 1, 100) {
        settings.engine.planning_interval = v;
    }
    if let Some(v) = read_env_u32("PONDER_MAX_THOUGHT_CYCLES", 1, 1000) {
        settings.engine.max_thought_cycles = v;
    }
    if let Some(v) = read_env_u32("PONDER_MAX_RETRIES", 0, 20) {
        settings.retry.max_retries = v;
    }

    // ── Broker ──────────────────────────────────────────────────────
    if let Some(v) = read_env_usize("PONDER_MAX_SESSIONS", 1, 10_000) {
        settings.broker.max_active_sessions = v;
    }
    if let Some(v) = read_env_usize("PONDER_EVENT_BUFFER", 16, 1_000_000) {
        settings.broker.event_buffer_capacity = v;
    }

    // ── History / logging ───────────────────────────────────────────
    if let Some(v) = read_env_string("PONDER_HISTORY_DIR") {
        settings.history.directory = v;
    }
    if let Some(v) = read_env_string("PONDER_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Split a comma-separated list, trimming blanks.
pub fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u32` within a range.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u32(name: &str, min: u32, max: u32) -> Option<u32> {
    let val = std::env::var(name).ok()?;
    let result = parse_u32_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u32 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use assert_matches::assert_matches;
    use std::io::Write;

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"broker": {"maxActiveSessions": 100, "evictionGraceMs": 5000}});
        let source = serde_json::json!({"broker": {"maxActiveSessions": 4}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["broker"]["maxActiveSessions"], 4);
        assert_eq!(merged["broker"]["evictionGraceMs"], 5000);
    }

    #[test]
    fn merge_arrays_replace() {
        let target = serde_json::json!({"supported": ["a", "b"]});
        let source = serde_json::json!({"supported": ["c"]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["supported"], serde_json::json!(["c"]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"level": "info"});
        let source = serde_json::json!({"level": null});
        assert_eq!(deep_merge(target, source)["level"], "info");
    }

    // ── parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("8080", 1, 65535), Some(8080));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u32_range("3", 1, 100), Some(3));
        assert_eq!(parse_u32_range("abc", 1, 100), None);
        assert_eq!(parse_usize_range("20000", 1, 10_000), None);
    }

    #[test]
    fn parse_list_trims() {
        assert_eq!(
            parse_list(" gemini-flash-latest , gemini-pro-latest,,"),
            vec!["gemini-flash-latest", "gemini-pro-latest"]
        );
    }

    // ── file loading ────────────────────────────────────────────────

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from_path(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings.engine.planning_interval, 3);
    }

    #[test]
    fn file_values_merge_over_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"engine": {{"maxThoughtCycles": 8}}, "history": {{"enabled": false}}}}"#
        )
        .unwrap();
        let settings = load_settings_from_path(file.path()).unwrap();
        assert_eq!(settings.engine.max_thought_cycles, 8);
        assert_eq!(settings.engine.planning_interval, 3);
        assert!(!settings.history.enabled);
    }

    #[test]
    fn invalid_json_is_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        assert_matches!(
            load_settings_from_path(file.path()),
            Err(SettingsError::Json(_))
        );
    }

    #[test]
    fn invalid_values_fail_validation() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"engine": {{"planningInterval": 0}}}}"#).unwrap();
        assert_matches!(
            load_settings_from_path(file.path()),
            Err(SettingsError::InvalidValue(_))
        );
    }

    #[test]
    fn history_dir_resolution() {
        let mut settings = PonderSettings::default();
        assert!(history_dir(&settings).ends_with(".ponder/history"));

        settings.history.directory = "/var/lib/ponder".into();
        assert_eq!(history_dir(&settings), PathBuf::from("/var/lib/ponder"));
    }
}
