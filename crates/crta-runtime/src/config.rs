//! Runtime configuration – `~/.crta/config.toml`.
//!
//! ```toml
//! log_format = "json"
//!
//! [adapter]
//! response_timeout_ms = 250
//! boot_timeout_ms = 1000
//! stale_response_window_ms = 250
//! sensor_ctrl_queue_depth = 20
//! ```
//!
//! `CRTA_CONFIG` points at a different file.

use std::fs;
use std::path::{Path, PathBuf};

use crta_adapter::AdapterConfig;
use crta_types::CrtaError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Some(LogFormat::Compact),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub log_format: LogFormat,

    #[serde(default)]
    pub adapter: AdapterConfig,
}

/// `CRTA_CONFIG` if set, otherwise `~/.crta/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("CRTA_CONFIG") {
        return PathBuf::from(path);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".crta").join("config.toml")
}

/// Load the config from [`config_path`].  `Ok(None)` if the file does not
/// exist.
pub fn load() -> Result<Option<RuntimeConfig>, CrtaError> {
    load_from(&config_path())
}

/// Load, apply environment overrides and validate.
///
/// # Errors
///
/// [`CrtaError::Config`] if the file cannot be read or parsed, or the
/// resulting adapter settings are invalid.
pub fn load_from(path: &Path) -> Result<Option<RuntimeConfig>, CrtaError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        CrtaError::Config(format!("failed to read {}: {e}", path.display()))
    })?;
    let mut cfg: RuntimeConfig = toml::from_str(&raw).map_err(|e| {
        CrtaError::Config(format!("failed to parse {}: {e}", path.display()))
    })?;
    apply_env_overrides(&mut cfg);
    cfg.adapter.validate()?;
    Ok(Some(cfg))
}

/// Apply `CRTA_*` environment overrides.  Unparsable values are ignored.
///
/// | Variable | Field |
/// |---|---|
/// | `CRTA_RESPONSE_TIMEOUT_MS` | `adapter.response_timeout_ms` |
/// | `CRTA_SENSOR_CTRL_QUEUE_DEPTH` | `adapter.sensor_ctrl_queue_depth` |
/// | `CRTA_LOG_FORMAT` | `log_format` |
pub fn apply_env_overrides(cfg: &mut RuntimeConfig) {
    if let Ok(v) = std::env::var("CRTA_RESPONSE_TIMEOUT_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.adapter.response_timeout_ms = ms;
    }
    if let Ok(v) = std::env::var("CRTA_SENSOR_CTRL_QUEUE_DEPTH")
        && let Ok(depth) = v.parse::<usize>()
    {
        cfg.adapter.sensor_ctrl_queue_depth = depth;
    }
    if let Ok(v) = std::env::var("CRTA_LOG_FORMAT")
        && let Some(format) = LogFormat::parse(&v)
    {
        cfg.log_format = format;
    }
}

/// Write `cfg` to `path`, creating the parent directory.
pub fn save_to(cfg: &RuntimeConfig, path: &Path) -> Result<(), CrtaError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            CrtaError::Config(format!("failed to create {}: {e}", parent.display()))
        })?;
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| CrtaError::Config(format!("failed to serialise config: {e}")))?;
    fs::write(path, raw)
        .map_err(|e| CrtaError::Config(format!("failed to write {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_points_into_crta_dir() {
        let p = config_path_for_home("/home/cam");
        assert!(p.ends_with(".crta/config.toml"));
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&RuntimeConfig::default(), &path).expect("save");
        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.adapter.boot_timeout_ms, 1000);
        assert_eq!(loaded.adapter.stale_response_window_ms, 250);
    }

    #[test]
    fn partial_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[adapter]\nboot_timeout_ms = 3000\n").expect("write");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.adapter.boot_timeout_ms, 3000);
        assert_eq!(loaded.adapter.stale_response_window_ms, 250);
    }

    #[test]
    fn invalid_adapter_settings_are_rejected() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[adapter]\nboot_timeout_ms = 0\n").expect("write");
        assert!(matches!(load_from(&path), Err(CrtaError::Config(_))));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("garbage.toml");
        std::fs::write(&path, "adapter = [").expect("write");
        assert!(matches!(load_from(&path), Err(CrtaError::Config(_))));
    }

    #[test]
    fn env_overrides() {
        // SAFETY: the only test in this crate touching these variables.
        unsafe {
            std::env::set_var("CRTA_RESPONSE_TIMEOUT_MS", "400");
            std::env::set_var("CRTA_SENSOR_CTRL_QUEUE_DEPTH", "not-a-number");
        }
        let mut cfg = RuntimeConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.adapter.response_timeout_ms, 400);
        assert_eq!(cfg.adapter.sensor_ctrl_queue_depth, 20);

        unsafe { std::env::set_var("CRTA_SENSOR_CTRL_QUEUE_DEPTH", "8") };
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.adapter.sensor_ctrl_queue_depth, 8);

        unsafe {
            std::env::remove_var("CRTA_RESPONSE_TIMEOUT_MS");
            std::env::remove_var("CRTA_SENSOR_CTRL_QUEUE_DEPTH");
        }
    }

    #[test]
    fn log_format_parsing() {
        assert_eq!(LogFormat::parse("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse(" compact "), Some(LogFormat::Compact));
        assert_eq!(LogFormat::parse("pretty"), None);
    }
}
