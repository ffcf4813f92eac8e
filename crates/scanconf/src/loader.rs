//! Config file discovery, loading, and environment variable overlay.

use crate::sections::{CameraConfig, DecodeConfig, TelemetryConfig};
use crate::{ConfigError, ScanConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local). Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/scandesk/config.toml");
    if system.exists() {
        files.push(system);
    }

    // XDG_CONFIG_HOME or ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("scandesk/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("scandesk.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Load config from a TOML file.
pub fn load_from_file(path: &Path) -> Result<ScanConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_toml(&contents, path)
}

/// Parse config from TOML string.
///
/// Unknown keys are ignored; missing keys keep their defaults.
fn parse_toml(contents: &str, path: &Path) -> Result<ScanConfig, ConfigError> {
    let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut config = ScanConfig::default();

    if let Some(camera) = table.get("camera").and_then(|v| v.as_table()) {
        if let Some(tokens) = camera.get("rear_label_tokens").and_then(|v| v.as_array()) {
            config.camera.rear_label_tokens = tokens
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.to_string())
                .collect();
        }
        if let Some(v) = camera.get("fallback_facing_mode").and_then(|v| v.as_str()) {
            config.camera.fallback_facing_mode = v.to_string();
        }
        if let Some(v) = camera.get("ideal_width") {
            config.camera.ideal_width = positive_integer(v, "camera.ideal_width", path)? as u32;
        }
        if let Some(v) = camera.get("ideal_height") {
            config.camera.ideal_height = positive_integer(v, "camera.ideal_height", path)? as u32;
        }
    }

    if let Some(decode) = table.get("decode").and_then(|v| v.as_table()) {
        if let Some(v) = decode.get("scan_interval_ms") {
            config.decode.scan_interval_ms = positive_integer(v, "decode.scan_interval_ms", path)?;
        }
        if let Some(v) = decode.get("max_consecutive_faults") {
            config.decode.max_consecutive_faults =
                positive_integer(v, "decode.max_consecutive_faults", path)? as u32;
        }
    }

    if let Some(telemetry) = table.get("telemetry").and_then(|v| v.as_table()) {
        if let Some(v) = telemetry.get("log_level").and_then(|v| v.as_str()) {
            config.telemetry.log_level = v.to_string();
        }
    }

    Ok(config)
}

fn positive_integer(value: &toml::Value, key: &str, path: &Path) -> Result<u64, ConfigError> {
    match value.as_integer() {
        Some(n) if n > 0 && n <= u32::MAX as i64 => Ok(n as u64),
        _ => Err(ConfigError::Parse {
            path: path.to_path_buf(),
            message: format!("{} must be a positive integer, got {}", key, value),
        }),
    }
}

/// Merge two configs, with `overlay` taking precedence wherever it differs from the defaults.
pub fn merge_configs(base: ScanConfig, overlay: ScanConfig) -> ScanConfig {
    let camera_default = CameraConfig::default();
    let decode_default = DecodeConfig::default();
    let telemetry_default = TelemetryConfig::default();

    ScanConfig {
        camera: CameraConfig {
            rear_label_tokens: pick(
                base.camera.rear_label_tokens,
                overlay.camera.rear_label_tokens,
                &camera_default.rear_label_tokens,
            ),
            fallback_facing_mode: pick(
                base.camera.fallback_facing_mode,
                overlay.camera.fallback_facing_mode,
                &camera_default.fallback_facing_mode,
            ),
            ideal_width: pick(
                base.camera.ideal_width,
                overlay.camera.ideal_width,
                &camera_default.ideal_width,
            ),
            ideal_height: pick(
                base.camera.ideal_height,
                overlay.camera.ideal_height,
                &camera_default.ideal_height,
            ),
        },
        decode: DecodeConfig {
            scan_interval_ms: pick(
                base.decode.scan_interval_ms,
                overlay.decode.scan_interval_ms,
                &decode_default.scan_interval_ms,
            ),
            max_consecutive_faults: pick(
                base.decode.max_consecutive_faults,
                overlay.decode.max_consecutive_faults,
                &decode_default.max_consecutive_faults,
            ),
        },
        telemetry: TelemetryConfig {
            log_level: pick(
                base.telemetry.log_level,
                overlay.telemetry.log_level,
                &telemetry_default.log_level,
            ),
        },
    }
}

fn pick<T: PartialEq>(base: T, overlay: T, default: &T) -> T {
    if overlay != *default {
        overlay
    } else {
        base
    }
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut ScanConfig, sources: &mut ConfigSources) {
    // Camera
    if let Ok(v) = env::var("SCANDESK_REAR_LABEL_TOKENS") {
        config.camera.rear_label_tokens = v
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();
        sources.env_overrides.push("SCANDESK_REAR_LABEL_TOKENS".to_string());
    }
    if let Ok(v) = env::var("SCANDESK_FACING_MODE") {
        config.camera.fallback_facing_mode = v;
        sources.env_overrides.push("SCANDESK_FACING_MODE".to_string());
    }
    if let Ok(v) = env::var("SCANDESK_IDEAL_WIDTH") {
        if let Ok(width) = v.parse() {
            config.camera.ideal_width = width;
            sources.env_overrides.push("SCANDESK_IDEAL_WIDTH".to_string());
        }
    }
    if let Ok(v) = env::var("SCANDESK_IDEAL_HEIGHT") {
        if let Ok(height) = v.parse() {
            config.camera.ideal_height = height;
            sources.env_overrides.push("SCANDESK_IDEAL_HEIGHT".to_string());
        }
    }

    // Decode
    if let Ok(v) = env::var("SCANDESK_SCAN_INTERVAL_MS") {
        if let Ok(ms) = v.parse() {
            config.decode.scan_interval_ms = ms;
            sources.env_overrides.push("SCANDESK_SCAN_INTERVAL_MS".to_string());
        }
    }
    if let Ok(v) = env::var("SCANDESK_MAX_CONSECUTIVE_FAULTS") {
        if let Ok(n) = v.parse::<u32>() {
            if n > 0 {
                config.decode.max_consecutive_faults = n;
                sources.env_overrides.push("SCANDESK_MAX_CONSECUTIVE_FAULTS".to_string());
            }
        }
    }

    // Telemetry
    if let Ok(v) = env::var("SCANDESK_LOG_LEVEL") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("SCANDESK_LOG_LEVEL".to_string());
    }
    // Also support RUST_LOG
    if let Ok(v) = env::var("RUST_LOG") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}
