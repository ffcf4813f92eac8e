//! Minimal configuration loading for the scan session stack.
//!
//! Kept dependency-light so both the session library and the CLI can import
//! it without pulling in a runtime.
//!
//! # Usage
//!
//! ```rust,no_run
//! use scanconf::ScanConfig;
//!
//! let config = ScanConfig::load().expect("Failed to load config");
//! println!("Scan interval: {}ms", config.decode.scan_interval_ms);
//! println!("Rear tokens: {:?}", config.camera.rear_label_tokens);
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/scandesk/config.toml` (system)
//! 2. `~/.config/scandesk/config.toml` (user)
//! 3. `./scandesk.toml` (local override, or a path passed on the CLI)
//! 4. Environment variables (`SCANDESK_*`)
//!
//! # Example Config
//!
//! ```toml
//! [camera]
//! rear_label_tokens = ["back", "rear", "environment"]
//! fallback_facing_mode = "environment"
//! ideal_width = 1280
//! ideal_height = 720
//!
//! [decode]
//! scan_interval_ms = 500
//! max_consecutive_faults = 3
//!
//! [telemetry]
//! log_level = "info"
//! ```

pub mod loader;
pub mod sections;

pub use loader::{discover_config_files_with_override, ConfigSources};
pub use sections::{CameraConfig, DecodeConfig, TelemetryConfig};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete scanner configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ScanConfig {
    #[serde(default)]
    pub camera: CameraConfig,

    #[serde(default)]
    pub decode: DecodeConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl ScanConfig {
    /// Load configuration from all sources.
    ///
    /// Load order (later wins):
    /// 1. Compiled defaults
    /// 2. `/etc/scandesk/config.toml`
    /// 3. `~/.config/scandesk/config.toml`
    /// 4. `./scandesk.toml`
    /// 5. Environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration with `config_path` replacing the local override.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = ScanConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            let file_config = loader::load_from_file(&path)?;
            config = loader::merge_configs(config, file_config);
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# Scanner Configuration\n\n");

        output.push_str("[camera]\n");
        let tokens: Vec<String> = self
            .camera
            .rear_label_tokens
            .iter()
            .map(|t| toml_string(t))
            .collect();
        output.push_str(&format!("rear_label_tokens = [{}]\n", tokens.join(", ")));
        output.push_str(&format!(
            "fallback_facing_mode = {}\n",
            toml_string(&self.camera.fallback_facing_mode)
        ));
        output.push_str(&format!("ideal_width = {}\n", self.camera.ideal_width));
        output.push_str(&format!("ideal_height = {}\n", self.camera.ideal_height));

        output.push_str("\n[decode]\n");
        output.push_str(&format!(
            "scan_interval_ms = {}\n",
            self.decode.scan_interval_ms
        ));
        output.push_str(&format!(
            "max_consecutive_faults = {}\n",
            self.decode.max_consecutive_faults
        ));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!(
            "log_level = {}\n",
            toml_string(&self.telemetry.log_level)
        ));

        output
    }
}

/// Quote and escape a string as a TOML value.
fn toml_string(s: &str) -> String {
    toml::Value::String(s.to_string()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ScanConfig::default();
        assert_eq!(config.camera.ideal_width, 1280);
        assert_eq!(config.camera.ideal_height, 720);
        assert_eq!(config.camera.fallback_facing_mode, "environment");
        assert_eq!(config.decode.scan_interval_ms, 500);
        assert!(config.camera.rear_label_tokens.contains(&"rear".to_string()));
    }

    #[test]
    fn test_to_toml() {
        let config = ScanConfig::default();
        let toml = config.to_toml();
        assert!(toml.contains("[camera]"));
        assert!(toml.contains("[decode]"));
        assert!(toml.contains("rear_label_tokens = [\"back\", \"rear\", \"environment\"]"));
    }

    #[test]
    fn test_to_toml_parses_back() {
        let mut config = ScanConfig::default();
        config.decode.max_consecutive_faults = 7;
        config.camera.rear_label_tokens = vec!["achter".to_string()];

        let parsed: ScanConfig = toml::from_str(&config.to_toml()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_to_toml_escapes_strings() {
        let mut config = ScanConfig::default();
        config.camera.rear_label_tokens = vec!["say \"back\"".to_string(), r"c:\cam".to_string()];
        config.telemetry.log_level = "info,scan\"session=debug".to_string();

        let parsed: ScanConfig = toml::from_str(&config.to_toml()).unwrap();
        assert_eq!(parsed, config);
    }
}
