//! Runtime configuration loaded from `config.toml` next to the scene file.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::simulation::dispatcher::DeliveryPolicy;

/// Knobs that control how a scene is run, as opposed to what it contains.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RuntimeConfig {
    /// Time allowed for one delivery attempt to a node endpoint (ms).
    pub delivery_timeout_ms: u64,
    /// Number of attempts per receiver before the delivery is skipped.
    pub delivery_attempts: u32,
    /// How long to keep relaying after the last scripted transmission (ms).
    pub settle_time_ms: u64,
    /// Where to write the transmission log as JSON, if anywhere.
    pub export_path: Option<PathBuf>,
    /// Extra `env_logger` filter directives, applied before `RUST_LOG`.
    pub log_filter: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            delivery_timeout_ms: 500,
            delivery_attempts: 2,
            settle_time_ms: 15_000,
            export_path: None,
            log_filter: None,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Returns
    /// * `Ok(RuntimeConfig)` if the file was read, parsed and is valid
    /// * `Err(String)` with a descriptive error message otherwise
    pub fn load(config_path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(config_path).map_err(|e| format!("Failed to read config file: {}", e))?;
        let config: RuntimeConfig = toml::from_str(&content).map_err(|e| format!("Failed to parse config file: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `config_path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(config_path: &Path) -> Result<Self, String> {
        if config_path.exists() {
            Self::load(config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Derive the config path from a scene file path.
    ///
    /// Replaces the scene filename with "config.toml" in the same directory.
    pub fn config_path_from_scene(scene_path: &str) -> PathBuf {
        let scene = Path::new(scene_path);
        scene.parent().unwrap_or(Path::new(".")).join("config.toml")
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.delivery_timeout_ms == 0 {
            return Err("delivery-timeout-ms must be positive".to_string());
        }
        if self.delivery_attempts == 0 {
            return Err("delivery-attempts must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn delivery_policy(&self) -> DeliveryPolicy {
        DeliveryPolicy {
            timeout: embassy_time::Duration::from_millis(self.delivery_timeout_ms),
            attempts: self.delivery_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config: RuntimeConfig = toml::from_str("settle-time-ms = 250\nexport-path = \"out/log.json\"\n").unwrap();
        assert_eq!(config.settle_time_ms, 250);
        assert_eq!(config.export_path, Some(PathBuf::from("out/log.json")));
        assert_eq!(config.delivery_attempts, 2);
        assert_eq!(config.delivery_timeout_ms, 500);
    }

    #[test]
    fn zero_attempts_are_rejected() {
        let config = RuntimeConfig {
            delivery_attempts: 0,
            ..RuntimeConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(RuntimeConfig::default().validate().is_ok());
    }

    #[test]
    fn policy_follows_config() {
        let policy = RuntimeConfig {
            delivery_timeout_ms: 120,
            delivery_attempts: 3,
            ..RuntimeConfig::default()
        }
        .delivery_policy();
        assert_eq!(policy.timeout, embassy_time::Duration::from_millis(120));
        assert_eq!(policy.attempts, 3);
    }

    #[test]
    fn config_sits_next_to_scene() {
        assert_eq!(RuntimeConfig::config_path_from_scene("scenes/line.json"), PathBuf::from("scenes/config.toml"));
        assert_eq!(RuntimeConfig::config_path_from_scene("line.json"), PathBuf::from("config.toml"));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let path = std::env::temp_dir().join("mesh-radio-simulator-no-such-config.toml");
        assert_eq!(RuntimeConfig::load_or_default(&path).unwrap(), RuntimeConfig::default());
    }
}
