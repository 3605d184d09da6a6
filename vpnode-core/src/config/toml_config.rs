//! TOML configuration file I/O
//!
//! Handles loading and saving the node configuration to/from TOML files
//! in the user's configuration directory.

use crate::config::NodeConfig;
use crate::error::{ConfigError, VpnodeError};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default configuration file name
const CONFIG_FILE_NAME: &str = "config.toml";

impl NodeConfig {
    /// Load and validate configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, VpnodeError> {
        let contents = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::LoadFailed {
                path: path.to_string_lossy().to_string(),
            },
            _ => ConfigError::IoError {
                message: format!("Failed to read config file: {}", e),
            },
        })?;

        let config: NodeConfig = toml::from_str(&contents).map_err(|e| ConfigError::ValidationError {
            message: format!("Failed to parse config file: {}", e),
        })?;

        config
            .validate()
            .map_err(|message| ConfigError::ValidationError { message })?;

        debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Validate and save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<(), VpnodeError> {
        self.validate()
            .map_err(|message| ConfigError::ValidationError { message })?;

        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError {
                message: format!("Failed to create config directory: {}", e),
            })?;
        }

        std::fs::write(path, contents).map_err(|e| ConfigError::IoError {
            message: format!("Failed to write config file: {}", e),
        })?;

        info!("Saved configuration to {:?}", path);
        Ok(())
    }
}

/// Get the configuration directory
///
/// Returns ~/.config/vpnode, or VPNODE_CONFIG_DIR environment variable if set
pub fn get_config_dir() -> Result<PathBuf, VpnodeError> {
    if let Ok(config_dir) = std::env::var("VPNODE_CONFIG_DIR") {
        return Ok(PathBuf::from(config_dir));
    }

    let home = std::env::var("HOME").map_err(|_| ConfigError::IoError {
        message: "HOME environment variable not set".to_string(),
    })?;

    Ok(PathBuf::from(home).join(".config").join("vpnode"))
}

/// Get the default configuration file path
pub fn get_config_path() -> Result<PathBuf, VpnodeError> {
    Ok(get_config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the configuration from the default path
///
/// A missing file yields the defaults; a present but invalid file is an error.
pub fn load_config() -> Result<NodeConfig, VpnodeError> {
    let path = get_config_path()?;
    load_config_from_path(&path)
}

/// Load configuration from a path, falling back to defaults when it is absent
pub fn load_config_from_path(path: &Path) -> Result<NodeConfig, VpnodeError> {
    if !path.exists() {
        debug!("No configuration at {:?}, using defaults", path);
        return Ok(NodeConfig::default());
    }
    NodeConfig::from_file(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_roundtrip() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut original = NodeConfig::default();
        original.openvpn.binary = "/usr/sbin/openvpn".to_string();
        original.stats.report_interval_secs = 30;

        original.to_file(&config_path).unwrap();
        let loaded = NodeConfig::from_file(&config_path).unwrap();

        assert_eq!(original, loaded);
    }

    #[test]
    fn test_missing_file_is_load_failure() {
        let temp_dir = tempdir().unwrap();
        let err = NodeConfig::from_file(&temp_dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, VpnodeError::Config(ConfigError::LoadFailed { .. })));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let temp_dir = tempdir().unwrap();
        let config = load_config_from_path(&temp_dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, NodeConfig::default());
    }

    #[test]
    fn test_invalid_values_are_rejected_on_load() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        std::fs::write(&config_path, "[stats]\nbytecount_interval_secs = 0\n").unwrap();

        let err = NodeConfig::from_file(&config_path).unwrap_err();
        assert!(matches!(err, VpnodeError::Config(ConfigError::ValidationError { .. })));
    }
}
