//! Configuration module
//!
//! Node settings loaded from a TOML file. Every field has a default, so an
//! empty or missing section is valid.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub mod toml_config;

/// Tunnel binary settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenvpnSettings {
    /// Binary name or path of the tunnel process
    pub binary: String,

    /// Directory for per-session files (keys, certificates)
    pub runtime_dir: PathBuf,

    /// Management listener address; port 0 picks a free port
    pub management_address: SocketAddr,

    /// How long the tunnel process may take to connect back
    pub management_connect_timeout_secs: u64,
}

impl Default for OpenvpnSettings {
    fn default() -> Self {
        Self {
            binary: "openvpn".to_string(),
            runtime_dir: std::env::temp_dir().join("vpnode"),
            management_address: SocketAddr::from(([127, 0, 0, 1], 0)),
            management_connect_timeout_secs: 2,
        }
    }
}

impl OpenvpnSettings {
    pub fn management_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.management_connect_timeout_secs)
    }
}

/// Traffic counter settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsSettings {
    /// How often the tunnel process reports counters
    pub bytecount_interval_secs: u64,

    /// Minimum time between two reports to the remote stats service
    pub report_interval_secs: u64,
}

impl Default for StatsSettings {
    fn default() -> Self {
        Self {
            bytecount_interval_secs: 1,
            report_interval_secs: 60,
        }
    }
}

impl StatsSettings {
    pub fn bytecount_interval(&self) -> Duration {
        Duration::from_secs(self.bytecount_interval_secs)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }
}

/// Node configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub openvpn: OpenvpnSettings,
    pub stats: StatsSettings,
}

impl NodeConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.openvpn.binary.trim().is_empty() {
            return Err("Tunnel binary cannot be empty".to_string());
        }

        if self.openvpn.management_connect_timeout_secs == 0 {
            return Err("Management connect timeout cannot be zero".to_string());
        }

        if self.stats.bytecount_interval_secs == 0 {
            return Err("Bytecount interval cannot be zero".to_string());
        }

        if self.stats.report_interval_secs < self.stats.bytecount_interval_secs {
            return Err("Report interval cannot be shorter than the bytecount interval".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = NodeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.openvpn.management_address.port(), 0);
        assert_eq!(config.openvpn.management_connect_timeout(), Duration::from_secs(2));
        assert_eq!(config.stats.report_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_invalid_configs_are_rejected() {
        let mut empty_binary = NodeConfig::default();
        empty_binary.openvpn.binary = " ".to_string();

        let mut zero_timeout = NodeConfig::default();
        zero_timeout.openvpn.management_connect_timeout_secs = 0;

        let mut zero_bytecount = NodeConfig::default();
        zero_bytecount.stats.bytecount_interval_secs = 0;

        let mut short_report = NodeConfig::default();
        short_report.stats.bytecount_interval_secs = 10;
        short_report.stats.report_interval_secs = 5;

        for config in [empty_binary, zero_timeout, zero_bytecount, short_report] {
            assert!(config.validate().is_err());
        }
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: NodeConfig = toml::from_str(
            r#"
            [stats]
            report_interval_secs = 120
            "#,
        )
        .unwrap();

        assert_eq!(config.stats.report_interval_secs, 120);
        assert_eq!(config.stats.bytecount_interval_secs, 1);
        assert_eq!(config.openvpn, OpenvpnSettings::default());
    }
}
