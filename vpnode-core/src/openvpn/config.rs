//! Tunnel client configuration
//!
//! Builds the argument list handed to the tunnel binary. Options carrying key
//! material are written to files in the runtime directory and passed by path.

use crate::error::ProcessError;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Tunnel parameters delivered by the provider in the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpnConfig {
    #[serde(rename = "remote")]
    pub remote_ip: String,
    pub port: u16,
    pub protocol: String,
    #[serde(rename = "TLSPresharedKey")]
    pub tls_preshared_key: String,
    #[serde(rename = "CACertificate")]
    pub ca_certificate: String,
}

impl VpnConfig {
    /// Decode and validate the session's JSON config
    pub fn from_json(raw: &str) -> Result<Self, ProcessError> {
        let config: VpnConfig = serde_json::from_str(raw).map_err(|e| ProcessError::InvalidConfig {
            reason: format!("malformed session config: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ProcessError> {
        let invalid = |reason: &str| ProcessError::InvalidConfig {
            reason: reason.to_string(),
        };

        if self.remote_ip.trim().is_empty() {
            return Err(invalid("remote address is empty"));
        }
        if self.port == 0 {
            return Err(invalid("remote port is zero"));
        }
        if !matches!(self.protocol.as_str(), "udp" | "tcp") {
            return Err(ProcessError::InvalidConfig {
                reason: format!("unsupported protocol '{}'", self.protocol),
            });
        }
        if self.tls_preshared_key.trim().is_empty() {
            return Err(invalid("TLS preshared key is empty"));
        }
        if self.ca_certificate.trim().is_empty() {
            return Err(invalid("CA certificate is empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ConfigOption {
    Flag(String),
    Param(String, Vec<String>),
    /// Written to `path` before the arguments are produced
    File {
        name: String,
        content: String,
        path: PathBuf,
    },
}

/// Argument list of the tunnel binary in client mode
#[derive(Debug, Clone)]
pub struct ClientConfig {
    runtime_dir: PathBuf,
    options: Vec<ConfigOption>,
}

impl ClientConfig {
    pub fn new(runtime_dir: impl Into<PathBuf>) -> Self {
        Self {
            runtime_dir: runtime_dir.into(),
            options: Vec::new(),
        }
    }

    /// Client settings shared by every session
    fn with_defaults(runtime_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self::new(runtime_dir);
        config.set_param("dev", &["tun"]);
        config.set_param("cipher", &["AES-256-GCM"]);
        config.set_param("verb", &["3"]);
        config.set_param("tls-cipher", &["TLS-ECDHE-ECDSA-WITH-AES-256-GCM-SHA384"]);
        config.set_param("keepalive", &["10", "60"]);
        config.set_flag("ping-timer-rem");
        config.set_flag("persist-key");
        config.set_param("reneg-sec", &["60"]);
        config.set_param("resolv-retry", &["infinite"]);
        config.set_param("redirect-gateway", &["def1", "bypass-dhcp"]);
        config
    }

    /// Config for a negotiated session
    pub fn from_session(vpn: &VpnConfig, runtime_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self::with_defaults(runtime_dir);

        config.set_param("connect-retry-max", &["2"]);
        config.set_flag("client");
        config.set_param("script-security", &["2"]);
        config.set_flag("auth-nocache");
        config.set_param("remote", &[vpn.remote_ip.as_str()]);
        config.set_param("port", &[vpn.port.to_string().as_str()]);
        config.set_flag("nobind");
        config.set_flag("float");
        config.set_param("remote-cert-ku", &["84"]);

        match vpn.protocol.as_str() {
            "tcp" => config.set_param("proto", &["tcp-client"]),
            _ => config.set_flag("explicit-exit-notify"),
        }

        config.set_file("ca", &vpn.ca_certificate, "ca.crt");
        config.set_file("tls-crypt", &vpn.tls_preshared_key, "ta.key");
        config
    }

    /// Config wrapping an existing configuration file
    pub fn from_file(path: &Path, runtime_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self::new(runtime_dir);
        config.set_param("config", &[path.to_string_lossy().as_ref()]);
        config
    }

    pub fn set_flag(&mut self, name: &str) {
        self.options.push(ConfigOption::Flag(name.to_string()));
    }

    pub fn set_param(&mut self, name: &str, values: &[&str]) {
        self.options.push(ConfigOption::Param(
            name.to_string(),
            values.iter().map(|v| v.to_string()).collect(),
        ));
    }

    fn set_file(&mut self, name: &str, content: &str, file_name: &str) {
        self.options.push(ConfigOption::File {
            name: name.to_string(),
            content: content.to_string(),
            path: self.runtime_dir.join(file_name),
        });
    }

    /// Route the process's control channel to the management listener
    ///
    /// Credentials are requested over the same channel.
    pub fn set_management_address(&mut self, address: SocketAddr) {
        self.set_param(
            "management",
            &[address.ip().to_string().as_str(), address.port().to_string().as_str()],
        );
        self.set_flag("management-client");
        self.set_flag("management-query-passwords");
        self.set_flag("auth-user-pass");
    }

    pub fn runtime_dir(&self) -> &Path {
        &self.runtime_dir
    }

    /// Write file options and produce command line arguments
    pub fn to_arguments(&self) -> Result<Vec<String>, ProcessError> {
        let mut args = Vec::new();
        for option in &self.options {
            match option {
                ConfigOption::Flag(name) => args.push(format!("--{}", name)),
                ConfigOption::Param(name, values) => {
                    args.push(format!("--{}", name));
                    args.extend(values.iter().cloned());
                }
                ConfigOption::File {
                    name,
                    content,
                    path,
                } => {
                    write_option_file(path, content)?;
                    args.push(format!("--{}", name));
                    args.push(path.to_string_lossy().into_owned());
                }
            }
        }
        Ok(args)
    }
}

fn write_option_file(path: &Path, content: &str) -> Result<(), ProcessError> {
    let failed = |e: std::io::Error| ProcessError::InvalidConfig {
        reason: format!("Failed to write {}: {}", path.display(), e),
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(failed)?;
    }

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path).map_err(failed)?;

    // mode only applies on creation, tighten a file left by an earlier run
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .map_err(failed)?;
    }
    file.write_all(content.as_bytes()).map_err(failed)?;
    Ok(())
}
