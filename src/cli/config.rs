//! Configuration command

use colored::Colorize;
use vpnode_core::config::toml_config::{get_config_path, load_config_from_path};
use vpnode_core::config::NodeConfig;
use vpnode_core::error::VpnodeError;

/// Print the effective configuration, optionally writing the defaults first
pub fn run_config(init: bool) -> Result<(), VpnodeError> {
    let path = get_config_path()?;

    if init {
        if path.exists() {
            println!("{} {}", "Configuration already exists:".yellow(), path.display());
        } else {
            NodeConfig::default().to_file(&path)?;
            println!("{} {}", "Wrote default configuration to".green(), path.display());
        }
    }

    let config = load_config_from_path(&path)?;
    let source = if path.exists() {
        path.display().to_string()
    } else {
        "built-in defaults".to_string()
    };

    println!("{} {}", "# Source:".dimmed(), source);
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
