//! vpnode - peer-to-peer VPN consumer node
//!
//! Runs the OpenVPN client under management control, reporting its state
//! changes and traffic counters.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use vpnode_core::{error::VpnodeError, init_logging};

mod cli;

#[derive(Parser)]
#[command(name = "vpnode")]
#[command(about = "Peer-to-peer VPN consumer node")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a tunnel from an OpenVPN configuration file until Ctrl-C
    Tunnel {
        /// Path to the .ovpn configuration
        config: PathBuf,

        /// Answer the credential challenge with this username
        /// (password is read from VPNODE_TUNNEL_PASSWORD)
        #[arg(long)]
        username: Option<String>,
    },
    /// Show the effective node configuration
    Config {
        /// Write the default configuration if none exists
        #[arg(long)]
        init: bool,
    },
}

fn main() {
    if let Err(e) = init_logging() {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(2);
    }

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Tunnel { config, username } => cli::tunnel::run_tunnel(&config, username),
        Commands::Config { init } => cli::config::run_config(init),
    };

    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            let exit_code = match e {
                // Configuration errors (exit code 2)
                VpnodeError::Config(_) | VpnodeError::Toml(_) | VpnodeError::TomlSerialize(_) => 2,
                VpnodeError::Process(vpnode_core::error::ProcessError::InvalidConfig { .. }) => 2,
                // Runtime errors (exit code 1)
                VpnodeError::Connection(_)
                | VpnodeError::Management(_)
                | VpnodeError::Process(_)
                | VpnodeError::Io(_) => 1,
            };

            eprintln!("{}", e);
            std::process::exit(exit_code);
        }
    }
}
