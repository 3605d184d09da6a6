//! Tunnel command
//!
//! Runs the tunnel binary with an existing configuration file and the full
//! middleware pipeline, printing state changes until the process exits or
//! Ctrl-C is pressed.

use colored::Colorize;
use secrecy::{ExposeSecret, Secret};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use vpnode_core::config::toml_config::load_config;
use vpnode_core::connection::Subprocess;
use vpnode_core::error::{ConfigError, VpnodeError};
use vpnode_core::openvpn::middlewares::{AuthMiddleware, BytescountMiddleware, StateMiddleware};
use vpnode_core::openvpn::{ClientConfig, Middleware, OpenvpnClient, ProcessState, StateCallback};
use vpnode_core::stats::{KeeperStatsHandler, SessionStatsKeeper, StatsKeeper};
use vpnode_core::types::Credentials;

const PASSWORD_ENV: &str = "VPNODE_TUNNEL_PASSWORD";

/// Run the tunnel command
pub fn run_tunnel(config_file: &Path, username: Option<String>) -> Result<(), VpnodeError> {
    let config = load_config()?;

    let binary = which::which(&config.openvpn.binary).map_err(|e| ConfigError::ValidationError {
        message: format!("Tunnel binary '{}' not found: {}", config.openvpn.binary, e),
    })?;
    if !config_file.exists() {
        return Err(ConfigError::LoadFailed {
            path: config_file.to_string_lossy().to_string(),
        }
        .into());
    }

    let credentials = match username {
        Some(username) => {
            let password = std::env::var(PASSWORD_ENV).map_err(|_| ConfigError::MissingField {
                field: PASSWORD_ENV.to_string(),
            })?;
            Some((username, Secret::new(password)))
        }
        None => None,
    };

    let keeper = Arc::new(StatsKeeper::new());
    let state_keeper = Arc::clone(&keeper);
    let on_state: StateCallback = Arc::new(move |state: ProcessState| {
        match state {
            ProcessState::Connected => {
                state_keeper.mark_session_start();
                println!("{} {}", "●".green(), "connected".green().bold());
            }
            ProcessState::Reconnecting => println!("{} {}", "●".yellow(), state),
            ProcessState::Exiting => {
                state_keeper.mark_session_end();
                println!("{} {}", "●".red(), state);
            }
            state => println!("{} {}", "●".dimmed(), state),
        }
    });

    let mut middlewares: Vec<Box<dyn Middleware>> = vec![
        Box::new(StateMiddleware::new(on_state)),
        Box::new(BytescountMiddleware::new(
            KeeperStatsHandler::new(keeper.clone()),
            config.stats.bytecount_interval(),
        )),
    ];
    if let Some((username, password)) = credentials {
        middlewares.push(Box::new(AuthMiddleware::new(move || -> anyhow::Result<Credentials> {
            Ok(Credentials::new(username.clone(), password.expose_secret().clone()))
        })));
    }

    let client = OpenvpnClient::new(
        binary,
        ClientConfig::from_file(config_file, &config.openvpn.runtime_dir),
        config.openvpn.management_address,
        config.openvpn.management_connect_timeout(),
        middlewares,
    );

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(supervise(client, keeper))
}

/// Run the client until it exits or Ctrl-C, then report the session totals
async fn supervise(client: OpenvpnClient, keeper: Arc<StatsKeeper>) -> Result<(), VpnodeError> {
    client.start().await?;
    println!("Tunnel process started, press Ctrl-C to stop");

    let outcome = tokio::select! {
        outcome = client.wait() => outcome,
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!("Failed to listen for Ctrl-C: {}", e);
            }
            info!("Stopping tunnel process");
            client.stop().await;
            Ok(())
        }
    };

    let stats = keeper.retrieve();
    println!(
        "Sent {} bytes, received {} bytes in {}s",
        stats.bytes_sent.to_string().bold(),
        stats.bytes_received.to_string().bold(),
        keeper.session_duration().as_secs()
    );
    outcome.map_err(VpnodeError::from)
}
