//! Core library for the vpnode consumer node
//!
//! This crate provides the connection lifecycle of a peer-to-peer VPN
//! consumer: session negotiation through pluggable collaborators, the tunnel
//! process with its management channel middlewares, and session statistics.

pub mod error;
pub mod types;

pub mod config;
pub mod connection;
pub mod openvpn;
pub mod stats;
pub mod utils;

/// Initialize logging infrastructure
///
/// Sets up tracing with systemd journal logging when running under systemd.
/// Otherwise logs to stderr. The level defaults to INFO and can be changed
/// with `RUST_LOG`.
pub fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    #[cfg(target_os = "linux")]
    {
        if std::env::var("JOURNAL_STREAM").is_ok() {
            let journal_layer = tracing_journald::layer()?;
            tracing_subscriber::registry()
                .with(journal_layer)
                .with(filter)
                .try_init()?;
            return Ok(());
        }
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()?;

    Ok(())
}
