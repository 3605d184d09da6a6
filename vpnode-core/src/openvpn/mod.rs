//! Tunnel process integration
//!
//! Everything needed to run the tunnel binary as a [`crate::connection::Subprocess`]:
//! the management channel with its middlewares, the process wrapper and the
//! client configuration.

pub mod client;
pub mod config;
pub mod factory;
pub mod management;
pub mod middlewares;
pub mod process;
pub mod state;

pub use client::OpenvpnClient;
pub use config::{ClientConfig, VpnConfig};
pub use factory::{OpenvpnSubprocessFactory, SignedSessionCredentials, Signer};
pub use management::{CommandWriter, Management, Middleware};
pub use process::TunnelProcess;
pub use state::{ProcessState, StateCallback};
