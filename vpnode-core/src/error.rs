//! Error types for the vpnode consumer node
//!
//! This module defines all error types used throughout the node, one enum per
//! concern, plus an umbrella error used at the binary boundary.

use thiserror::Error;

/// Main error type for the vpnode application
#[derive(Error, Debug)]
pub enum VpnodeError {
    /// Errors related to configuration loading/parsing
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Errors related to the connection lifecycle
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Errors related to the tunnel management channel
    #[error("Management error: {0}")]
    Management(#[from] ManagementError),

    /// Errors related to the tunnel subprocess
    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    /// Generic I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing errors
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration file: {path}")]
    LoadFailed { path: String },

    #[error("Missing required configuration field: {field}")]
    MissingField { field: String },

    #[error("Configuration validation error: {message}")]
    ValidationError { message: String },

    #[error("I/O error: {message}")]
    IoError { message: String },
}

/// Connection lifecycle errors returned by the connection manager
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Disconnect requested while nothing is active
    #[error("no connection exists")]
    NoConnection,

    /// Connect requested while a connection is active
    #[error("connection already exists")]
    AlreadyExists,

    /// Disconnect was requested while the connection was being established
    #[error("connection was cancelled")]
    ConnectionCancelled,

    /// Tunnel process event stream ended before the tunnel came up
    #[error("openvpn process died")]
    OpenvpnProcessDied,

    #[error("provider has no service proposals")]
    NoProposals,

    #[error("provider proposal has no contacts")]
    NoProviderContacts,

    /// Tunnel subprocess failed to start
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// Error from discovery, dialog or session negotiation, propagated verbatim
    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

/// Errors produced by a [`crate::utils::CancelableCall`]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CallError<E> {
    /// Cancellation won the race against the action
    #[error("action was cancelled")]
    ActionCancelled,

    /// `call()` invoked before an action was configured
    #[error("undefined action")]
    UndefinedAction,

    /// The action itself failed
    #[error("{0}")]
    Action(E),
}

/// Management channel errors
#[derive(Error, Debug)]
pub enum ManagementError {
    /// A line was recognised by a middleware but could not be parsed
    #[error("Failed to parse management line {line:?}: {reason}")]
    Parse { line: String, reason: String },

    #[error("Management connection closed")]
    ConnectionClosed,

    #[error("Management connection was not accepted")]
    ConnectionRefused,

    #[error("Management listener already started")]
    AlreadyListening,

    #[error("Management connection wait timeout after {seconds} seconds")]
    AcceptTimeout { seconds: u64 },

    #[error("Credentials unavailable: {0}")]
    Credentials(#[source] anyhow::Error),

    #[error("Stats handler failed: {0}")]
    Stats(#[from] StatsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Tunnel subprocess errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    #[error("Failed to spawn tunnel process: {reason}")]
    SpawnFailed { reason: String },

    #[error("Tunnel process is not running")]
    NotRunning,

    #[error("Failed to signal tunnel process: {reason}")]
    SignalFailed { reason: String },

    #[error("Tunnel process exited: {status}")]
    Exited { status: String },

    #[error("Invalid tunnel configuration: {reason}")]
    InvalidConfig { reason: String },
}

/// Stats handler errors
#[derive(Error, Debug)]
pub enum StatsError {
    #[error("Session stats handler failed: {0}")]
    HandlerFailed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, VpnodeError>;
