//! Connection lifecycle
//!
//! [`ConnectionManager`] turns a connect request into a monitored tunnel
//! session and tears it down on request or when the tunnel process goes away.

pub mod collaborators;
pub mod manager;
pub mod status;

pub use collaborators::{
    Contact, Dialog, DialogCreator, ProposalLookup, ServiceProposal, Session, SessionRequester,
    Subprocess, SubprocessFactory,
};
pub use manager::ConnectionManager;
pub use status::{ConnectionState, ConnectionStatus};
