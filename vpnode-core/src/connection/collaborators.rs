//! Interfaces the connection manager depends on
//!
//! Discovery, dialogs and session negotiation live outside this crate. They
//! report failures as [`anyhow::Error`], which the manager propagates as is.

use crate::error::ProcessError;
use crate::openvpn::StateCallback;
use crate::types::{Identity, SessionId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Address at which a provider can be reached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(rename = "type")]
    pub contact_type: String,
    pub definition: serde_json::Value,
}

/// A provider's advertised service offer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceProposal {
    pub id: u64,
    pub provider_id: String,
    pub service_type: String,
    pub provider_contacts: Vec<Contact>,
}

/// Negotiated session: identifier plus the tunnel configuration (JSON)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub config: String,
}

#[async_trait]
pub trait ProposalLookup: Send + Sync {
    /// Proposals published by the provider, possibly none
    async fn find_proposals(&self, provider: &Identity) -> anyhow::Result<Vec<ServiceProposal>>;
}

/// Authenticated message channel to a provider
#[async_trait]
pub trait Dialog: Send + Sync {
    async fn close(&self) -> anyhow::Result<()>;
}

#[async_trait]
pub trait DialogCreator: Send + Sync {
    async fn create_dialog(
        &self,
        consumer: &Identity,
        provider: &Identity,
        contact: &Contact,
    ) -> anyhow::Result<Arc<dyn Dialog>>;
}

#[async_trait]
pub trait SessionRequester: Send + Sync {
    async fn request_session(&self, dialog: Arc<dyn Dialog>, proposal_id: u64) -> anyhow::Result<Session>;
}

/// Tunnel subprocess driven by the manager
#[async_trait]
pub trait Subprocess: Send + Sync {
    /// Start the process; returns once it is running
    async fn start(&self) -> Result<(), ProcessError>;

    /// Request shutdown; the process reports `Exiting` and goes away
    async fn stop(&self);

    /// Resolves when the process exited
    async fn wait(&self) -> Result<(), ProcessError>;
}

pub trait SubprocessFactory: Send + Sync {
    /// Build a subprocess reporting its states to `state_sink`
    fn create(
        &self,
        session: &Session,
        consumer: &Identity,
        provider: &Identity,
        state_sink: StateCallback,
    ) -> anyhow::Result<Arc<dyn Subprocess>>;
}
