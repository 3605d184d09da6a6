//! Production [`SubprocessFactory`]
//!
//! Wires a negotiated session into an [`OpenvpnClient`] with the state,
//! traffic counter and credential middlewares.

use crate::config::NodeConfig;
use crate::connection::{Session, Subprocess, SubprocessFactory};
use crate::error::ProcessError;
use crate::openvpn::client::OpenvpnClient;
use crate::openvpn::config::{ClientConfig, VpnConfig};
use crate::openvpn::management::Middleware;
use crate::openvpn::middlewares::{
    AuthMiddleware, BytescountMiddleware, CredentialsProvider, StateMiddleware,
};
use crate::openvpn::state::StateCallback;
use crate::stats::{
    CompositeStatsHandler, KeeperStatsHandler, RemoteStatsHandler, SelectiveStatsHandler,
    SessionStatsKeeper, StatsSender,
};
use crate::types::{Credentials, Identity, SessionId};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Signs messages with the consumer identity's key
pub trait Signer: Send + Sync {
    fn sign(&self, message: &[u8]) -> anyhow::Result<String>;
}

/// Credentials proving the consumer owns the session
///
/// Username is the consumer address, password the signature of the session id.
pub struct SignedSessionCredentials {
    consumer: Identity,
    session_id: SessionId,
    signer: Arc<dyn Signer>,
}

impl SignedSessionCredentials {
    pub fn new(consumer: Identity, session_id: SessionId, signer: Arc<dyn Signer>) -> Self {
        Self {
            consumer,
            session_id,
            signer,
        }
    }
}

impl CredentialsProvider for SignedSessionCredentials {
    fn credentials(&self) -> anyhow::Result<Credentials> {
        let signature = self.signer.sign(self.session_id.as_str().as_bytes())?;
        Ok(Credentials::new(self.consumer.address.clone(), signature))
    }
}

pub struct OpenvpnSubprocessFactory {
    config: NodeConfig,
    keeper: Arc<dyn SessionStatsKeeper>,
    signer: Arc<dyn Signer>,
    stats_sender: Option<Arc<dyn StatsSender>>,
}

impl OpenvpnSubprocessFactory {
    pub fn new(config: NodeConfig, keeper: Arc<dyn SessionStatsKeeper>, signer: Arc<dyn Signer>) -> Self {
        Self {
            config,
            keeper,
            signer,
            stats_sender: None,
        }
    }

    /// Also report stats to a remote service, throttled to the report interval
    pub fn with_stats_sender(mut self, sender: Arc<dyn StatsSender>) -> Self {
        self.stats_sender = Some(sender);
        self
    }

    /// Middlewares for one session, in dispatch order
    pub fn middlewares(
        &self,
        session_id: &SessionId,
        consumer: &Identity,
        state_sink: StateCallback,
    ) -> Vec<Box<dyn Middleware>> {
        let mut stats = CompositeStatsHandler::new().with(KeeperStatsHandler::new(Arc::clone(&self.keeper)));
        if let Some(sender) = &self.stats_sender {
            stats = stats.with(SelectiveStatsHandler::new(
                RemoteStatsHandler::new(session_id.clone(), Arc::clone(sender)),
                self.config.stats.report_interval(),
            ));
        }

        let credentials =
            SignedSessionCredentials::new(consumer.clone(), session_id.clone(), Arc::clone(&self.signer));

        vec![
            Box::new(StateMiddleware::new(state_sink)),
            Box::new(BytescountMiddleware::new(stats, self.config.stats.bytecount_interval())),
            Box::new(AuthMiddleware::new(credentials)),
        ]
    }
}

/// Per-session directory under `root`
///
/// The session id comes from the provider, so it must be a single plain path
/// component.
fn session_runtime_dir(root: &Path, session_id: &SessionId) -> Result<PathBuf, ProcessError> {
    let mut components = Path::new(session_id.as_str()).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) => Ok(root.join(name)),
        _ => Err(ProcessError::InvalidConfig {
            reason: format!("session id {:?} is not a valid directory name", session_id.as_str()),
        }),
    }
}

impl SubprocessFactory for OpenvpnSubprocessFactory {
    fn create(
        &self,
        session: &Session,
        consumer: &Identity,
        provider: &Identity,
        state_sink: StateCallback,
    ) -> anyhow::Result<Arc<dyn Subprocess>> {
        let vpn = VpnConfig::from_json(&session.config)?;
        debug!(
            session_id = %session.id,
            provider = %provider,
            "Building tunnel client for {}:{} over {}",
            vpn.remote_ip,
            vpn.port,
            vpn.protocol
        );

        let settings = &self.config.openvpn;
        let runtime_dir = session_runtime_dir(&settings.runtime_dir, &session.id)?;
        let client = OpenvpnClient::new(
            &settings.binary,
            ClientConfig::from_session(&vpn, runtime_dir),
            settings.management_address,
            settings.management_connect_timeout(),
            self.middlewares(&session.id, consumer, state_sink),
        );
        Ok(Arc::new(client))
    }
}
