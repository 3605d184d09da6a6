//! Tunnel client: the process plus its management channel

use crate::connection::Subprocess;
use crate::error::ProcessError;
use crate::openvpn::config::ClientConfig;
use crate::openvpn::management::{Management, Middleware};
use crate::openvpn::process::TunnelProcess;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{info, warn};

/// [`Subprocess`] running the tunnel binary under management control
pub struct OpenvpnClient {
    binary: PathBuf,
    config: Mutex<Option<ClientConfig>>,
    management: Management,
    connect_timeout: Duration,
    process: Mutex<Option<Arc<TunnelProcess>>>,
}

impl OpenvpnClient {
    pub fn new(
        binary: impl Into<PathBuf>,
        config: ClientConfig,
        management_address: SocketAddr,
        connect_timeout: Duration,
        middlewares: Vec<Box<dyn Middleware>>,
    ) -> Self {
        Self {
            binary: binary.into(),
            config: Mutex::new(Some(config)),
            management: Management::new(management_address, middlewares),
            connect_timeout,
            process: Mutex::new(None),
        }
    }

    fn process(&self) -> Option<Arc<TunnelProcess>> {
        self.process
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn spawn(&self) -> Result<Arc<TunnelProcess>, ProcessError> {
        let mut config = self
            .config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| ProcessError::SpawnFailed {
                reason: "client already started".to_string(),
            })?;

        let address = self
            .management
            .listen()
            .await
            .map_err(|e| ProcessError::SpawnFailed {
                reason: format!("management listener: {}", e),
            })?;
        config.set_management_address(address);

        let process = config
            .to_arguments()
            .map(|args| Arc::new(TunnelProcess::new(&self.binary, args)))
            .and_then(|process| process.start().map(|()| process));

        match process {
            Ok(process) => Ok(process),
            Err(e) => {
                self.management.stop().await;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl Subprocess for OpenvpnClient {
    /// Listener first, then the binary pointed at it
    async fn start(&self) -> Result<(), ProcessError> {
        let process = self.spawn().await?;
        *self.process.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&process));

        if let Err(e) = self.management.wait_connected(self.connect_timeout).await {
            warn!("Tunnel process did not connect to management: {}", e);
            if let Err(e) = process.stop() {
                warn!("Failed to stop tunnel process: {}", e);
            }
            self.management.stop().await;
            return Err(ProcessError::SpawnFailed {
                reason: e.to_string(),
            });
        }

        info!("Tunnel process connected to management");
        Ok(())
    }

    async fn stop(&self) {
        if let Some(process) = self.process() {
            if let Err(e) = process.stop() {
                warn!("Failed to stop tunnel process: {}", e);
            }
            // let the exit notification reach the middlewares first
            let _ = process.wait().await;
        }
        self.management.stop().await;
    }

    async fn wait(&self) -> Result<(), ProcessError> {
        let process = self.process().ok_or(ProcessError::NotRunning)?;
        let outcome = process.wait().await;
        self.management.stop().await;
        outcome
    }
}
