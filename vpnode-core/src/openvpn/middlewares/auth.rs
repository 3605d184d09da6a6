//! Credential challenge middleware

use crate::error::ManagementError;
use crate::openvpn::management::{CommandWriter, Middleware};
use crate::types::Credentials;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info};

static PASSWORD_CHALLENGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^>PASSWORD:Need 'Auth' username/password").expect("Failed to compile auth pattern")
});

/// Source of the credentials answering the challenge
pub trait CredentialsProvider: Send + Sync {
    fn credentials(&self) -> anyhow::Result<Credentials>;
}

impl<F> CredentialsProvider for F
where
    F: Fn() -> anyhow::Result<Credentials> + Send + Sync,
{
    fn credentials(&self) -> anyhow::Result<Credentials> {
        self()
    }
}

/// Answers the process's username/password challenge
///
/// Never writes anything on its own; only reacts to the challenge.
pub struct AuthMiddleware {
    provider: Box<dyn CredentialsProvider>,
    writer: Option<Arc<dyn CommandWriter>>,
}

impl AuthMiddleware {
    pub fn new(provider: impl CredentialsProvider + 'static) -> Self {
        Self {
            provider: Box::new(provider),
            writer: None,
        }
    }
}

impl Middleware for AuthMiddleware {
    fn start(&mut self, writer: Arc<dyn CommandWriter>) -> Result<(), ManagementError> {
        self.writer = Some(writer);
        Ok(())
    }

    fn stop(&mut self, _writer: &dyn CommandWriter) -> Result<(), ManagementError> {
        self.writer = None;
        Ok(())
    }

    fn consume_line(&mut self, line: &str) -> Result<bool, ManagementError> {
        if !PASSWORD_CHALLENGE.is_match(line) {
            return Ok(false);
        }
        info!("Authentication requested by the tunnel process");

        let writer = self.writer.as_ref().ok_or(ManagementError::ConnectionClosed)?;
        let credentials = self
            .provider
            .credentials()
            .map_err(ManagementError::Credentials)?;

        writer.write_line(&format!("password 'Auth' {}", credentials.expose_password()))?;
        writer.write_line(&format!("username 'Auth' {}", credentials.username))?;
        debug!(username = %credentials.username, "Credentials sent");
        Ok(true)
    }
}
