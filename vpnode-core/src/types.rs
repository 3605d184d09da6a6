//! Shared value types
//!
//! Identities, session identifiers, traffic counters and credentials. Secret
//! material is wrapped with the secrecy crate so it never ends up in logs or
//! debug output.

use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Node identity, addressed by its public address
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub address: String,
}

impl Identity {
    pub fn from_address(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

/// Identifier of a negotiated tunnel session
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Traffic counters reported by the tunnel process
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Username/password pair answered to the tunnel's credential challenge
///
/// The password is a signature over the session id, so it is kept secret.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub username: String,
    password: Secret<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: String) -> Self {
        Self {
            username: username.into(),
            password: Secret::new(password),
        }
    }

    /// Expose the password value (use with caution!)
    ///
    /// Only the auth middleware should call this, when writing the
    /// password command to the management channel.
    pub fn expose_password(&self) -> &str {
        self.password.expose_secret()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::new("0xconsumer", "signed-session".to_string());
        let debug = format!("{:?}", creds);

        assert!(debug.contains("0xconsumer"));
        assert!(!debug.contains("signed-session"));
        assert_eq!(creds.expose_password(), "signed-session");
    }

    #[test]
    fn test_session_id_serializes_as_plain_string() {
        let id = SessionId::new("session-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"session-1\"");
        assert_eq!(id.to_string(), "session-1");
    }
}
