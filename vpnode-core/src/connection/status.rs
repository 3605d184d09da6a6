//! Connection status reported to the API layer

use crate::types::SessionId;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ConnectionState {
    NotConnected,
    Connecting,
    Connected,
    Disconnecting,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotConnected => "NotConnected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Disconnecting => "Disconnecting",
            Self::Reconnecting => "Reconnecting",
        };
        f.write_str(name)
    }
}

/// Connection state plus the session it belongs to
///
/// The session id is present exactly when the state is `Connected`; the
/// constructors are the only way to build a status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    state: ConnectionState,
    session_id: Option<SessionId>,
}

impl ConnectionStatus {
    pub fn not_connected() -> Self {
        Self::without_session(ConnectionState::NotConnected)
    }

    pub fn connecting() -> Self {
        Self::without_session(ConnectionState::Connecting)
    }

    pub fn connected(session_id: SessionId) -> Self {
        Self {
            state: ConnectionState::Connected,
            session_id: Some(session_id),
        }
    }

    pub fn disconnecting() -> Self {
        Self::without_session(ConnectionState::Disconnecting)
    }

    pub fn reconnecting() -> Self {
        Self::without_session(ConnectionState::Reconnecting)
    }

    fn without_session(state: ConnectionState) -> Self {
        Self {
            state,
            session_id: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::not_connected()
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.session_id {
            Some(id) => write!(f, "{} (session {})", self.state, id),
            None => write!(f, "{}", self.state),
        }
    }
}
