//! Tunnel process states reported over the management channel

use std::fmt;
use std::sync::Arc;

/// State of the tunnel process
///
/// Variants follow the order the process walks through while connecting.
/// `ChannelClosed` is never reported by the process itself: it marks the end
/// of the state event stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProcessState {
    ProcessStarted,
    Authenticating,
    GettingConfig,
    AssigningIp,
    AddingRoutes,
    Connected,
    Reconnecting,
    Exiting,
    /// A state name this node does not know yet, kept verbatim
    Unknown(String),
    /// The event stream ended
    ChannelClosed,
}

impl ProcessState {
    /// Map a management protocol state name
    pub fn from_name(name: &str) -> Self {
        match name {
            "CONNECTING" | "WAIT" => Self::ProcessStarted,
            "AUTH" => Self::Authenticating,
            "GET_CONFIG" => Self::GettingConfig,
            "ASSIGN_IP" => Self::AssigningIp,
            "ADD_ROUTES" => Self::AddingRoutes,
            "CONNECTED" => Self::Connected,
            "RECONNECTING" => Self::Reconnecting,
            "EXITING" => Self::Exiting,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// True for the states after which the process is gone
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exiting | Self::ChannelClosed)
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProcessStarted => write!(f, "process started"),
            Self::Authenticating => write!(f, "authenticating"),
            Self::GettingConfig => write!(f, "getting config"),
            Self::AssigningIp => write!(f, "assigning ip"),
            Self::AddingRoutes => write!(f, "adding routes"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Exiting => write!(f, "exiting"),
            Self::Unknown(name) => write!(f, "unknown ({})", name),
            Self::ChannelClosed => write!(f, "channel closed"),
        }
    }
}

/// Subscriber invoked with every state the process reports
pub type StateCallback = Arc<dyn Fn(ProcessState) + Send + Sync>;
