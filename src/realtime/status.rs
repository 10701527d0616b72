//! Connection status reported by the transport adapter

use super::channel::{TransportError, TransportErrorKind};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    /// Joined the session room; emits go over the channel
    Connected,
    /// Transient: the adapter is retrying after a network drop
    Reconnecting { attempt: u32 },
    /// The server closed the channel; needs reload or re-resume
    Closed { reason: Option<String> },
    /// Reconnect budget spent or connection refused; needs reload or re-resume
    Failed { message: String },
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }

    /// Terminal states require explicit user action
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::Closed { .. } | ConnectionStatus::Failed { .. }
        )
    }

    /// Why nothing can go out until the visitor reloads or resumes
    pub fn terminal_error(&self) -> Option<TransportError> {
        let message = match self {
            ConnectionStatus::Closed { reason: Some(reason) } => {
                format!("The conversation was closed by the server ({reason})")
            }
            ConnectionStatus::Closed { reason: None } => {
                "The conversation was closed by the server".to_string()
            }
            ConnectionStatus::Failed { message } => format!("Connection lost: {message}"),
            _ => return None,
        };
        Some(TransportError::new(TransportErrorKind::NotConnected, message))
    }

    /// The adapter is connected or working towards it
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::Connecting
                | ConnectionStatus::Connected
                | ConnectionStatus::Reconnecting { .. }
        )
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            ConnectionStatus::Closed { .. } => write!(f, "closed by server"),
            ConnectionStatus::Failed { .. } => write!(f, "connection failed"),
        }
    }
}
