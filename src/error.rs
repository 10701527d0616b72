//! Error taxonomy surfaced to widget consumers

use crate::api::ApiError;
use crate::identity::IdentityError;
use crate::realtime::TransportError;
use std::fmt;
use thiserror::Error;

/// Errors returned from the widget's action surface
#[derive(Debug, Error)]
pub enum SyncError {
    /// Action attempted with no active session
    #[error("No active session; start a conversation first")]
    NoSession,
    /// The realtime connection was closed by the server or gave up reconnecting
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// A fallback or lifecycle request failed
    #[error(transparent)]
    Request(#[from] ApiError),
    /// Input rejected locally before any network call
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Response for a session that is no longer current
    #[error("Dropped response for session {received} (current: {expected:?})")]
    StaleResponse {
        expected: Option<String>,
        received: String,
    },
    /// Action not available in the current state
    #[error("{0}")]
    InvalidAction(String),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    /// The runtime task has stopped
    #[error("Widget runtime has shut down")]
    Closed,
}

/// One rejected input field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// Locally detected malformed input, keyed by field
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ValidationError {
    pub fields: Vec<FieldError>,
}

impl ValidationError {
    pub fn field(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            fields: vec![FieldError {
                field,
                message: message.into(),
            }],
        }
    }

    /// Message for a single field, if it was rejected
    pub fn message_for(&self, field: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.field == field)
            .map(|f| f.message.as_str())
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<&str> = self.fields.iter().map(|e| e.message.as_str()).collect();
        write!(f, "{}", messages.join("; "))
    }
}
