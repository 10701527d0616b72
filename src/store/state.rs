//! Store state

use crate::booking::BookingSession;
use crate::model::{Expert, GeneratedDocument, Message, Phase, Session};
use crate::realtime::ConnectionStatus;
use chrono::{DateTime, Utc};

/// The single dismissible error banner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorBanner {
    pub message: String,
    /// Whether re-invoking the failed action may succeed
    pub retryable: bool,
}

impl ErrorBanner {
    pub fn new(message: impl Into<String>, retryable: bool) -> Self {
        Self {
            message: message.into(),
            retryable,
        }
    }
}

/// Session create/load in flight
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LifecycleStatus {
    #[default]
    Idle,
    Creating,
    Loading {
        session_id: String,
    },
}

/// Everything the presentation layer reads
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SyncState {
    pub session_id: Option<String>,
    pub session: Option<Session>,
    /// Ordered by arrival; each id appears at most once
    pub messages: Vec<Message>,
    pub phase: Phase,
    pub is_streaming: bool,
    pub is_loading: bool,
    pub error: Option<ErrorBanner>,
    pub connection: ConnectionStatus,
    pub lifecycle: LifecycleStatus,
    /// Latest generated document
    pub document: Option<GeneratedDocument>,
    pub matched_experts: Vec<Expert>,
    pub booking: BookingSession,
}

impl SyncState {
    pub fn position(&self, message_id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id == message_id)
    }

    pub fn message(&self, message_id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == message_id)
    }

    pub fn has_session(&self) -> bool {
        self.session_id.is_some()
    }

    /// Whether `session_id` is the session this state belongs to
    pub fn is_current(&self, session_id: &str) -> bool {
        self.session_id.as_deref() == Some(session_id)
    }
}

/// Facts the transition reads but does not own
#[derive(Debug, Clone)]
pub struct StoreContext {
    /// Realtime adapter is connected and joined, sampled in the same turn as dispatch
    pub connected: bool,
    pub timezone: String,
    pub now: DateTime<Utc>,
}

impl StoreContext {
    pub fn new(connected: bool, timezone: impl Into<String>) -> Self {
        Self {
            connected,
            timezone: timezone.into(),
            now: Utc::now(),
        }
    }
}
