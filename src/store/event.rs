//! Events fed into the store

use crate::api::{ApiError, SessionSnapshot};
use crate::booking::BookingAction;
use crate::realtime::{ConnectionStatus, ServerEvent};
use chrono::{DateTime, Utc};

/// Which lifecycle request a failure belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTarget {
    Create,
    Load { session_id: String },
}

#[derive(Debug, Clone)]
pub enum StoreEvent {
    // Session lifecycle
    CreateRequested {
        visitor_id: String,
    },
    LoadRequested {
        session_id: String,
    },
    SessionCreated {
        snapshot: SessionSnapshot,
    },
    SessionResumed {
        snapshot: SessionSnapshot,
    },
    SessionFailed {
        target: SessionTarget,
        error: ApiError,
    },

    // Outgoing messages
    LocalSend {
        local_id: String,
        content: String,
        sent_at: DateTime<Utc>,
    },
    FallbackCompleted {
        session_id: String,
        local_id: String,
        snapshot: SessionSnapshot,
    },
    SendFailed {
        session_id: String,
        local_id: String,
        message: String,
        retryable: bool,
    },

    // Realtime
    Server {
        session_id: String,
        event: ServerEvent,
    },
    ConnectionChanged(ConnectionStatus),

    /// Booking action from the visitor
    Booking(BookingAction),
    /// Booking request completion, tagged with the session it was issued for
    BookingResult {
        session_id: String,
        action: BookingAction,
    },

    ClearError,
}

impl StoreEvent {
    /// Session an asynchronous completion was issued for, if any
    pub fn origin_session(&self) -> Option<&str> {
        match self {
            StoreEvent::FallbackCompleted { session_id, .. }
            | StoreEvent::SendFailed { session_id, .. }
            | StoreEvent::Server { session_id, .. }
            | StoreEvent::BookingResult { session_id, .. } => Some(session_id),
            _ => None,
        }
    }
}
