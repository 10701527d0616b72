//! Effects produced by store transitions

use crate::api::CreateBookingRequest;
use crate::realtime::ClientEvent;

/// Request/response work routed to the fallback dispatcher
#[derive(Debug, Clone, PartialEq)]
pub enum FallbackOp {
    SendMessage {
        session_id: String,
        local_id: String,
        content: String,
    },
    FetchAvailability {
        session_id: String,
        expert_id: String,
        timezone: String,
    },
}

/// Effects to be executed by the runtime after a transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// `POST /sessions` with the visitor id
    CreateSession { visitor_id: String },
    /// `POST /sessions/{id}/resume`
    ResumeSession { session_id: String },
    /// Write the active session id to the identity store
    PersistSessionId { session_id: String },
    /// Drop a stored session id the backend no longer knows
    ForgetSessionId { session_id: String },
    /// Open the realtime channel, replacing any connection to another session
    Connect { session_id: String },
    /// Send a visitor message over the realtime channel
    EmitMessage {
        session_id: String,
        local_id: String,
        content: String,
    },
    /// Emit any other event over the realtime channel
    Emit(ClientEvent),
    Fallback(FallbackOp),
    CreateBooking(CreateBookingRequest),
    CancelBooking {
        session_id: String,
        booking_id: String,
    },
    StartRefreshTimer,
    StopRefreshTimer,
}
