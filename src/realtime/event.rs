//! Typed realtime events
//!
//! Server payloads are parsed here, at the transport boundary, so that the
//! store only ever sees the entities of [`crate::model`].

use crate::model::{Booking, Expert, GeneratedDocument, Message, Phase, StreamingUpdate, TimeSlot};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

/// Names of the server events consumers can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKey {
    Connected,
    Message,
    MessageStream,
    TypingStart,
    TypingStop,
    PhaseChange,
    Error,
    PrdGenerated,
    ExpertsMatched,
    Availability,
    BookingConfirmed,
}

impl EventKey {
    pub const ALL: [EventKey; 11] = [
        EventKey::Connected,
        EventKey::Message,
        EventKey::MessageStream,
        EventKey::TypingStart,
        EventKey::TypingStop,
        EventKey::PhaseChange,
        EventKey::Error,
        EventKey::PrdGenerated,
        EventKey::ExpertsMatched,
        EventKey::Availability,
        EventKey::BookingConfirmed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKey::Connected => "connected",
            EventKey::Message => "message",
            EventKey::MessageStream => "message_stream",
            EventKey::TypingStart => "typing_start",
            EventKey::TypingStop => "typing_stop",
            EventKey::PhaseChange => "phase_change",
            EventKey::Error => "error",
            EventKey::PrdGenerated => "prd_generated",
            EventKey::ExpertsMatched => "experts_matched",
            EventKey::Availability => "availability",
            EventKey::BookingConfirmed => "booking_confirmed",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

/// Events received from the backend's event channel
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Connected,
    Message(Message),
    MessageStream(StreamingUpdate),
    TypingStart,
    TypingStop,
    PhaseChange { phase: Phase },
    Error { message: String },
    PrdGenerated(GeneratedDocument),
    ExpertsMatched { experts: Vec<Expert> },
    Availability { expert_id: String, slots: Vec<TimeSlot> },
    BookingConfirmed(Booking),
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Unknown event: {0}")]
    UnknownEvent(String),
    #[error("Malformed {event} payload: {message}")]
    Malformed { event: &'static str, message: String },
}

#[derive(Deserialize)]
struct PhasePayload {
    #[serde(alias = "new_phase")]
    phase: Phase,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(alias = "error")]
    message: String,
}

#[derive(Deserialize)]
struct ExpertsPayload {
    experts: Vec<Expert>,
}

#[derive(Deserialize)]
struct AvailabilityPayload {
    expert_id: String,
    #[serde(default)]
    slots: Vec<TimeSlot>,
}

#[derive(Deserialize)]
struct BookingPayload {
    booking: Booking,
}

fn decode<T: for<'de> Deserialize<'de>>(key: EventKey, data: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|e| ProtocolError::Malformed {
        event: key.as_str(),
        message: e.to_string(),
    })
}

impl ServerEvent {
    /// Parse a named event and its JSON payload
    pub fn parse(name: &str, data: Value) -> Result<Self, ProtocolError> {
        let key = EventKey::from_name(name).ok_or_else(|| ProtocolError::UnknownEvent(name.to_string()))?;

        let event = match key {
            EventKey::Connected => ServerEvent::Connected,
            EventKey::Message => ServerEvent::Message(decode(key, data)?),
            EventKey::MessageStream => ServerEvent::MessageStream(decode(key, data)?),
            EventKey::TypingStart => ServerEvent::TypingStart,
            EventKey::TypingStop => ServerEvent::TypingStop,
            EventKey::PhaseChange => {
                let payload: PhasePayload = decode(key, data)?;
                ServerEvent::PhaseChange { phase: payload.phase }
            }
            EventKey::Error => {
                let payload: ErrorPayload = decode(key, data)?;
                ServerEvent::Error { message: payload.message }
            }
            EventKey::PrdGenerated => ServerEvent::PrdGenerated(decode(key, data)?),
            EventKey::ExpertsMatched => {
                let payload: ExpertsPayload = decode(key, data)?;
                ServerEvent::ExpertsMatched { experts: payload.experts }
            }
            EventKey::Availability => {
                let payload: AvailabilityPayload = decode(key, data)?;
                ServerEvent::Availability {
                    expert_id: payload.expert_id,
                    slots: payload.slots,
                }
            }
            EventKey::BookingConfirmed => {
                let payload: BookingPayload = decode(key, data)?;
                ServerEvent::BookingConfirmed(payload.booking)
            }
        };
        Ok(event)
    }

    pub fn key(&self) -> EventKey {
        match self {
            ServerEvent::Connected => EventKey::Connected,
            ServerEvent::Message(_) => EventKey::Message,
            ServerEvent::MessageStream(_) => EventKey::MessageStream,
            ServerEvent::TypingStart => EventKey::TypingStart,
            ServerEvent::TypingStop => EventKey::TypingStop,
            ServerEvent::PhaseChange { .. } => EventKey::PhaseChange,
            ServerEvent::Error { .. } => EventKey::Error,
            ServerEvent::PrdGenerated(_) => EventKey::PrdGenerated,
            ServerEvent::ExpertsMatched { .. } => EventKey::ExpertsMatched,
            ServerEvent::Availability { .. } => EventKey::Availability,
            ServerEvent::BookingConfirmed(_) => EventKey::BookingConfirmed,
        }
    }
}

/// Events emitted to the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Room-join handshake, sent once the channel reports `connected`
    Join { session_id: String },
    SendMessage { session_id: String, content: String },
    RequestAvailability {
        session_id: String,
        expert_id: String,
        timezone: String,
    },
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Join { .. } => "join_session",
            ClientEvent::SendMessage { .. } => "send_message",
            ClientEvent::RequestAvailability { .. } => "request_availability",
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            ClientEvent::Join { session_id } => json!({ "session_id": session_id }),
            ClientEvent::SendMessage { session_id, content } => json!({
                "session_id": session_id,
                "content": content
            }),
            ClientEvent::RequestAvailability {
                session_id,
                expert_id,
                timezone,
            } => json!({
                "session_id": session_id,
                "expert_id": expert_id,
                "timezone": timezone
            }),
        }
    }
}
