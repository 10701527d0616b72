//! Conversation and booking entities
//!
//! Every payload that crosses the wire is parsed into these types at the
//! transport or HTTP boundary; nothing downstream handles raw JSON except the
//! backend-owned context maps on [`Session`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[serde(alias = "user")]
    Visitor,
    #[serde(alias = "assistant")]
    Consultant,
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Visitor => write!(f, "visitor"),
            Role::Consultant => write!(f, "consultant"),
            Role::System => write!(f, "system"),
        }
    }
}

/// Local delivery status of a message.
///
/// Only optimistic echoes are ever `Pending` or `Failed`; anything that came
/// from the backend is `Confirmed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    #[default]
    Confirmed,
    Pending,
    Failed,
}

/// One turn in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing)]
    pub delivery: Delivery,
}

impl Message {
    /// Locally synthesized copy of a just-sent visitor message
    pub fn optimistic(
        local_id: impl Into<String>,
        session_id: impl Into<String>,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: local_id.into(),
            session_id: session_id.into(),
            role: Role::Visitor,
            content: content.into(),
            metadata: Map::new(),
            created_at,
            delivery: Delivery::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.delivery == Delivery::Pending
    }
}

/// A partial or final revision of a consultant message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingUpdate {
    #[serde(alias = "id")]
    pub message_id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default)]
    pub is_complete: bool,
}

/// Backend-driven stage label. The client never invents one.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Phase(pub String);

impl Phase {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-side lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Active,
    Paused,
    Completed,
    Abandoned,
}

/// A durable server-owned conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub visitor_id: Option<String>,
    #[serde(default)]
    pub phase: Phase,
    #[serde(default)]
    pub status: SessionStatus,
    #[serde(default)]
    pub client_info: Map<String, Value>,
    #[serde(default)]
    pub business_context: Map<String, Value>,
    #[serde(default)]
    pub qualification: Map<String, Value>,
}

/// A document generated by the consultant (e.g. a product requirements draft)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedDocument {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    pub content: String,
}

/// A human expert offered to the visitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expert {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub specialties: Vec<String>,
    #[serde(default)]
    pub match_score: Option<f64>,
}

/// An offered appointment window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub timezone: String,
    #[serde(default)]
    pub display_date: String,
    #[serde(default)]
    pub display_time: String,
}

impl TimeSlot {
    /// Two slots are the same window if they start and end together
    pub fn same_window(&self, other: &TimeSlot) -> bool {
        self.start_time == other.start_time && self.end_time == other.end_time
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    #[default]
    Confirmed,
    Cancelled,
}

/// A booking accepted by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub session_id: String,
    pub expert_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub timezone: String,
    pub client_name: String,
    pub client_email: String,
    #[serde(default)]
    pub status: BookingStatus,
    #[serde(default)]
    pub meeting_url: Option<String>,
}
