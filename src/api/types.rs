//! Backend request and response types

use crate::model::{Message, Session, TimeSlot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Request to create a new session
#[derive(Debug, Clone, Serialize)]
pub struct CreateSessionRequest {
    pub visitor_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// A session together with its message history
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SessionSnapshot {
    #[serde(flatten)]
    pub session: Session,
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// Fallback message send
#[derive(Debug, Clone, Serialize)]
pub struct SendMessageRequest<'a> {
    pub content: &'a str,
}

/// Slots offered by one expert
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AvailabilityResponse {
    #[serde(default)]
    pub expert_id: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub slots: Vec<TimeSlot>,
}

/// Request to book a slot with an expert
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateBookingRequest {
    pub session_id: String,
    pub expert_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub timezone: String,
    pub client_name: String,
    pub client_email: String,
}

/// Error body shapes the backend is known to return
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub detail: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorBody {
    pub(crate) fn into_message(self) -> Option<String> {
        self.message.or(self.error).or_else(|| {
            self.detail.map(|d| match d {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            })
        })
    }
}
