//! Backend request/response surface
//!
//! The backend owns sessions, history and bookings; this module is the only
//! place that talks to it over plain HTTP.

mod http;
pub mod types;

pub use http::HttpApi;
pub use types::{AvailabilityResponse, CreateBookingRequest, CreateSessionRequest, SessionSnapshot};

use crate::model::Booking;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Request error with classification
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    /// HTTP status, when the server answered at all
    pub status: Option<u16>,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Timeout, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::NotFound, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Rejected, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Server, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Decode, message)
    }

    /// Classify an HTTP error status
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            404 | 410 => ApiErrorKind::NotFound,
            408 => ApiErrorKind::Timeout,
            429 => ApiErrorKind::Server,
            400..=499 => ApiErrorKind::Rejected,
            _ => ApiErrorKind::Server,
        };
        Self::new(kind, message).with_status(status)
    }
}

/// Error classification for the error banner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// Connection refused, DNS, reset - retryable
    Network,
    /// Request timed out - retryable
    Timeout,
    /// Unknown session or booking (404, 410) - not retryable
    NotFound,
    /// Validation or auth failure (4xx) - not retryable
    Rejected,
    /// Server error (5xx) or rate limit - retryable
    Server,
    /// Response body did not match the expected shape
    Decode,
}

impl ApiErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Network | Self::Timeout | Self::Server)
    }
}

/// Backend operations consumed by the widget
#[async_trait]
pub trait ConsultApi: Send + Sync + 'static {
    /// `POST /sessions`
    async fn create_session(&self, request: &CreateSessionRequest)
        -> Result<SessionSnapshot, ApiError>;

    /// `GET /sessions/{id}`
    async fn get_session(&self, session_id: &str) -> Result<SessionSnapshot, ApiError>;

    /// `POST /sessions/{id}/resume`
    async fn resume_session(&self, session_id: &str) -> Result<SessionSnapshot, ApiError>;

    /// `POST /sessions/{id}/messages`
    async fn send_message(&self, session_id: &str, content: &str) -> Result<(), ApiError>;

    /// `GET /bookings/experts/{id}/availability?timezone=...`
    async fn get_availability(
        &self,
        expert_id: &str,
        timezone: &str,
    ) -> Result<AvailabilityResponse, ApiError>;

    /// `POST /bookings`
    async fn create_booking(&self, request: &CreateBookingRequest) -> Result<Booking, ApiError>;

    /// `POST /bookings/{id}/cancel`
    async fn cancel_booking(&self, booking_id: &str) -> Result<Booking, ApiError>;
}

#[async_trait]
impl<T: ConsultApi + ?Sized> ConsultApi for Arc<T> {
    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<SessionSnapshot, ApiError> {
        (**self).create_session(request).await
    }

    async fn get_session(&self, session_id: &str) -> Result<SessionSnapshot, ApiError> {
        (**self).get_session(session_id).await
    }

    async fn resume_session(&self, session_id: &str) -> Result<SessionSnapshot, ApiError> {
        (**self).resume_session(session_id).await
    }

    async fn send_message(&self, session_id: &str, content: &str) -> Result<(), ApiError> {
        (**self).send_message(session_id, content).await
    }

    async fn get_availability(
        &self,
        expert_id: &str,
        timezone: &str,
    ) -> Result<AvailabilityResponse, ApiError> {
        (**self).get_availability(expert_id, timezone).await
    }

    async fn create_booking(&self, request: &CreateBookingRequest) -> Result<Booking, ApiError> {
        (**self).create_booking(request).await
    }

    async fn cancel_booking(&self, booking_id: &str) -> Result<Booking, ApiError> {
        (**self).cancel_booking(booking_id).await
    }
}
