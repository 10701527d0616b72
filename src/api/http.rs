//! reqwest implementation of the backend surface

use super::types::{ErrorBody, SendMessageRequest};
use super::{
    ApiError, AvailabilityResponse, ConsultApi, CreateBookingRequest, CreateSessionRequest,
    SessionSnapshot,
};
use crate::model::Booking;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant};

/// HTTP client for the consultation backend
#[derive(Clone)]
pub struct HttpApi {
    client: Client,
    base_url: String,
}

impl HttpApi {
    pub fn new(base_url: &str, timeout: Duration, user_agent: &str) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| ApiError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn execute(&self, operation: &'static str, request: RequestBuilder) -> Result<Response, ApiError> {
        let start = Instant::now();
        let result = request.send().await;
        let duration_ms = start.elapsed().as_millis();

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(operation, duration_ms = %duration_ms, error = %e, "Request failed");
                return Err(classify_transport_error(&e));
            }
        };

        let status = response.status();
        if status.is_success() {
            tracing::debug!(operation, duration_ms = %duration_ms, status = status.as_u16(), "Request completed");
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(ErrorBody::into_message)
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("Request failed")
                    .to_string()
            });
        tracing::warn!(
            operation,
            duration_ms = %duration_ms,
            status = status.as_u16(),
            error = %message,
            "Request rejected"
        );
        Err(ApiError::from_status(status.as_u16(), message))
    }

    async fn execute_json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<T, ApiError> {
        let response = self.execute(operation, request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::decode(format!("Unexpected {operation} response: {e}")))
    }
}

fn classify_transport_error(e: &reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::timeout("The server took too long to respond")
    } else if e.is_decode() {
        ApiError::decode(e.to_string())
    } else {
        ApiError::network(format!("Could not reach the server: {e}"))
    }
}

#[async_trait]
impl ConsultApi for HttpApi {
    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<SessionSnapshot, ApiError> {
        let req = self.client.post(self.url("/sessions")).json(request);
        self.execute_json("create_session", req).await
    }

    async fn get_session(&self, session_id: &str) -> Result<SessionSnapshot, ApiError> {
        let req = self.client.get(self.url(&format!("/sessions/{session_id}")));
        self.execute_json("get_session", req).await
    }

    async fn resume_session(&self, session_id: &str) -> Result<SessionSnapshot, ApiError> {
        let req = self
            .client
            .post(self.url(&format!("/sessions/{session_id}/resume")));
        self.execute_json("resume_session", req).await
    }

    async fn send_message(&self, session_id: &str, content: &str) -> Result<(), ApiError> {
        let req = self
            .client
            .post(self.url(&format!("/sessions/{session_id}/messages")))
            .json(&SendMessageRequest { content });
        // The reply is folded in by re-fetching the session, so the body is ignored
        self.execute("send_message", req).await.map(drop)
    }

    async fn get_availability(
        &self,
        expert_id: &str,
        timezone: &str,
    ) -> Result<AvailabilityResponse, ApiError> {
        let req = self
            .client
            .get(self.url(&format!("/bookings/experts/{expert_id}/availability")))
            .query(&[("timezone", timezone)]);
        self.execute_json("get_availability", req).await
    }

    async fn create_booking(&self, request: &CreateBookingRequest) -> Result<Booking, ApiError> {
        let req = self.client.post(self.url("/bookings")).json(request);
        self.execute_json("create_booking", req).await
    }

    async fn cancel_booking(&self, booking_id: &str) -> Result<Booking, ApiError> {
        let req = self
            .client
            .post(self.url(&format!("/bookings/{booking_id}/cancel")));
        self.execute_json("cancel_booking", req).await
    }
}
