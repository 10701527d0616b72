//! Fallback dispatcher
//!
//! Request/response rendition of realtime operations, used when the adapter
//! is not connected at the moment the store chooses a path.

use crate::api::{ApiError, ConsultApi, SessionSnapshot};
use crate::booking::BookingAction;
use crate::store::{FallbackOp, StoreEvent};
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct FallbackDispatcher<A: ConsultApi> {
    api: Arc<A>,
}

impl<A: ConsultApi> FallbackDispatcher<A> {
    pub fn new(api: Arc<A>) -> Self {
        Self { api }
    }

    /// Run `op` in the background and report its completion as a store event
    pub fn dispatch(&self, op: FallbackOp, events: &mpsc::UnboundedSender<StoreEvent>) {
        let api = Arc::clone(&self.api);
        let events = events.clone();
        tokio::spawn(async move {
            let event = execute(api.as_ref(), op).await;
            let _ = events.send(event);
        });
    }
}

async fn send_and_refetch<A: ConsultApi>(
    api: &A,
    session_id: &str,
    content: &str,
) -> Result<SessionSnapshot, ApiError> {
    api.send_message(session_id, content).await?;
    // The reply is generated synchronously server-side; the canonical
    // session carries it along with the confirmed visitor message
    api.get_session(session_id).await
}

pub(crate) async fn execute<A: ConsultApi>(api: &A, op: FallbackOp) -> StoreEvent {
    match op {
        FallbackOp::SendMessage {
            session_id,
            local_id,
            content,
        } => match send_and_refetch(api, &session_id, &content).await {
            Ok(snapshot) => {
                tracing::debug!(
                    session_id = %session_id,
                    messages = snapshot.messages.len(),
                    "Fallback send completed"
                );
                StoreEvent::FallbackCompleted {
                    session_id,
                    local_id,
                    snapshot,
                }
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Fallback send failed");
                StoreEvent::SendFailed {
                    session_id,
                    local_id,
                    message: format!("Message not delivered: {e}"),
                    retryable: e.kind.is_retryable(),
                }
            }
        },

        FallbackOp::FetchAvailability {
            session_id,
            expert_id,
            timezone,
        } => {
            let action = match api.get_availability(&expert_id, &timezone).await {
                Ok(response) => BookingAction::AvailabilityLoaded {
                    expert_id,
                    slots: response.slots,
                },
                Err(e) => {
                    tracing::warn!(expert_id = %expert_id, error = %e, "Availability fetch failed");
                    BookingAction::AvailabilityFailed {
                        expert_id,
                        message: format!("Could not load availability: {e}"),
                        retryable: e.kind.is_retryable(),
                    }
                }
            };
            StoreEvent::BookingResult { session_id, action }
        }
    }
}
