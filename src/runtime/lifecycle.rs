//! Session lifecycle manager
//!
//! Creates and resumes sessions against the backend and is the only component
//! that reads or writes the identity store.

use super::RuntimeConfig;
use crate::api::{ConsultApi, CreateSessionRequest};
use crate::identity::{IdentityError, IdentityStore};
use crate::store::{SessionTarget, StoreEvent};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

pub struct SessionLifecycle<A: ConsultApi, I: IdentityStore> {
    api: Arc<A>,
    identity: I,
    referrer: Option<String>,
    user_agent: Option<String>,
}

impl<A: ConsultApi, I: IdentityStore> SessionLifecycle<A, I> {
    pub fn new(api: Arc<A>, identity: I, config: &RuntimeConfig) -> Self {
        Self {
            api,
            identity,
            referrer: config.referrer.clone(),
            user_agent: config.user_agent.clone(),
        }
    }

    /// Session id persisted by an earlier run
    pub fn stored_session(&self) -> Result<Option<String>, IdentityError> {
        self.identity.session_id()
    }

    /// The device's visitor id, generated on first use
    pub fn visitor_id(&self) -> Result<String, IdentityError> {
        let candidate = Uuid::new_v4().to_string();
        let visitor_id = self.identity.ensure_visitor_id(&candidate)?;
        if visitor_id == candidate {
            tracing::info!(visitor_id = %visitor_id, "Generated visitor id");
        }
        Ok(visitor_id)
    }

    /// `POST /sessions`; the outcome is reported as a store event
    pub fn create(&self, visitor_id: String, events: &mpsc::UnboundedSender<StoreEvent>) {
        let api = Arc::clone(&self.api);
        let events = events.clone();
        let request = CreateSessionRequest {
            visitor_id,
            referrer_url: self.referrer.clone(),
            user_agent: self.user_agent.clone(),
        };

        tokio::spawn(async move {
            let event = match api.create_session(&request).await {
                Ok(snapshot) => {
                    tracing::info!(
                        session_id = %snapshot.session.id,
                        messages = snapshot.messages.len(),
                        "Session created"
                    );
                    StoreEvent::SessionCreated { snapshot }
                }
                Err(error) => {
                    tracing::warn!(visitor_id = %request.visitor_id, error = %error, "Session create failed");
                    StoreEvent::SessionFailed {
                        target: SessionTarget::Create,
                        error,
                    }
                }
            };
            let _ = events.send(event);
        });
    }

    /// `POST /sessions/{id}/resume`; the outcome is reported as a store event
    pub fn resume(&self, session_id: String, events: &mpsc::UnboundedSender<StoreEvent>) {
        let api = Arc::clone(&self.api);
        let events = events.clone();

        tokio::spawn(async move {
            let event = match api.resume_session(&session_id).await {
                Ok(snapshot) => {
                    tracing::info!(
                        session_id = %session_id,
                        messages = snapshot.messages.len(),
                        "Session resumed"
                    );
                    StoreEvent::SessionResumed { snapshot }
                }
                Err(error) => {
                    tracing::warn!(session_id = %session_id, error = %error, "Session resume failed");
                    StoreEvent::SessionFailed {
                        target: SessionTarget::Load { session_id },
                        error,
                    }
                }
            };
            let _ = events.send(event);
        });
    }

    pub fn persist(&self, session_id: &str) -> Result<(), IdentityError> {
        self.identity.set_session_id(session_id)
    }

    /// Drop the stored session id if it is still `session_id`
    pub fn forget(&self, session_id: &str) -> Result<bool, IdentityError> {
        let removed = self.identity.clear_session_id(session_id)?;
        if removed {
            tracing::info!(session_id = %session_id, "Forgot stored session");
        }
        Ok(removed)
    }
}
