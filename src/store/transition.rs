//! Pure store transition function
//!
//! Given the same state, context and event this always produces the same
//! state and effects, with no I/O. Reconciliation rules:
//!
//! - a message whose id is already in the log is replaced in place
//! - a server copy of a visitor message replaces the matching pending echo
//! - anything else is appended, so log order is event processing order
//! - session snapshots (create, resume, fallback) replace the log wholesale
//!
//! Completions tagged with a session id are checked against the current
//! session before anything else and rejected as stale on mismatch.

use super::effect::{Effect, FallbackOp};
use super::event::{SessionTarget, StoreEvent};
use super::state::{ErrorBanner, LifecycleStatus, StoreContext, SyncState};
use crate::api::{ApiErrorKind, CreateBookingRequest, SessionSnapshot};
use crate::booking::{self, BookingAction, BookingEffect, BookingError, BookingSession};
use crate::model::{Delivery, Message, Role, StreamingUpdate};
use crate::realtime::{ClientEvent, ConnectionStatus, ServerEvent};
use thiserror::Error;

/// Result of a store transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: SyncState,
    pub effects: Vec<Effect>,
}

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("No active session; start a conversation first")]
    NoSession,
    #[error("A session is already active")]
    SessionExists,
    #[error("A session request is already in progress")]
    LifecycleBusy,
    #[error("Message is empty")]
    EmptyMessage,
    #[error("Stale result for session {received} (current: {expected:?})")]
    Stale {
        expected: Option<String>,
        received: String,
    },
    #[error(transparent)]
    Booking(#[from] BookingError),
}

impl TransitionError {
    /// Late completions are dropped silently rather than surfaced
    pub fn is_stale(&self) -> bool {
        matches!(
            self,
            TransitionError::Stale { .. } | TransitionError::Booking(BookingError::Stale(_))
        )
    }
}

pub fn transition(
    state: &SyncState,
    context: &StoreContext,
    event: StoreEvent,
) -> Result<TransitionResult, TransitionError> {
    if let Some(origin) = event.origin_session() {
        if !state.is_current(origin) {
            return Err(TransitionError::Stale {
                expected: state.session_id.clone(),
                received: origin.to_string(),
            });
        }
    }

    let mut next = state.clone();
    let mut effects = Vec::new();

    match event {
        // ============================================================
        // Session lifecycle
        // ============================================================
        StoreEvent::CreateRequested { visitor_id } => {
            if state.lifecycle != LifecycleStatus::Idle {
                return Err(TransitionError::LifecycleBusy);
            }
            if state.has_session() {
                return Err(TransitionError::SessionExists);
            }
            next.lifecycle = LifecycleStatus::Creating;
            next.is_loading = true;
            next.error = None;
            effects.push(Effect::CreateSession { visitor_id });
        }

        StoreEvent::LoadRequested { session_id } => {
            if state.lifecycle != LifecycleStatus::Idle {
                return Err(TransitionError::LifecycleBusy);
            }
            next.lifecycle = LifecycleStatus::Loading {
                session_id: session_id.clone(),
            };
            next.is_loading = true;
            next.error = None;
            effects.push(Effect::ResumeSession { session_id });
        }

        StoreEvent::SessionCreated { snapshot } => {
            if state.lifecycle != LifecycleStatus::Creating {
                return Err(TransitionError::Stale {
                    expected: None,
                    received: snapshot.session.id,
                });
            }
            adopt_snapshot(state, &mut next, &mut effects, snapshot);
        }

        StoreEvent::SessionResumed { snapshot } => {
            let loading = matches!(
                &state.lifecycle,
                LifecycleStatus::Loading { session_id } if *session_id == snapshot.session.id
            );
            if !loading {
                return Err(TransitionError::Stale {
                    expected: lifecycle_target(&state.lifecycle),
                    received: snapshot.session.id,
                });
            }
            adopt_snapshot(state, &mut next, &mut effects, snapshot);
        }

        StoreEvent::SessionFailed { target, error } => {
            let matches_request = match (&state.lifecycle, &target) {
                (LifecycleStatus::Creating, SessionTarget::Create) => true,
                (LifecycleStatus::Loading { session_id: a }, SessionTarget::Load { session_id: b }) => a == b,
                _ => false,
            };
            if !matches_request {
                return Err(TransitionError::Stale {
                    expected: lifecycle_target(&state.lifecycle),
                    received: match target {
                        SessionTarget::Create => "new session".to_string(),
                        SessionTarget::Load { session_id } => session_id,
                    },
                });
            }

            next.lifecycle = LifecycleStatus::Idle;
            next.is_loading = false;
            let prefix = match &target {
                SessionTarget::Create => "Could not start the conversation",
                SessionTarget::Load { .. } => "Could not load the conversation",
            };
            next.error = Some(ErrorBanner::new(
                format!("{prefix}: {error}"),
                error.kind.is_retryable(),
            ));
            if let SessionTarget::Load { session_id } = target {
                if error.kind == ApiErrorKind::NotFound {
                    effects.push(Effect::ForgetSessionId { session_id });
                }
            }
        }

        // ============================================================
        // Outgoing messages
        // ============================================================
        StoreEvent::LocalSend {
            local_id,
            content,
            sent_at,
        } => {
            let Some(session_id) = state.session_id.clone() else {
                return Err(TransitionError::NoSession);
            };
            let content = content.trim();
            if content.is_empty() {
                return Err(TransitionError::EmptyMessage);
            }

            next.messages.push(Message::optimistic(
                local_id.clone(),
                session_id.clone(),
                content,
                sent_at,
            ));

            // Path is chosen once, here, from the connection state sampled for this turn
            if context.connected {
                effects.push(Effect::EmitMessage {
                    session_id,
                    local_id,
                    content: content.to_string(),
                });
            } else {
                next.is_streaming = true;
                effects.push(Effect::Fallback(FallbackOp::SendMessage {
                    session_id,
                    local_id,
                    content: content.to_string(),
                }));
            }
        }

        StoreEvent::FallbackCompleted {
            local_id, snapshot, ..
        } => {
            let log = unique_by_id(snapshot.messages);
            // Visitor copies the log has not seen yet can still confirm a pending echo
            let mut unclaimed: Vec<bool> = log
                .iter()
                .map(|m| m.role == Role::Visitor && state.position(&m.id).is_none())
                .collect();
            if let Some(sent) = state.message(&local_id) {
                claim_server_copy(&log, &mut unclaimed, &sent.content);
            }

            // Echoes of other sends still in flight (or failed) stay visible
            let mut carried = Vec::new();
            for echo in &state.messages {
                if echo.delivery == Delivery::Confirmed
                    || echo.id == local_id
                    || log.iter().any(|m| m.id == echo.id)
                {
                    continue;
                }
                if echo.is_pending()
                    && echo.role == Role::Visitor
                    && claim_server_copy(&log, &mut unclaimed, &echo.content)
                {
                    continue;
                }
                carried.push(echo.clone());
            }

            next.messages = log;
            next.messages.extend(carried);
            next.phase = snapshot.session.phase.clone();
            next.session = Some(snapshot.session);
            next.is_streaming = false;
        }

        // The echo is never rolled back
        StoreEvent::SendFailed {
            local_id,
            message,
            retryable,
            ..
        } => {
            if let Some(echo) = next.messages.iter_mut().find(|m| m.id == local_id) {
                echo.delivery = Delivery::Failed;
            }
            next.is_streaming = false;
            next.error = Some(ErrorBanner::new(message, retryable));
        }

        // ============================================================
        // Realtime events
        // ============================================================
        StoreEvent::Server { session_id, event } => match event {
            ServerEvent::Connected => {}
            ServerEvent::Message(message) => {
                if message.role != Role::Visitor {
                    next.is_streaming = false;
                }
                apply_message(&mut next.messages, message);
            }
            ServerEvent::MessageStream(update) => {
                next.is_streaming = !update.is_complete;
                apply_stream(&mut next.messages, update, &session_id, context);
            }
            ServerEvent::TypingStart => next.is_streaming = true,
            ServerEvent::TypingStop => next.is_streaming = false,
            ServerEvent::PhaseChange { phase } => {
                if let Some(session) = &mut next.session {
                    session.phase = phase.clone();
                }
                next.phase = phase;
            }
            ServerEvent::Error { message } => {
                next.is_streaming = false;
                next.error = Some(ErrorBanner::new(message, true));
            }
            ServerEvent::PrdGenerated(document) => next.document = Some(document),
            ServerEvent::ExpertsMatched { experts } => next.matched_experts = experts,
            ServerEvent::Availability { expert_id, slots } => {
                apply_booking(
                    state,
                    context,
                    &mut next,
                    &mut effects,
                    BookingAction::AvailabilityLoaded { expert_id, slots },
                )?;
            }
            ServerEvent::BookingConfirmed(booking) => {
                apply_booking(
                    state,
                    context,
                    &mut next,
                    &mut effects,
                    BookingAction::BookingConfirmed(booking),
                )?;
            }
        },

        StoreEvent::ConnectionChanged(status) => {
            // A dropped connection never leaves the UI stuck "thinking"
            if state.connection.is_connected() && !status.is_connected() {
                next.is_streaming = false;
            }
            match &status {
                ConnectionStatus::Failed { message } => {
                    next.error = Some(ErrorBanner::new(
                        format!("Connection lost: {message}. Reload or resume the conversation to continue."),
                        false,
                    ));
                }
                ConnectionStatus::Closed { reason } => {
                    let reason = reason
                        .as_deref()
                        .map(|r| format!(" ({r})"))
                        .unwrap_or_default();
                    next.error = Some(ErrorBanner::new(
                        format!("The conversation was closed by the server{reason}. Reload or resume the conversation to continue."),
                        false,
                    ));
                }
                _ => {}
            }
            next.connection = status;
        }

        // ============================================================
        // Booking overlay
        // ============================================================
        StoreEvent::Booking(action) => {
            if !state.has_session() && action != BookingAction::Reset {
                return Err(TransitionError::NoSession);
            }
            apply_booking(state, context, &mut next, &mut effects, action)?;
        }

        StoreEvent::BookingResult { action, .. } => {
            apply_booking(state, context, &mut next, &mut effects, action)?;
        }

        StoreEvent::ClearError => {
            next.error = None;
        }
    }

    Ok(TransitionResult {
        new_state: next,
        effects,
    })
}

fn lifecycle_target(lifecycle: &LifecycleStatus) -> Option<String> {
    match lifecycle {
        LifecycleStatus::Loading { session_id } => Some(session_id.clone()),
        _ => None,
    }
}

/// Make a created or resumed session current. The returned history wins over
/// any local state.
fn adopt_snapshot(
    state: &SyncState,
    next: &mut SyncState,
    effects: &mut Vec<Effect>,
    snapshot: SessionSnapshot,
) {
    let session_id = snapshot.session.id.clone();

    if !state.is_current(&session_id) {
        if state.booking.holds_slot() {
            effects.push(Effect::StopRefreshTimer);
        }
        next.booking = BookingSession::default();
        next.document = None;
        next.matched_experts.clear();
    }

    next.messages = unique_by_id(snapshot.messages);
    next.phase = snapshot.session.phase.clone();
    next.session = Some(snapshot.session);
    next.session_id = Some(session_id.clone());
    next.lifecycle = LifecycleStatus::Idle;
    next.is_loading = false;
    next.is_streaming = false;
    next.error = None;

    effects.push(Effect::PersistSessionId {
        session_id: session_id.clone(),
    });
    effects.push(Effect::Connect { session_id });
}

/// Collapse repeated ids, keeping the first position and the last content
fn unique_by_id(messages: Vec<Message>) -> Vec<Message> {
    let mut log: Vec<Message> = Vec::with_capacity(messages.len());
    for message in messages {
        match log.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message,
            None => log.push(message),
        }
    }
    log
}

/// Mark the first unclaimed copy of `content` as taken
fn claim_server_copy(log: &[Message], unclaimed: &mut [bool], content: &str) -> bool {
    let found = log
        .iter()
        .zip(unclaimed.iter())
        .position(|(m, free)| *free && m.content == content);
    match found {
        Some(i) => {
            unclaimed[i] = false;
            true
        }
        None => false,
    }
}

fn apply_message(messages: &mut Vec<Message>, message: Message) {
    if let Some(existing) = messages.iter_mut().find(|m| m.id == message.id) {
        *existing = message;
        return;
    }

    if message.role == Role::Visitor {
        let echo = messages
            .iter_mut()
            .find(|m| m.is_pending() && m.role == Role::Visitor && m.content == message.content);
        if let Some(echo) = echo {
            *echo = message;
            return;
        }
    }

    messages.push(message);
}

fn apply_stream(
    messages: &mut Vec<Message>,
    update: StreamingUpdate,
    session_id: &str,
    context: &StoreContext,
) {
    if let Some(existing) = messages.iter_mut().find(|m| m.id == update.message_id) {
        existing.content = update.content;
        if let Some(metadata) = update.metadata {
            existing.metadata = metadata;
        }
        return;
    }

    messages.push(Message {
        id: update.message_id,
        session_id: session_id.to_string(),
        role: Role::Consultant,
        content: update.content,
        metadata: update.metadata.unwrap_or_default(),
        created_at: context.now,
        delivery: Delivery::Confirmed,
    });
}

/// Run the booking machine and translate its effects for this session
fn apply_booking(
    state: &SyncState,
    context: &StoreContext,
    next: &mut SyncState,
    effects: &mut Vec<Effect>,
    action: BookingAction,
) -> Result<(), TransitionError> {
    let result = booking::transition(&state.booking, action)?;
    next.booking = result.new_state;

    for effect in result.effects {
        match effect {
            BookingEffect::FetchAvailability { expert_id } => {
                let session_id = current_session(state)?;
                let timezone = context.timezone.clone();
                effects.push(if context.connected {
                    Effect::Emit(ClientEvent::RequestAvailability {
                        session_id,
                        expert_id,
                        timezone,
                    })
                } else {
                    Effect::Fallback(FallbackOp::FetchAvailability {
                        session_id,
                        expert_id,
                        timezone,
                    })
                });
            }
            BookingEffect::CreateBooking {
                expert_id,
                slot,
                contact,
            } => {
                effects.push(Effect::CreateBooking(CreateBookingRequest {
                    session_id: current_session(state)?,
                    expert_id,
                    start_time: slot.start_time,
                    end_time: slot.end_time,
                    timezone: context.timezone.clone(),
                    client_name: contact.name().to_string(),
                    client_email: contact.email().to_string(),
                }));
            }
            BookingEffect::CancelBooking { booking_id } => {
                effects.push(Effect::CancelBooking {
                    session_id: current_session(state)?,
                    booking_id,
                });
            }
            BookingEffect::StartRefreshTimer => effects.push(Effect::StartRefreshTimer),
            BookingEffect::StopRefreshTimer => effects.push(Effect::StopRefreshTimer),
            BookingEffect::SurfaceError { message, retryable } => {
                next.error = Some(ErrorBanner::new(message, retryable));
            }
        }
    }
    Ok(())
}

fn current_session(state: &SyncState) -> Result<String, TransitionError> {
    state.session_id.clone().ok_or(TransitionError::NoSession)
}
