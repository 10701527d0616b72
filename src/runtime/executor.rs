//! Widget runtime executor

use super::fallback::FallbackDispatcher;
use super::lifecycle::SessionLifecycle;
use super::refresh::RefreshTimer;
use super::{BookingCommand, Command, RuntimeConfig, WidgetHandle};
use crate::api::{ConsultApi, CreateBookingRequest};
use crate::booking::{validate_contact, BookingAction, BookingState};
use crate::error::{SyncError, ValidationError};
use crate::identity::IdentityStore;
use crate::realtime::{
    ClientEvent, ConnectionStatus, DeliveryFailure, EventRegistry, RealtimeChannel,
    SubscriptionId, TransportAdapter,
};
use crate::store::{transition, Effect, StoreContext, StoreEvent, SyncState, TransitionError};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

/// The actor that owns one widget's state.
///
/// Generic over the backend, realtime channel and identity store so tests
/// can run the real executor against mocks.
pub struct WidgetRuntime<A, C, I>
where
    A: ConsultApi,
    C: RealtimeChannel,
    I: IdentityStore + 'static,
{
    state: SyncState,
    config: RuntimeConfig,
    api: Arc<A>,
    lifecycle: SessionLifecycle<A, I>,
    fallback: FallbackDispatcher<A>,
    adapter: TransportAdapter<C>,
    refresh: RefreshTimer,
    commands: mpsc::Receiver<Command>,
    events_tx: mpsc::UnboundedSender<StoreEvent>,
    events_rx: mpsc::UnboundedReceiver<StoreEvent>,
    failures_rx: mpsc::UnboundedReceiver<DeliveryFailure>,
    status_rx: watch::Receiver<ConnectionStatus>,
    state_tx: watch::Sender<SyncState>,
    /// Registry listener feeding server events into the store
    subscriptions: Vec<SubscriptionId>,
}

impl<A, C, I> WidgetRuntime<A, C, I>
where
    A: ConsultApi,
    C: RealtimeChannel,
    I: IdentityStore + 'static,
{
    /// Start a runtime task and return a handle to it
    pub fn spawn(api: A, channel: C, identity: I, config: RuntimeConfig) -> WidgetHandle {
        let api = Arc::new(api);
        let registry = Arc::new(EventRegistry::new());
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        let adapter = TransportAdapter::new(channel, config.transport.clone(), Arc::clone(&registry))
            .with_delivery_failures(failures_tx);
        let status_rx = adapter.subscribe_status();

        let (commands_tx, commands) = mpsc::channel(32);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SyncState::default());

        let forward = events_tx.clone();
        let subscriptions = registry.subscribe_all(move |session_id, event| {
            let _ = forward.send(StoreEvent::Server {
                session_id: session_id.to_string(),
                event: event.clone(),
            });
        });

        let runtime = Self {
            state: SyncState::default(),
            lifecycle: SessionLifecycle::new(Arc::clone(&api), identity, &config),
            fallback: FallbackDispatcher::new(Arc::clone(&api)),
            refresh: RefreshTimer::new(config.refresh_interval),
            config,
            api,
            adapter,
            commands,
            events_tx,
            events_rx,
            failures_rx,
            status_rx,
            state_tx,
            subscriptions,
        };
        tokio::spawn(runtime.run());

        WidgetHandle {
            commands: commands_tx,
            state: state_rx,
            registry,
        }
    }

    pub async fn run(mut self) {
        tracing::info!("Starting widget runtime");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(event) = self.events_rx.recv() => self.dispatch(event),
                Some(failure) = self.failures_rx.recv() => self.dispatch(StoreEvent::SendFailed {
                    session_id: failure.session_id,
                    local_id: failure.local_id,
                    message: format!("Message not delivered: {}", failure.error),
                    retryable: failure.error.is_recoverable(),
                }),
                Ok(()) = self.status_rx.changed() => {
                    let status = self.status_rx.borrow_and_update().clone();
                    self.dispatch(StoreEvent::ConnectionChanged(status));
                }
            }
        }

        self.refresh.stop();
        self.adapter.disconnect();
        for id in self.subscriptions.drain(..) {
            self.adapter.registry().unsubscribe(id);
        }
        tracing::info!(session_id = ?self.state.session_id, "Widget runtime stopped");
    }

    fn handle_command(&mut self, command: Command) {
        let (reply, result) = match command {
            Command::Initialize { reply } => (reply, self.initialize()),
            Command::CreateSession { reply } => (reply, self.create_session()),
            Command::LoadSession { session_id, reply } => (reply, self.load_session(session_id)),
            Command::SendMessage { content, reply } => (reply, self.send_message(content)),
            Command::Booking { command, reply } => (reply, self.booking(command)),
            Command::ClearError { reply } => (reply, self.submit(StoreEvent::ClearError)),
            Command::Shutdown => return,
        };
        let _ = reply.send(result);
    }

    fn initialize(&mut self) -> Result<(), SyncError> {
        match self.lifecycle.stored_session()? {
            Some(session_id) => {
                tracing::info!(session_id = %session_id, "Restoring stored session");
                self.submit(StoreEvent::LoadRequested { session_id })
            }
            None => Ok(()),
        }
    }

    fn create_session(&mut self) -> Result<(), SyncError> {
        if let Some(session_id) = self.lifecycle.stored_session()? {
            tracing::debug!(session_id = %session_id, "Session already stored, ignoring create");
            return Ok(());
        }
        let visitor_id = self.lifecycle.visitor_id()?;
        self.submit(StoreEvent::CreateRequested { visitor_id })
    }

    fn load_session(&mut self, session_id: String) -> Result<(), SyncError> {
        let session_id = session_id.trim().to_string();
        if session_id.is_empty() {
            return Err(ValidationError::field("session_id", "Session id is required").into());
        }
        self.submit(StoreEvent::LoadRequested { session_id })
    }

    /// Refused outright once the connection is terminal
    fn send_message(&mut self, content: String) -> Result<(), SyncError> {
        if self.state.has_session() {
            if let Some(error) = self.adapter.status().terminal_error() {
                tracing::debug!(error = %error, "Send refused on a terminal connection");
                return Err(SyncError::Transport(error));
            }
        }
        self.submit(StoreEvent::LocalSend {
            local_id: format!("local-{}", Uuid::new_v4()),
            content,
            sent_at: Utc::now(),
        })
    }

    fn booking(&mut self, command: BookingCommand) -> Result<(), SyncError> {
        let action = match command {
            BookingCommand::Begin => BookingAction::Begin,
            BookingCommand::SelectExpert(expert) => BookingAction::SelectExpert(expert),
            BookingCommand::SelectSlot(slot) => BookingAction::SelectSlot(slot),
            BookingCommand::ReleaseSlot => BookingAction::ReleaseSlot,
            BookingCommand::ConfirmSlot => BookingAction::ConfirmSlot,
            BookingCommand::UpdateContact(form) => BookingAction::UpdateContact(form),
            BookingCommand::Submit => return self.submit_booking(),
            BookingCommand::Cancel => BookingAction::Cancel,
            BookingCommand::Reset => BookingAction::Reset,
        };
        self.submit(StoreEvent::Booking(action))
    }

    /// Contact details are validated here, before any network call
    fn submit_booking(&mut self) -> Result<(), SyncError> {
        if !self.state.has_session() {
            return Err(SyncError::NoSession);
        }
        let booking = &self.state.booking;
        if booking.state != BookingState::Confirming {
            return Err(SyncError::InvalidAction(format!(
                "Cannot submit a booking while booking is {}",
                booking.state
            )));
        }

        match validate_contact(&booking.contact) {
            Ok(contact) => self.submit(StoreEvent::Booking(BookingAction::Submit(contact))),
            Err(e) => {
                tracing::debug!(error = %e, "Contact details rejected");
                self.dispatch(StoreEvent::Booking(BookingAction::ContactRejected(
                    e.fields.clone(),
                )));
                Err(e.into())
            }
        }
    }

    /// Apply a visitor-initiated event, mapping refusals to the public taxonomy
    fn submit(&mut self, event: StoreEvent) -> Result<(), SyncError> {
        match self.apply(event) {
            Ok(()) => Ok(()),
            Err(TransitionError::SessionExists | TransitionError::LifecycleBusy) => {
                tracing::debug!("Session request already satisfied or in flight, ignoring");
                Ok(())
            }
            Err(TransitionError::NoSession) => Err(SyncError::NoSession),
            Err(TransitionError::EmptyMessage) => {
                Err(ValidationError::field("content", "Message cannot be empty").into())
            }
            Err(TransitionError::Stale { expected, received }) => {
                Err(SyncError::StaleResponse { expected, received })
            }
            Err(TransitionError::Booking(e)) => Err(SyncError::InvalidAction(e.to_string())),
        }
    }

    /// Apply an event from a background task or the transport
    fn dispatch(&mut self, event: StoreEvent) {
        if let Err(e) = self.apply(event) {
            if e.is_stale() {
                tracing::debug!(error = %e, "Dropping stale result");
            } else {
                tracing::warn!(error = %e, "Event rejected");
            }
        }
    }

    fn apply(&mut self, event: StoreEvent) -> Result<(), TransitionError> {
        // Path choice for sends happens here, in the same turn as the dispatch
        let context = StoreContext::new(self.adapter.is_connected(), self.config.timezone.clone());
        let result = transition(&self.state, &context, event)?;
        self.state = result.new_state;

        for effect in result.effects {
            self.execute_effect(effect);
        }

        self.state_tx.send_replace(self.state.clone());
        Ok(())
    }

    fn execute_effect(&mut self, effect: Effect) {
        match effect {
            Effect::CreateSession { visitor_id } => {
                self.lifecycle.create(visitor_id, &self.events_tx);
            }
            Effect::ResumeSession { session_id } => {
                self.lifecycle.resume(session_id, &self.events_tx);
            }
            Effect::PersistSessionId { session_id } => {
                if let Err(e) = self.lifecycle.persist(&session_id) {
                    tracing::warn!(session_id = %session_id, error = %e, "Failed to persist session id");
                }
            }
            Effect::ForgetSessionId { session_id } => {
                if let Err(e) = self.lifecycle.forget(&session_id) {
                    tracing::warn!(session_id = %session_id, error = %e, "Failed to forget session id");
                }
            }
            Effect::Connect { session_id } => self.adapter.connect(&session_id),
            Effect::EmitMessage {
                session_id,
                local_id,
                content,
            } => {
                let event = ClientEvent::SendMessage {
                    session_id: session_id.clone(),
                    content,
                };
                if let Err(e) = self.adapter.emit_tracked(event, local_id.clone()) {
                    tracing::warn!(session_id = %session_id, error = %e, "Realtime send failed");
                    let _ = self.events_tx.send(StoreEvent::SendFailed {
                        session_id,
                        local_id,
                        message: format!("Message not delivered: {e}"),
                        retryable: true,
                    });
                }
            }
            Effect::Emit(event) => {
                if let Err(e) = self.adapter.emit(event.clone()) {
                    tracing::warn!(event = event.name(), error = %e, "Realtime emit failed");
                    if let ClientEvent::RequestAvailability {
                        session_id,
                        expert_id,
                        ..
                    } = event
                    {
                        let _ = self.events_tx.send(StoreEvent::BookingResult {
                            session_id,
                            action: BookingAction::AvailabilityFailed {
                                expert_id,
                                message: format!("Could not load availability: {e}"),
                                retryable: true,
                            },
                        });
                    }
                }
            }
            Effect::Fallback(op) => self.fallback.dispatch(op, &self.events_tx),
            Effect::CreateBooking(request) => self.spawn_create_booking(request),
            Effect::CancelBooking {
                session_id,
                booking_id,
            } => self.spawn_cancel_booking(session_id, booking_id),
            Effect::StartRefreshTimer => {
                let events = self.events_tx.clone();
                self.refresh.start(move || {
                    let _ = events.send(StoreEvent::Booking(BookingAction::RefreshTick));
                });
            }
            Effect::StopRefreshTimer => {
                self.refresh.stop();
            }
        }
    }

    fn spawn_create_booking(&self, request: CreateBookingRequest) {
        let api = Arc::clone(&self.api);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let action = match api.create_booking(&request).await {
                Ok(booking) => {
                    tracing::info!(
                        session_id = %request.session_id,
                        booking_id = %booking.id,
                        expert_id = %booking.expert_id,
                        "Booking created"
                    );
                    BookingAction::BookingCreated(booking)
                }
                Err(e) => {
                    tracing::warn!(session_id = %request.session_id, error = %e, "Booking failed");
                    BookingAction::BookingFailed {
                        message: format!("Booking failed: {e}"),
                        retryable: e.kind.is_retryable(),
                    }
                }
            };
            let _ = events.send(StoreEvent::BookingResult {
                session_id: request.session_id,
                action,
            });
        });
    }

    fn spawn_cancel_booking(&self, session_id: String, booking_id: String) {
        let api = Arc::clone(&self.api);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let action = match api.cancel_booking(&booking_id).await {
                Ok(booking) => {
                    tracing::info!(session_id = %session_id, booking_id = %booking_id, "Booking cancelled");
                    BookingAction::BookingCancelled(booking)
                }
                Err(e) => {
                    tracing::warn!(booking_id = %booking_id, error = %e, "Booking cancel failed");
                    BookingAction::CancelFailed {
                        message: format!("Could not cancel the booking: {e}"),
                        retryable: e.kind.is_retryable(),
                    }
                }
            };
            let _ = events.send(StoreEvent::BookingResult { session_id, action });
        });
    }
}
