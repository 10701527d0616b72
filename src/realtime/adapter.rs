//! Realtime transport adapter
//!
//! Owns at most one live connection. Each connection runs as its own task
//! that performs the room-join handshake, fans inbound events out through the
//! registry, forwards emits, and reconnects with bounded backoff after
//! network drops. Status changes are published on a watch channel; tracked
//! emits the connection could not write are reported as [`DeliveryFailure`]s.

use super::channel::{ChannelHandle, InboundFrame, RealtimeChannel, TransportError};
use super::event::{ClientEvent, ServerEvent};
use super::registry::EventRegistry;
use super::status::ConnectionStatus;
use futures::StreamExt;
use rand::Rng;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Reconnect and liveness settings
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Consecutive failed attempts before giving up
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// A connection with no inbound traffic for this long is considered dropped
    pub idle_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(45),
        }
    }
}

impl TransportConfig {
    /// Exponential backoff with a little jitter: base, 2*base, 4*base... never past `max_delay`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1 << exponent);
        let jitter_ms = u64::try_from(self.base_delay.as_millis() / 10).unwrap_or(0);
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        delay.saturating_add(jitter).min(self.max_delay)
    }
}

/// A tracked emit that never reached the server
#[derive(Debug, Clone)]
pub struct DeliveryFailure {
    pub session_id: String,
    /// Tag given to [`TransportAdapter::emit_tracked`]
    pub local_id: String,
    pub error: TransportError,
}

/// Client event waiting for the connection task
struct Outbound {
    event: ClientEvent,
    local_id: Option<String>,
}

/// Status shared between the adapter and its connection task.
///
/// Every connect/disconnect bumps the generation; a task may only publish
/// while its generation is current, so a torn-down connection can never
/// overwrite the status of its successor.
struct SharedStatus {
    tx: watch::Sender<ConnectionStatus>,
    generation: Mutex<u64>,
}

impl SharedStatus {
    fn advance(&self, status: ConnectionStatus) -> u64 {
        let mut generation = self
            .generation
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *generation += 1;
        self.tx.send_replace(status);
        *generation
    }

    fn report(&self, generation: u64, status: ConnectionStatus) -> bool {
        let current = self
            .generation
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if *current != generation {
            return false;
        }
        self.tx.send_replace(status);
        true
    }
}

struct ActiveConnection {
    session_id: String,
    outbound: mpsc::UnboundedSender<Outbound>,
    cancel: CancellationToken,
}

/// Single-connection manager for the backend's event channel
pub struct TransportAdapter<C: RealtimeChannel> {
    channel: Arc<C>,
    config: TransportConfig,
    registry: Arc<EventRegistry>,
    status: Arc<SharedStatus>,
    failures: Option<mpsc::UnboundedSender<DeliveryFailure>>,
    active: Option<ActiveConnection>,
}

impl<C: RealtimeChannel> TransportAdapter<C> {
    pub fn new(channel: C, config: TransportConfig, registry: Arc<EventRegistry>) -> Self {
        let (tx, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            channel: Arc::new(channel),
            config,
            registry,
            status: Arc::new(SharedStatus {
                tx,
                generation: Mutex::new(0),
            }),
            failures: None,
            active: None,
        }
    }

    /// Report tracked emits that could not be written to `failures`
    #[must_use]
    pub fn with_delivery_failures(mut self, failures: mpsc::UnboundedSender<DeliveryFailure>) -> Self {
        self.failures = Some(failures);
        self
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.tx.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.active.is_some() && self.status.tx.borrow().is_connected()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.session_id.as_str())
    }

    pub fn registry(&self) -> &Arc<EventRegistry> {
        &self.registry
    }

    /// Open a connection scoped to `session_id`.
    ///
    /// No-op while a connection for the same session is live; otherwise any
    /// prior connection is torn down first.
    pub fn connect(&mut self, session_id: &str) {
        if let Some(active) = &self.active {
            if active.session_id == session_id && self.status().is_live() {
                tracing::debug!(session_id = %session_id, "Already connected, ignoring connect");
                return;
            }
        }
        self.disconnect();

        let generation = self.status.advance(ConnectionStatus::Connecting);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let task = ConnectionTask {
            channel: Arc::clone(&self.channel),
            session_id: session_id.to_string(),
            config: self.config.clone(),
            registry: Arc::clone(&self.registry),
            status: Arc::clone(&self.status),
            generation,
            outbound_rx,
            failures: self.failures.clone(),
            cancel: cancel.clone(),
        };
        tokio::spawn(task.run());

        tracing::info!(session_id = %session_id, "Opening realtime connection");
        self.active = Some(ActiveConnection {
            session_id: session_id.to_string(),
            outbound,
            cancel,
        });
    }

    /// Tear down the connection. Registry listeners are kept.
    pub fn disconnect(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
            self.status.advance(ConnectionStatus::Disconnected);
            tracing::info!(session_id = %active.session_id, "Realtime connection closed");
        }
    }

    /// Queue an event for the live connection
    pub fn emit(&self, event: ClientEvent) -> Result<(), TransportError> {
        self.queue(Outbound {
            event,
            local_id: None,
        })
    }

    /// Queue an event whose later write failure is reported under `local_id`
    pub fn emit_tracked(&self, event: ClientEvent, local_id: impl Into<String>) -> Result<(), TransportError> {
        self.queue(Outbound {
            event,
            local_id: Some(local_id.into()),
        })
    }

    fn queue(&self, outbound: Outbound) -> Result<(), TransportError> {
        let active = self.active.as_ref().ok_or_else(TransportError::not_connected)?;
        if !self.status().is_connected() {
            return Err(TransportError::not_connected());
        }
        active
            .outbound
            .send(outbound)
            .map_err(|_| TransportError::not_connected())
    }
}

impl<C: RealtimeChannel> Drop for TransportAdapter<C> {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
        }
    }
}

enum DriveOutcome {
    Cancelled,
    ServerClosed(Option<String>),
    Dropped { joined: bool, error: TransportError },
}

struct ConnectionTask<C: RealtimeChannel> {
    channel: Arc<C>,
    session_id: String,
    config: TransportConfig,
    registry: Arc<EventRegistry>,
    status: Arc<SharedStatus>,
    generation: u64,
    outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    failures: Option<mpsc::UnboundedSender<DeliveryFailure>>,
    cancel: CancellationToken,
}

impl<C: RealtimeChannel> ConnectionTask<C> {
    fn report(&self, status: ConnectionStatus) {
        self.status.report(self.generation, status);
    }

    fn undelivered(&self, outbound: Outbound, error: &TransportError) {
        let Some(local_id) = outbound.local_id else {
            return;
        };
        tracing::warn!(
            session_id = %self.session_id,
            event = outbound.event.name(),
            local_id = %local_id,
            error = %error,
            "Client event not delivered"
        );
        if let Some(failures) = &self.failures {
            let _ = failures.send(DeliveryFailure {
                session_id: self.session_id.clone(),
                local_id,
                error: error.clone(),
            });
        }
    }

    /// The connection is gone for good; nothing still queued will be written
    fn abandon_queue(&mut self, error: &TransportError) {
        self.outbound_rx.close();
        while let Ok(outbound) = self.outbound_rx.try_recv() {
            self.undelivered(outbound, error);
        }
    }

    fn fail(&mut self, error: TransportError) {
        self.abandon_queue(&error);
        self.report(ConnectionStatus::Failed {
            message: error.message,
        });
    }

    async fn run(mut self) {
        let mut failures: u32 = 0;

        loop {
            let opened = tokio::select! {
                () = self.cancel.cancelled() => return,
                opened = self.channel.open(&self.session_id) => opened,
            };

            let outcome = match opened {
                Ok(handle) => self.drive(handle).await,
                Err(error) => DriveOutcome::Dropped {
                    joined: false,
                    error,
                },
            };

            match outcome {
                DriveOutcome::Cancelled => return,
                DriveOutcome::ServerClosed(reason) => {
                    tracing::info!(
                        session_id = %self.session_id,
                        reason = ?reason,
                        "Server closed the realtime channel"
                    );
                    self.abandon_queue(&TransportError::rejected("The server closed the conversation"));
                    self.report(ConnectionStatus::Closed { reason });
                    return;
                }
                DriveOutcome::Dropped { joined, error } => {
                    if !error.is_recoverable() {
                        tracing::error!(session_id = %self.session_id, error = %error, "Realtime connection refused");
                        self.fail(error);
                        return;
                    }
                    if joined {
                        failures = 0;
                    }
                    tracing::warn!(session_id = %self.session_id, error = %error, "Realtime connection dropped");
                }
            }

            failures += 1;
            if failures > self.config.max_attempts {
                let error = TransportError::exhausted(self.config.max_attempts);
                tracing::error!(session_id = %self.session_id, error = %error, "Giving up on realtime connection");
                self.fail(error);
                return;
            }

            self.report(ConnectionStatus::Reconnecting { attempt: failures });
            let delay = self.config.backoff_delay(failures);
            tracing::info!(
                session_id = %self.session_id,
                attempt = failures,
                delay_ms = %delay.as_millis(),
                "Reconnecting"
            );
            tokio::select! {
                () = self.cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn drive(&mut self, handle: ChannelHandle) -> DriveOutcome {
        let ChannelHandle {
            mut inbound,
            outbound,
        } = handle;
        let mut joined = false;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return DriveOutcome::Cancelled,
                frame = tokio::time::timeout(self.config.idle_timeout, inbound.next()) => {
                    let frame = match frame {
                        Err(_) => {
                            return DriveOutcome::Dropped {
                                joined,
                                error: TransportError::network("No traffic within idle timeout"),
                            };
                        }
                        Ok(None) => {
                            return DriveOutcome::Dropped {
                                joined,
                                error: TransportError::network("Event stream ended"),
                            };
                        }
                        Ok(Some(Err(error))) => return DriveOutcome::Dropped { joined, error },
                        Ok(Some(Ok(frame))) => frame,
                    };

                    // Any frame, keep-alives included, restarts the idle timer
                    let (name, data) = match frame {
                        InboundFrame::Closed { reason } => return DriveOutcome::ServerClosed(reason),
                        InboundFrame::KeepAlive => continue,
                        InboundFrame::Event { name, data } => (name, data),
                    };

                    let event = match ServerEvent::parse(&name, data) {
                        Ok(event) => event,
                        Err(e) => {
                            tracing::warn!(session_id = %self.session_id, error = %e, "Dropping malformed event");
                            continue;
                        }
                    };

                    if event == ServerEvent::Connected && !joined {
                        let join = ClientEvent::Join {
                            session_id: self.session_id.clone(),
                        };
                        if let Err(error) = outbound.send(&join).await {
                            return DriveOutcome::Dropped { joined, error };
                        }
                        joined = true;
                        self.report(ConnectionStatus::Connected);
                        tracing::info!(session_id = %self.session_id, "Joined session room");
                    }

                    self.registry.dispatch(&self.session_id, &event);
                }
                Some(queued) = self.outbound_rx.recv() => {
                    if let Err(error) = outbound.send(&queued.event).await {
                        self.undelivered(queued, &error);
                        return DriveOutcome::Dropped { joined, error };
                    }
                }
            }
        }
    }
}
