//! Transport abstraction for the backend's event channel

use super::event::ClientEvent;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use thiserror::Error;

/// Transport failure with classification
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Network, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Rejected, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Protocol, message)
    }

    pub fn not_connected() -> Self {
        Self::new(TransportErrorKind::NotConnected, "Realtime channel is not connected")
    }

    pub fn exhausted(attempts: u32) -> Self {
        Self::new(
            TransportErrorKind::Exhausted,
            format!("Connection lost after {attempts} reconnect attempts"),
        )
    }

    /// Network drops are retried; everything else is terminal for the connection
    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind, TransportErrorKind::Network)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Connection dropped or could not be established
    Network,
    /// The server refused the connection (unknown session, auth)
    Rejected,
    /// The server sent something that is not a valid frame
    Protocol,
    /// Emit attempted while no connection is live
    NotConnected,
    /// Reconnect budget spent
    Exhausted,
}

/// One frame read from the channel
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// A named event with its raw payload
    Event { name: String, data: Value },
    /// The server closed the channel on purpose
    Closed { reason: Option<String> },
    /// Liveness traffic with no event; never dispatched
    KeepAlive,
}

/// Outbound half of an open channel
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send(&self, event: &ClientEvent) -> Result<(), TransportError>;
}

/// An open connection: inbound frames plus a sink for client events.
///
/// The inbound stream ending without a `Closed` frame is a network drop.
pub struct ChannelHandle {
    pub inbound: BoxStream<'static, Result<InboundFrame, TransportError>>,
    pub outbound: Box<dyn FrameSink>,
}

/// Opens connections scoped to one session
#[async_trait]
pub trait RealtimeChannel: Send + Sync + 'static {
    async fn open(&self, session_id: &str) -> Result<ChannelHandle, TransportError>;
}

#[async_trait]
impl<T: RealtimeChannel + ?Sized> RealtimeChannel for std::sync::Arc<T> {
    async fn open(&self, session_id: &str) -> Result<ChannelHandle, TransportError> {
        (**self).open(session_id).await
    }
}
