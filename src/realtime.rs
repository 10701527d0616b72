//! Realtime transport
//!
//! Typed events, the listener registry, the channel abstraction with its
//! server-sent-events binding, and the reconnecting adapter that owns the
//! single live connection.

mod adapter;
mod channel;
pub mod event;
mod registry;
mod sse;
mod status;

pub use adapter::{DeliveryFailure, TransportAdapter, TransportConfig};
pub use channel::{
    ChannelHandle, FrameSink, InboundFrame, RealtimeChannel, TransportError, TransportErrorKind,
};
pub use event::{ClientEvent, EventKey, ServerEvent};
pub use registry::{EventRegistry, Listener, SubscriptionId};
pub use sse::{decode_frames, SseChannel, SseDecoder};
pub use status::ConnectionStatus;
