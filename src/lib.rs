//! Consultation widget synchronization engine
//!
//! Keeps a visitor's conversation with a remote consultant consistent across
//! optimistic local sends, a realtime event channel, and a request/response
//! fallback, and drives an expert-booking flow on top of it.

#![allow(
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

pub mod api;
pub mod booking;
pub mod config;
pub mod error;
pub mod identity;
pub mod model;
pub mod realtime;
pub mod runtime;
pub mod store;

pub use config::WidgetConfig;
pub use error::SyncError;
pub use runtime::{BookingCommand, RuntimeConfig, WidgetHandle, WidgetRuntime};
pub use store::SyncState;
