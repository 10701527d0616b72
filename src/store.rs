//! Message synchronization store
//!
//! The single source of truth for the conversation: an ordered, duplicate-free
//! message log plus the session, phase, derived UI flags, and the booking
//! overlay. Optimistic sends, realtime events, and fallback responses all
//! arrive as [`StoreEvent`]s and go through one pure [`transition`] function.

mod effect;
mod event;
mod state;
mod transition;


pub use effect::{Effect, FallbackOp};
pub use event::{SessionTarget, StoreEvent};
pub use state::{ErrorBanner, LifecycleStatus, StoreContext, SyncState};
pub use transition::{transition, TransitionError, TransitionResult};
