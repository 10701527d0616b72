//! Booking flow state machine
//!
//! A finite-state overlay on the conversation: expert selection, slot
//! availability, contact confirmation, and cancellation. Like the store, it is
//! a pure transition function; network calls and the availability refresh
//! timer are requested through [`BookingEffect`]s.

mod state;
mod transition;
mod validation;


pub use state::{BookingSession, BookingState, ContactForm};
pub use transition::{transition, BookingAction, BookingEffect, BookingError, BookingTransition};
pub use validation::{validate_contact, ValidContact};
