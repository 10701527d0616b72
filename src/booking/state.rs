//! Booking session state

use crate::error::FieldError;
use crate::model::{Booking, Expert, TimeSlot};
use std::fmt;

/// Position in the booking pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BookingState {
    #[default]
    Idle,
    SelectingExpert,
    SelectingTime,
    Confirming,
    Completed,
    Cancelled,
}

impl BookingState {
    pub fn as_str(self) -> &'static str {
        match self {
            BookingState::Idle => "idle",
            BookingState::SelectingExpert => "selecting_expert",
            BookingState::SelectingTime => "selecting_time",
            BookingState::Confirming => "confirming",
            BookingState::Completed => "completed",
            BookingState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for BookingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contact details as typed by the visitor, possibly invalid
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContactForm {
    pub name: String,
    pub email: String,
}

/// Transient booking-flow state owned by the store
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BookingSession {
    pub state: BookingState,
    pub selected_expert: Option<Expert>,
    /// Current availability; replaced wholesale on every fetch
    pub slots: Vec<TimeSlot>,
    pub availability_loading: bool,
    /// Slot tentatively held while in `SelectingTime`, then the one being confirmed
    pub selected_slot: Option<TimeSlot>,
    pub contact: ContactForm,
    /// Field-local validation errors for the contact form
    pub field_errors: Vec<FieldError>,
    pub submitting: bool,
    pub cancelling: bool,
    pub created_booking: Option<Booking>,
}

impl BookingSession {
    /// The availability refresh timer runs exactly while this holds
    pub fn holds_slot(&self) -> bool {
        self.state == BookingState::SelectingTime && self.selected_slot.is_some()
    }

    pub fn field_error(&self, field: &str) -> Option<&str> {
        self.field_errors
            .iter()
            .find(|e| e.field == field)
            .map(|e| e.message.as_str())
    }

    pub fn expert_id(&self) -> Option<&str> {
        self.selected_expert.as_ref().map(|e| e.id.as_str())
    }

    /// Whether `slot` is among the currently offered slots
    pub fn offers(&self, slot: &TimeSlot) -> bool {
        self.slots.iter().any(|s| s.same_window(slot))
    }
}
