//! Pure booking transitions
//!
//! Timer effects are derived, not chosen per arm: every transition compares
//! [`BookingSession::holds_slot`] before and after and emits
//! `StartRefreshTimer` / `StopRefreshTimer` on the edges.

use super::state::{BookingSession, BookingState, ContactForm};
use super::validation::ValidContact;
use crate::error::FieldError;
use crate::model::{Booking, Expert, TimeSlot};
use thiserror::Error;

/// Inputs to the booking machine: visitor actions and request completions
#[derive(Debug, Clone, PartialEq)]
pub enum BookingAction {
    /// Open the expert picker
    Begin,
    SelectExpert(Expert),
    AvailabilityLoaded {
        expert_id: String,
        slots: Vec<TimeSlot>,
    },
    AvailabilityFailed {
        expert_id: String,
        message: String,
        retryable: bool,
    },
    /// Tentatively hold a slot
    SelectSlot(TimeSlot),
    ReleaseSlot,
    /// Move the held slot to the contact form
    ConfirmSlot,
    UpdateContact(ContactForm),
    ContactRejected(Vec<FieldError>),
    Submit(ValidContact),
    BookingCreated(Booking),
    BookingFailed {
        message: String,
        retryable: bool,
    },
    /// Server-side confirmation, possibly repeated
    BookingConfirmed(Booking),
    Cancel,
    BookingCancelled(Booking),
    CancelFailed {
        message: String,
        retryable: bool,
    },
    RefreshTick,
    Reset,
}

impl BookingAction {
    pub fn name(&self) -> &'static str {
        match self {
            BookingAction::Begin => "begin",
            BookingAction::SelectExpert(_) => "select an expert",
            BookingAction::AvailabilityLoaded { .. } => "load availability",
            BookingAction::AvailabilityFailed { .. } => "fail availability",
            BookingAction::SelectSlot(_) => "select a slot",
            BookingAction::ReleaseSlot => "release the slot",
            BookingAction::ConfirmSlot => "confirm the slot",
            BookingAction::UpdateContact(_) => "edit contact details",
            BookingAction::ContactRejected(_) => "reject contact details",
            BookingAction::Submit(_) => "submit the booking",
            BookingAction::BookingCreated(_) => "complete the booking",
            BookingAction::BookingFailed { .. } => "fail the booking",
            BookingAction::BookingConfirmed(_) => "confirm the booking",
            BookingAction::Cancel => "cancel the booking",
            BookingAction::BookingCancelled(_) => "finish cancelling",
            BookingAction::CancelFailed { .. } => "fail cancelling",
            BookingAction::RefreshTick => "refresh availability",
            BookingAction::Reset => "reset",
        }
    }
}

/// Work requested by a booking transition
#[derive(Debug, Clone, PartialEq)]
pub enum BookingEffect {
    FetchAvailability {
        expert_id: String,
    },
    CreateBooking {
        expert_id: String,
        slot: TimeSlot,
        contact: ValidContact,
    },
    CancelBooking {
        booking_id: String,
    },
    StartRefreshTimer,
    StopRefreshTimer,
    /// Show a message in the error banner
    SurfaceError {
        message: String,
        retryable: bool,
    },
}

#[derive(Debug)]
pub struct BookingTransition {
    pub new_state: BookingSession,
    pub effects: Vec<BookingEffect>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BookingError {
    #[error("Cannot {action} while booking is {state}")]
    InvalidAction {
        action: &'static str,
        state: BookingState,
    },
    #[error("That time slot is not currently offered")]
    UnknownSlot,
    #[error("A booking request is already in progress")]
    Busy,
    /// A completion that no longer matches the flow
    #[error("Ignoring late booking result: {0}")]
    Stale(&'static str),
}

const SLOT_TAKEN: &str = "That time is no longer available. Please pick another slot.";

pub fn transition(
    state: &BookingSession,
    action: BookingAction,
) -> Result<BookingTransition, BookingError> {
    let mut next = state.clone();
    let mut effects = Vec::new();

    match (state.state, action) {
        (BookingState::Idle, BookingAction::Begin) => {
            next.state = BookingState::SelectingExpert;
        }

        // Picking (or switching) an expert always fetches fresh availability
        (
            BookingState::Idle | BookingState::SelectingExpert | BookingState::SelectingTime,
            BookingAction::SelectExpert(expert),
        ) => {
            effects.push(BookingEffect::FetchAvailability {
                expert_id: expert.id.clone(),
            });
            next.state = BookingState::SelectingTime;
            next.selected_expert = Some(expert);
            next.slots.clear();
            next.selected_slot = None;
            next.availability_loading = true;
        }

        (BookingState::SelectingTime, BookingAction::AvailabilityLoaded { expert_id, slots }) => {
            if state.expert_id() != Some(expert_id.as_str()) {
                return Err(BookingError::Stale("availability for another expert"));
            }
            next.slots = slots;
            next.availability_loading = false;
            if let Some(held) = &state.selected_slot {
                if !next.offers(held) {
                    next.selected_slot = None;
                    effects.push(BookingEffect::SurfaceError {
                        message: SLOT_TAKEN.to_string(),
                        retryable: false,
                    });
                }
            }
        }

        (
            BookingState::SelectingTime,
            BookingAction::AvailabilityFailed {
                expert_id,
                message,
                retryable,
            },
        ) => {
            if state.expert_id() != Some(expert_id.as_str()) {
                return Err(BookingError::Stale("availability for another expert"));
            }
            next.availability_loading = false;
            effects.push(BookingEffect::SurfaceError { message, retryable });
        }

        (_, BookingAction::AvailabilityLoaded { .. } | BookingAction::AvailabilityFailed { .. }) => {
            return Err(BookingError::Stale("availability outside slot selection"));
        }

        (BookingState::SelectingTime, BookingAction::SelectSlot(slot)) => {
            if !state.offers(&slot) {
                return Err(BookingError::UnknownSlot);
            }
            next.selected_slot = Some(slot);
        }

        (BookingState::SelectingTime, BookingAction::ReleaseSlot) if state.selected_slot.is_some() => {
            next.selected_slot = None;
        }

        (BookingState::SelectingTime, BookingAction::ConfirmSlot) if state.selected_slot.is_some() => {
            next.state = BookingState::Confirming;
            next.field_errors.clear();
        }

        (BookingState::Confirming, BookingAction::UpdateContact(contact)) => {
            next.contact = contact;
            next.field_errors.clear();
        }

        (BookingState::Confirming, BookingAction::ContactRejected(errors)) => {
            next.field_errors = errors;
        }

        (BookingState::Confirming, BookingAction::Submit(contact)) => {
            if state.submitting {
                return Err(BookingError::Busy);
            }
            let (Some(expert_id), Some(slot)) = (state.expert_id(), state.selected_slot.clone())
            else {
                return Err(BookingError::InvalidAction {
                    action: "submit the booking",
                    state: state.state,
                });
            };
            effects.push(BookingEffect::CreateBooking {
                expert_id: expert_id.to_string(),
                slot,
                contact,
            });
            next.submitting = true;
            next.field_errors.clear();
        }

        (BookingState::Confirming, BookingAction::BookingCreated(booking)) => {
            if !state.submitting {
                return Err(BookingError::Stale("booking result without a submission"));
            }
            next.state = BookingState::Completed;
            next.submitting = false;
            next.created_booking = Some(booking);
        }

        // Contact form is kept so the visitor can retry
        (BookingState::Confirming, BookingAction::BookingFailed { message, retryable }) => {
            if !state.submitting {
                return Err(BookingError::Stale("booking failure without a submission"));
            }
            next.submitting = false;
            effects.push(BookingEffect::SurfaceError { message, retryable });
        }

        (BookingState::Confirming, BookingAction::BookingConfirmed(booking)) => {
            next.state = BookingState::Completed;
            next.submitting = false;
            next.created_booking = Some(booking);
        }

        (BookingState::Completed, BookingAction::BookingConfirmed(booking)) => {
            if state.created_booking.as_ref().map(|b| b.id.as_str()) != Some(booking.id.as_str()) {
                return Err(BookingError::Stale("confirmation for another booking"));
            }
        }

        (BookingState::Completed, BookingAction::BookingCreated(_)) => {
            return Err(BookingError::Stale("booking already completed"));
        }

        (BookingState::Completed, BookingAction::Cancel) => {
            if state.cancelling {
                return Err(BookingError::Busy);
            }
            let Some(booking) = &state.created_booking else {
                return Err(BookingError::InvalidAction {
                    action: "cancel the booking",
                    state: state.state,
                });
            };
            effects.push(BookingEffect::CancelBooking {
                booking_id: booking.id.clone(),
            });
            next.cancelling = true;
        }

        (BookingState::Completed, BookingAction::BookingCancelled(booking)) => {
            if !state.cancelling {
                return Err(BookingError::Stale("cancellation without a request"));
            }
            next.state = BookingState::Cancelled;
            next.cancelling = false;
            next.created_booking = Some(booking);
        }

        (BookingState::Completed, BookingAction::CancelFailed { message, retryable }) => {
            if !state.cancelling {
                return Err(BookingError::Stale("cancel failure without a request"));
            }
            next.cancelling = false;
            effects.push(BookingEffect::SurfaceError { message, retryable });
        }

        (_, BookingAction::RefreshTick) => {
            if !state.holds_slot() {
                return Err(BookingError::Stale("refresh without a held slot"));
            }
            if !state.availability_loading {
                if let Some(expert_id) = state.expert_id() {
                    effects.push(BookingEffect::FetchAvailability {
                        expert_id: expert_id.to_string(),
                    });
                    next.availability_loading = true;
                }
            }
        }

        // Reset never cancels a completed booking server-side
        (_, BookingAction::Reset) => {
            next = BookingSession::default();
        }

        (
            _,
            action @ (BookingAction::BookingCreated(_)
            | BookingAction::BookingFailed { .. }
            | BookingAction::BookingConfirmed(_)
            | BookingAction::BookingCancelled(_)
            | BookingAction::CancelFailed { .. }),
        ) => {
            return Err(BookingError::Stale(action.name()));
        }

        (current, action) => {
            return Err(BookingError::InvalidAction {
                action: action.name(),
                state: current,
            });
        }
    }

    match (state.holds_slot(), next.holds_slot()) {
        (false, true) => effects.push(BookingEffect::StartRefreshTimer),
        (true, false) => effects.push(BookingEffect::StopRefreshTimer),
        _ => {}
    }

    Ok(BookingTransition {
        new_state: next,
        effects,
    })
}
