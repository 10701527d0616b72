//! Widget runtime
//!
//! A single actor task owns the [`SyncState`] and applies every mutation
//! serially. Visitor actions arrive as commands over a [`WidgetHandle`];
//! network completions come back from spawned tasks as store events.

mod executor;
mod fallback;
mod lifecycle;
mod refresh;

#[cfg(test)]
pub mod testing;

pub use executor::WidgetRuntime;
pub use fallback::FallbackDispatcher;
pub use lifecycle::SessionLifecycle;
pub use refresh::RefreshTimer;

use crate::booking::ContactForm;
use crate::error::SyncError;
use crate::model::{Expert, TimeSlot};
use crate::realtime::{EventRegistry, TransportConfig};
use crate::store::SyncState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

/// Settings for one widget instance
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Sent with availability requests and bookings
    pub timezone: String,
    /// Referring URL sent on session create
    pub referrer: Option<String>,
    pub user_agent: Option<String>,
    /// Availability poll interval while a slot is held
    pub refresh_interval: Duration,
    pub transport: TransportConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
            referrer: None,
            user_agent: None,
            refresh_interval: Duration::from_secs(30),
            transport: TransportConfig::default(),
        }
    }
}

/// Booking actions available to the visitor
#[derive(Debug, Clone, PartialEq)]
pub enum BookingCommand {
    Begin,
    SelectExpert(Expert),
    SelectSlot(TimeSlot),
    ReleaseSlot,
    ConfirmSlot,
    UpdateContact(ContactForm),
    Submit,
    Cancel,
    Reset,
}

type Reply = oneshot::Sender<Result<(), SyncError>>;

pub(crate) enum Command {
    Initialize { reply: Reply },
    CreateSession { reply: Reply },
    LoadSession { session_id: String, reply: Reply },
    SendMessage { content: String, reply: Reply },
    Booking { command: BookingCommand, reply: Reply },
    ClearError { reply: Reply },
    Shutdown,
}

/// Cloneable handle to a running widget.
///
/// Actions resolve once the runtime has applied them, not when the network
/// work they start has finished; observe completion through [`Self::subscribe`].
#[derive(Clone)]
pub struct WidgetHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<SyncState>,
    registry: Arc<EventRegistry>,
}

impl WidgetHandle {
    async fn request(&self, build: impl FnOnce(Reply) -> Command) -> Result<(), SyncError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| SyncError::Closed)?;
        rx.await.map_err(|_| SyncError::Closed)?
    }

    /// Resume the stored session, if any
    pub async fn initialize(&self) -> Result<(), SyncError> {
        self.request(|reply| Command::Initialize { reply }).await
    }

    /// Start a new conversation; no-op while one exists or is being started
    pub async fn create_session(&self) -> Result<(), SyncError> {
        self.request(|reply| Command::CreateSession { reply }).await
    }

    /// Resume a session by id and replace the local log with its history
    pub async fn load_session(&self, session_id: impl Into<String>) -> Result<(), SyncError> {
        let session_id = session_id.into();
        self.request(|reply| Command::LoadSession { session_id, reply })
            .await
    }

    pub async fn send_message(&self, content: impl Into<String>) -> Result<(), SyncError> {
        let content = content.into();
        self.request(|reply| Command::SendMessage { content, reply })
            .await
    }

    pub async fn clear_error(&self) -> Result<(), SyncError> {
        self.request(|reply| Command::ClearError { reply }).await
    }

    pub async fn booking(&self, command: BookingCommand) -> Result<(), SyncError> {
        self.request(|reply| Command::Booking { command, reply })
            .await
    }

    pub async fn begin_booking(&self) -> Result<(), SyncError> {
        self.booking(BookingCommand::Begin).await
    }

    pub async fn select_expert(&self, expert: Expert) -> Result<(), SyncError> {
        self.booking(BookingCommand::SelectExpert(expert)).await
    }

    pub async fn select_slot(&self, slot: TimeSlot) -> Result<(), SyncError> {
        self.booking(BookingCommand::SelectSlot(slot)).await
    }

    pub async fn release_slot(&self) -> Result<(), SyncError> {
        self.booking(BookingCommand::ReleaseSlot).await
    }

    pub async fn confirm_slot(&self) -> Result<(), SyncError> {
        self.booking(BookingCommand::ConfirmSlot).await
    }

    pub async fn update_contact(&self, form: ContactForm) -> Result<(), SyncError> {
        self.booking(BookingCommand::UpdateContact(form)).await
    }

    /// Validate the contact form and submit the held slot
    pub async fn submit_booking(&self) -> Result<(), SyncError> {
        self.booking(BookingCommand::Submit).await
    }

    pub async fn cancel_booking(&self) -> Result<(), SyncError> {
        self.booking(BookingCommand::Cancel).await
    }

    pub async fn reset_booking(&self) -> Result<(), SyncError> {
        self.booking(BookingCommand::Reset).await
    }

    /// Latest published state
    pub fn state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.clone()
    }

    /// Named server event subscriptions, kept across reconnects
    pub fn events(&self) -> &Arc<EventRegistry> {
        &self.registry
    }

    /// Wait until the published state satisfies `predicate`
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&SyncState) -> bool,
    ) -> Result<SyncState, SyncError> {
        let mut rx = self.state.clone();
        let state = rx.wait_for(predicate).await.map_err(|_| SyncError::Closed)?;
        Ok(state.clone())
    }

    /// Stop the runtime: the realtime connection and refresh timer are torn down
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }
}
