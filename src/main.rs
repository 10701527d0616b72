//! consult-chat - terminal client for the consultation widget
//!
//! Resumes the stored conversation (or the session id given as the first
//! argument), otherwise starts a new one. Plain lines are sent as messages;
//! slash commands drive the booking flow.

use consult_sync::api::HttpApi;
use consult_sync::booking::{BookingState, ContactForm};
use consult_sync::identity::SqliteIdentityStore;
use consult_sync::model::{Delivery, Role};
use consult_sync::realtime::SseChannel;
use consult_sync::store::LifecycleStatus;
use consult_sync::{SyncError, SyncState, WidgetConfig, WidgetHandle, WidgetRuntime};
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::WatchStream;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const HELP: &str = "\
Commands:
  /experts              list matched experts
  /book N               pick expert N and load availability
  /slot N               hold slot N
  /release              release the held slot
  /confirm              continue with the held slot
  /contact NAME EMAIL   fill in contact details
  /submit               book the slot
  /cancel               cancel a completed booking
  /reset                leave the booking flow
  /clear                dismiss the error
  /quit                 exit
Anything else is sent as a message.";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so the conversation on stdout stays readable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "consult_sync=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = WidgetConfig::from_env();

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    tracing::info!(path = %config.db_path.display(), "Opening identity store");
    let identity = SqliteIdentityStore::open(&config.db_path)?;

    let api = HttpApi::new(&config.api_url, config.request_timeout, &config.user_agent)?;
    let channel = SseChannel::new(&config.api_url, &config.user_agent)?;
    tracing::info!(api_url = %config.api_url, timezone = %config.timezone, "Starting widget");

    let handle = WidgetRuntime::spawn(api, channel, identity, config.runtime_config());
    let renderer = tokio::spawn(render(handle.clone()));

    match std::env::args().nth(1) {
        Some(session_id) => handle.load_session(session_id).await?,
        None => {
            handle.initialize().await?;
            let state = handle
                .wait_for(|s| s.lifecycle == LifecycleStatus::Idle)
                .await?;
            if !state.has_session() {
                handle.create_session().await?;
            }
        }
    }

    println!("Type a message, or /help for commands.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = match parse_input(&line) {
            Ok(Some(input)) => input,
            Ok(None) => continue,
            Err(usage) => {
                println!("{usage}");
                continue;
            }
        };
        if input == Input::Quit {
            break;
        }
        if let Err(e) = execute(&handle, input).await {
            println!("! {e}");
        }
    }

    handle.shutdown().await;
    renderer.abort();
    Ok(())
}

#[derive(Debug, PartialEq)]
enum Input {
    Message(String),
    Help,
    Experts,
    Book(usize),
    Slot(usize),
    Release,
    Confirm,
    Contact(ContactForm),
    Submit,
    Cancel,
    Reset,
    Clear,
    Quit,
}

fn parse_index(arg: Option<&str>, usage: &str) -> Result<usize, String> {
    arg.and_then(|a| a.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .ok_or_else(|| format!("Usage: {usage}"))
}

fn parse_input(line: &str) -> Result<Option<Input>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(command) = line.strip_prefix('/') else {
        return Ok(Some(Input::Message(line.to_string())));
    };

    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let input = match name {
        "help" => Input::Help,
        "experts" => Input::Experts,
        "book" => Input::Book(parse_index(parts.next(), "/book N")?),
        "slot" => Input::Slot(parse_index(parts.next(), "/slot N")?),
        "release" => Input::Release,
        "confirm" => Input::Confirm,
        "contact" => {
            let words: Vec<&str> = parts.collect();
            let Some((email, name)) = words.split_last() else {
                return Err("Usage: /contact NAME EMAIL".to_string());
            };
            Input::Contact(ContactForm {
                name: name.join(" "),
                email: (*email).to_string(),
            })
        }
        "submit" => Input::Submit,
        "cancel" => Input::Cancel,
        "reset" => Input::Reset,
        "clear" => Input::Clear,
        "quit" | "exit" => Input::Quit,
        other => return Err(format!("Unknown command /{other}; try /help")),
    };
    Ok(Some(input))
}

async fn execute(handle: &WidgetHandle, input: Input) -> Result<(), SyncError> {
    let state = handle.state();
    match input {
        Input::Message(text) => handle.send_message(text).await,
        Input::Help => {
            println!("{HELP}");
            Ok(())
        }
        Input::Experts => {
            if state.matched_experts.is_empty() {
                println!("No experts matched yet.");
            }
            for (i, expert) in state.matched_experts.iter().enumerate() {
                let title = expert.title.as_deref().unwrap_or("Expert");
                println!("  {}. {} - {title}", i + 1, expert.name);
            }
            Ok(())
        }
        Input::Book(n) => {
            let expert = state
                .matched_experts
                .get(n - 1)
                .cloned()
                .ok_or_else(|| SyncError::InvalidAction(format!("No expert #{n}; see /experts")))?;
            if state.booking.state == BookingState::Idle {
                handle.begin_booking().await?;
            }
            handle.select_expert(expert).await
        }
        Input::Slot(n) => {
            let slot = state
                .booking
                .slots
                .get(n - 1)
                .cloned()
                .ok_or_else(|| SyncError::InvalidAction(format!("No slot #{n}")))?;
            handle.select_slot(slot).await
        }
        Input::Release => handle.release_slot().await,
        Input::Confirm => handle.confirm_slot().await,
        Input::Contact(form) => handle.update_contact(form).await,
        Input::Submit => handle.submit_booking().await,
        Input::Cancel => handle.cancel_booking().await,
        Input::Reset => handle.reset_booking().await,
        Input::Clear => handle.clear_error().await,
        Input::Quit => Ok(()),
    }
}

/// Print what changed between published states
#[derive(Default)]
struct Renderer {
    printed: HashMap<String, String>,
    failed: HashSet<String>,
    connection: String,
    error: Option<String>,
    phase: String,
    booking: BookingState,
    slots: usize,
    field_errors: usize,
}

impl Renderer {
    fn render(&mut self, state: &SyncState) {
        let status = state.connection.to_string();
        if status != self.connection {
            println!("[{status}]");
            self.connection = status;
        }
        if state.phase.as_str() != self.phase && !state.phase.as_str().is_empty() {
            println!("[phase: {}]", state.phase);
            self.phase = state.phase.to_string();
        }

        let last = state.messages.len().saturating_sub(1);
        for (i, message) in state.messages.iter().enumerate() {
            // The visitor typed their own lines; only report failures
            if message.role == Role::Visitor {
                if message.delivery == Delivery::Failed && self.failed.insert(message.id.clone()) {
                    println!("! not delivered: {}", message.content);
                }
                continue;
            }
            if state.is_streaming && i == last {
                continue;
            }
            if self.printed.get(&message.id) != Some(&message.content) {
                let who = if message.role == Role::System { "system" } else { "consultant" };
                println!("{who}> {}", message.content);
                self.printed.insert(message.id.clone(), message.content.clone());
            }
        }

        self.render_booking(state);

        let error = state.error.as_ref().map(|e| {
            if e.retryable {
                format!("{} (you can try again)", e.message)
            } else {
                e.message.clone()
            }
        });
        if error != self.error {
            if let Some(message) = &error {
                println!("! {message}");
            }
            self.error = error;
        }
    }

    fn render_booking(&mut self, state: &SyncState) {
        let booking = &state.booking;
        if booking.state != self.booking {
            println!("[booking: {}]", booking.state);
            self.booking = booking.state;
            self.slots = 0;
            if booking.state == BookingState::Confirming {
                println!("Enter your details with /contact NAME EMAIL, then /submit.");
            }
            if let (BookingState::Completed, Some(created)) = (booking.state, &booking.created_booking) {
                println!(
                    "Booked {} - {} ({})",
                    created.start_time, created.end_time, created.timezone
                );
                if let Some(url) = &created.meeting_url {
                    println!("Meeting link: {url}");
                }
            }
        }

        if booking.state == BookingState::SelectingTime
            && !booking.availability_loading
            && booking.slots.len() != self.slots
        {
            if booking.slots.is_empty() {
                println!("No open slots.");
            }
            for (i, slot) in booking.slots.iter().enumerate() {
                let label = if slot.display_time.is_empty() {
                    slot.start_time.to_rfc2822()
                } else {
                    format!("{} {}", slot.display_date, slot.display_time)
                };
                println!("  {}. {label}", i + 1);
            }
            self.slots = booking.slots.len();
        }

        if booking.field_errors.len() != self.field_errors {
            for error in &booking.field_errors {
                println!("! {}: {}", error.field, error.message);
            }
            self.field_errors = booking.field_errors.len();
        }
    }
}

async fn render(handle: WidgetHandle) {
    let mut renderer = Renderer::default();
    let mut states = WatchStream::new(handle.subscribe());
    while let Some(state) = states.next().await {
        renderer.render(&state);
    }
}
