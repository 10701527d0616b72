//! Mock implementations for testing
//!
//! These mocks let the real runtime actor run without network I/O.

use super::{RuntimeConfig, WidgetHandle, WidgetRuntime};
use crate::api::{
    ApiError, AvailabilityResponse, ConsultApi, CreateBookingRequest, CreateSessionRequest,
    SessionSnapshot,
};
use crate::identity::MemoryIdentityStore;
use crate::model::{
    Booking, BookingStatus, Delivery, Expert, Message, Phase, Role, Session, SessionStatus, TimeSlot,
};
use crate::realtime::{
    ChannelHandle, ClientEvent, ConnectionStatus, FrameSink, InboundFrame, RealtimeChannel,
    TransportConfig, TransportError,
};
use crate::store::SyncState;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use futures::StreamExt;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;

// ============================================================================
// Fixtures
// ============================================================================

pub fn message(id: &str, session_id: &str, role: Role, content: &str) -> Message {
    Message {
        id: id.to_string(),
        session_id: session_id.to_string(),
        role,
        content: content.to_string(),
        metadata: Map::new(),
        created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
        delivery: Delivery::Confirmed,
    }
}

/// A session whose history is one consultant message per entry of `contents`
pub fn snapshot(session_id: &str, contents: &[&str]) -> SessionSnapshot {
    SessionSnapshot {
        session: Session {
            id: session_id.to_string(),
            visitor_id: Some("v1".to_string()),
            phase: Phase("greeting".to_string()),
            status: SessionStatus::Active,
            client_info: Map::new(),
            business_context: Map::new(),
            qualification: Map::new(),
        },
        messages: contents
            .iter()
            .enumerate()
            .map(|(i, content)| message(&format!("{session_id}-w{i}"), session_id, Role::Consultant, content))
            .collect(),
    }
}

pub fn expert(id: &str) -> Expert {
    Expert {
        id: id.to_string(),
        name: format!("Expert {id}"),
        title: Some("Solutions Architect".to_string()),
        bio: None,
        specialties: vec!["integrations".to_string()],
        match_score: Some(0.9),
    }
}

/// Thirty-minute slot starting at `hour` on a fixed day
pub fn slot(hour: u32) -> TimeSlot {
    let start = Utc.with_ymd_and_hms(2030, 6, 3, hour, 0, 0).unwrap();
    TimeSlot {
        start_time: start,
        end_time: start + ChronoDuration::minutes(30),
        timezone: "UTC".to_string(),
        display_date: "Mon, Jun 3".to_string(),
        display_time: format!("{hour}:00"),
    }
}

/// Wait (bounded) until the connection status satisfies `predicate`
pub async fn wait_for_status<F>(rx: &mut watch::Receiver<ConnectionStatus>, predicate: F) -> bool
where
    F: FnMut(&ConnectionStatus) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(predicate))
        .await
        .is_ok_and(|r| r.is_ok())
}

// ============================================================================
// Mock Backend
// ============================================================================

type Queue<T> = Mutex<VecDeque<Result<T, ApiError>>>;

/// In-memory backend with queued overrides per operation.
///
/// Without a queued result the mock behaves like a small working backend:
/// sessions are stored, fallback sends append the visitor message and an
/// `Echo:` reply, bookings are accepted.
#[derive(Default)]
pub struct MockApi {
    sessions: Mutex<HashMap<String, SessionSnapshot>>,
    bookings: Mutex<HashMap<String, Booking>>,
    availability: Mutex<HashMap<String, Vec<TimeSlot>>>,
    create_results: Queue<SessionSnapshot>,
    resume_results: Queue<SessionSnapshot>,
    send_results: Queue<()>,
    booking_results: Queue<Booking>,
    cancel_results: Queue<Booking>,
    delays: Mutex<HashMap<&'static str, Duration>>,
    calls: Mutex<Vec<&'static str>>,
    create_requests: Mutex<Vec<CreateSessionRequest>>,
    availability_requests: Mutex<Vec<(String, String)>>,
    booking_requests: Mutex<Vec<CreateBookingRequest>>,
    next_id: AtomicUsize,
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_session(&self, snapshot: SessionSnapshot) {
        self.sessions
            .lock()
            .unwrap()
            .insert(snapshot.session.id.clone(), snapshot);
    }

    pub fn session(&self, session_id: &str) -> Option<SessionSnapshot> {
        self.sessions.lock().unwrap().get(session_id).cloned()
    }

    pub fn set_availability(&self, expert_id: &str, slots: Vec<TimeSlot>) {
        self.availability
            .lock()
            .unwrap()
            .insert(expert_id.to_string(), slots);
    }

    pub fn queue_create(&self, result: Result<SessionSnapshot, ApiError>) {
        self.create_results.lock().unwrap().push_back(result);
    }

    pub fn queue_resume(&self, result: Result<SessionSnapshot, ApiError>) {
        self.resume_results.lock().unwrap().push_back(result);
    }

    pub fn queue_send(&self, result: Result<(), ApiError>) {
        self.send_results.lock().unwrap().push_back(result);
    }

    pub fn queue_booking(&self, result: Result<Booking, ApiError>) {
        self.booking_results.lock().unwrap().push_back(result);
    }

    pub fn queue_cancel(&self, result: Result<Booking, ApiError>) {
        self.cancel_results.lock().unwrap().push_back(result);
    }

    /// Hold every call to `operation` for `delay` before answering
    pub fn set_delay(&self, operation: &'static str, delay: Duration) {
        self.delays.lock().unwrap().insert(operation, delay);
    }

    pub fn call_count(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| **c == operation)
            .count()
    }

    pub fn create_requests(&self) -> Vec<CreateSessionRequest> {
        self.create_requests.lock().unwrap().clone()
    }

    pub fn availability_requests(&self) -> Vec<(String, String)> {
        self.availability_requests.lock().unwrap().clone()
    }

    pub fn booking_requests(&self) -> Vec<CreateBookingRequest> {
        self.booking_requests.lock().unwrap().clone()
    }

    async fn enter(&self, operation: &'static str) {
        self.calls.lock().unwrap().push(operation);
        let delay = self.delays.lock().unwrap().get(operation).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn next_id(&self) -> usize {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn stored(&self, session_id: &str) -> Result<SessionSnapshot, ApiError> {
        self.session(session_id)
            .ok_or_else(|| ApiError::from_status(404, "Session not found"))
    }
}

fn pop<T>(queue: &Queue<T>) -> Option<Result<T, ApiError>> {
    queue.lock().unwrap().pop_front()
}

#[async_trait]
impl ConsultApi for MockApi {
    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<SessionSnapshot, ApiError> {
        self.create_requests.lock().unwrap().push(request.clone());
        self.enter("create_session").await;
        let result = pop(&self.create_results)
            .unwrap_or_else(|| Ok(snapshot(&format!("s{}", self.next_id()), &["Welcome!"])));
        if let Ok(created) = &result {
            self.insert_session(created.clone());
        }
        result
    }

    async fn get_session(&self, session_id: &str) -> Result<SessionSnapshot, ApiError> {
        self.enter("get_session").await;
        self.stored(session_id)
    }

    async fn resume_session(&self, session_id: &str) -> Result<SessionSnapshot, ApiError> {
        self.enter("resume_session").await;
        pop(&self.resume_results).unwrap_or_else(|| self.stored(session_id))
    }

    async fn send_message(&self, session_id: &str, content: &str) -> Result<(), ApiError> {
        self.enter("send_message").await;
        if let Some(result) = pop(&self.send_results) {
            return result;
        }

        let n = self.next_id();
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| ApiError::from_status(404, "Session not found"))?;
        session
            .messages
            .push(message(&format!("{session_id}-v{n}"), session_id, Role::Visitor, content));
        session.messages.push(message(
            &format!("{session_id}-r{n}"),
            session_id,
            Role::Consultant,
            &format!("Echo: {content}"),
        ));
        Ok(())
    }

    async fn get_availability(
        &self,
        expert_id: &str,
        timezone: &str,
    ) -> Result<AvailabilityResponse, ApiError> {
        self.availability_requests
            .lock()
            .unwrap()
            .push((expert_id.to_string(), timezone.to_string()));
        self.enter("get_availability").await;
        let slots = self
            .availability
            .lock()
            .unwrap()
            .get(expert_id)
            .cloned()
            .unwrap_or_default();
        Ok(AvailabilityResponse {
            expert_id: Some(expert_id.to_string()),
            timezone: Some(timezone.to_string()),
            slots,
        })
    }

    async fn create_booking(&self, request: &CreateBookingRequest) -> Result<Booking, ApiError> {
        self.booking_requests.lock().unwrap().push(request.clone());
        self.enter("create_booking").await;
        let result = pop(&self.booking_results).unwrap_or_else(|| {
            Ok(Booking {
                id: format!("b{}", self.next_id()),
                session_id: request.session_id.clone(),
                expert_id: request.expert_id.clone(),
                start_time: request.start_time,
                end_time: request.end_time,
                timezone: request.timezone.clone(),
                client_name: request.client_name.clone(),
                client_email: request.client_email.clone(),
                status: BookingStatus::Confirmed,
                meeting_url: Some("https://meet.example.com/abc".to_string()),
            })
        });
        if let Ok(booking) = &result {
            self.bookings
                .lock()
                .unwrap()
                .insert(booking.id.clone(), booking.clone());
        }
        result
    }

    async fn cancel_booking(&self, booking_id: &str) -> Result<Booking, ApiError> {
        self.enter("cancel_booking").await;
        if let Some(result) = pop(&self.cancel_results) {
            return result;
        }
        let mut bookings = self.bookings.lock().unwrap();
        let booking = bookings
            .get_mut(booking_id)
            .ok_or_else(|| ApiError::from_status(404, "Booking not found"))?;
        booking.status = BookingStatus::Cancelled;
        Ok(booking.clone())
    }
}

// ============================================================================
// Mock Realtime Channel
// ============================================================================

type FrameTx = mpsc::UnboundedSender<Result<InboundFrame, TransportError>>;
type FrameRx = mpsc::UnboundedReceiver<Result<InboundFrame, TransportError>>;

/// Scripted channel: each `open` takes the next queued server or refusal.
///
/// With nothing queued, `open` succeeds with a connection that never
/// signals `connected`, so the widget stays on the fallback path.
#[derive(Default)]
pub struct MockChannel {
    queued: Mutex<VecDeque<Result<FrameRx, TransportError>>>,
    opened: AtomicUsize,
    sent: Arc<Mutex<Vec<ClientEvent>>>,
    write_failures: Arc<Mutex<HashMap<&'static str, TransportError>>>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a connection; frames sent before it opens are buffered
    pub fn accept_next(&self) -> MockServer {
        let (tx, rx) = mpsc::unbounded_channel();
        self.queued.lock().unwrap().push_back(Ok(rx));
        MockServer { tx }
    }

    pub fn refuse_next(&self, error: TransportError) {
        self.queued.lock().unwrap().push_back(Err(error));
    }

    /// Make every write of the named client event fail with `error`
    pub fn fail_event(&self, name: &'static str, error: TransportError) {
        self.write_failures.lock().unwrap().insert(name, error);
    }

    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Every client event written to any connection, in order
    pub fn sent(&self) -> Vec<ClientEvent> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl RealtimeChannel for MockChannel {
    async fn open(&self, _session_id: &str) -> Result<ChannelHandle, TransportError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let next = self.queued.lock().unwrap().pop_front();
        let inbound = match next {
            Some(Ok(rx)) => UnboundedReceiverStream::new(rx).boxed(),
            Some(Err(error)) => return Err(error),
            None => futures::stream::pending().boxed(),
        };
        Ok(ChannelHandle {
            inbound,
            outbound: Box::new(MockSink {
                sent: Arc::clone(&self.sent),
                failures: Arc::clone(&self.write_failures),
            }),
        })
    }
}

struct MockSink {
    sent: Arc<Mutex<Vec<ClientEvent>>>,
    failures: Arc<Mutex<HashMap<&'static str, TransportError>>>,
}

#[async_trait]
impl FrameSink for MockSink {
    async fn send(&self, event: &ClientEvent) -> Result<(), TransportError> {
        if let Some(error) = self.failures.lock().unwrap().get(event.name()) {
            return Err(error.clone());
        }
        self.sent.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Server side of one mock connection. Dropping it is a network drop.
pub struct MockServer {
    tx: FrameTx,
}

impl MockServer {
    pub fn connected(&self) {
        self.send("connected", json!({}));
    }

    pub fn send(&self, name: &str, data: Value) {
        let _ = self.tx.send(Ok(InboundFrame::Event {
            name: name.to_string(),
            data,
        }));
    }

    pub fn send_message(&self, message: &Message) {
        self.send("message", serde_json::to_value(message).unwrap());
    }

    pub fn stream(&self, message_id: &str, content: &str, is_complete: bool) {
        self.send(
            "message_stream",
            json!({
                "message_id": message_id,
                "content": content,
                "is_complete": is_complete
            }),
        );
    }

    /// Server-initiated close
    pub fn close(&self, reason: &str) {
        let _ = self.tx.send(Ok(InboundFrame::Closed {
            reason: Some(reason.to_string()),
        }));
    }
}

// ============================================================================
// Test Widget
// ============================================================================

/// A running widget wired to mocks
pub struct TestWidget {
    pub handle: WidgetHandle,
    pub api: Arc<MockApi>,
    pub channel: Arc<MockChannel>,
    pub identity: Arc<MemoryIdentityStore>,
}

impl TestWidget {
    pub fn builder() -> TestWidgetBuilder {
        TestWidgetBuilder::default()
    }

    /// Wait (bounded) for a published state matching `predicate`
    pub async fn wait(&self, predicate: impl FnMut(&SyncState) -> bool) -> SyncState {
        match tokio::time::timeout(Duration::from_secs(2), self.handle.wait_for(predicate)).await {
            Ok(Ok(state)) => state,
            Ok(Err(e)) => panic!("Widget stopped: {e}"),
            Err(_) => panic!("Timed out waiting for state; last: {:#?}", self.handle.state()),
        }
    }

    pub fn state(&self) -> SyncState {
        self.handle.state()
    }
}

pub struct TestWidgetBuilder {
    api: Arc<MockApi>,
    channel: Arc<MockChannel>,
    identity: Arc<MemoryIdentityStore>,
    config: RuntimeConfig,
}

impl Default for TestWidgetBuilder {
    fn default() -> Self {
        Self {
            api: Arc::new(MockApi::new()),
            channel: Arc::new(MockChannel::new()),
            identity: Arc::new(MemoryIdentityStore::new()),
            config: RuntimeConfig {
                timezone: "UTC".to_string(),
                referrer: None,
                user_agent: Some("consult-chat-test".to_string()),
                refresh_interval: Duration::from_millis(20),
                transport: TransportConfig {
                    max_attempts: 2,
                    base_delay: Duration::from_millis(5),
                    max_delay: Duration::from_millis(10),
                    idle_timeout: Duration::from_secs(60),
                },
            },
        }
    }
}

impl TestWidgetBuilder {
    pub fn api(mut self, api: MockApi) -> Self {
        self.api = Arc::new(api);
        self
    }

    pub fn identity(mut self, identity: MemoryIdentityStore) -> Self {
        self.identity = Arc::new(identity);
        self
    }

    pub fn build(self) -> TestWidget {
        let handle = WidgetRuntime::spawn(
            Arc::clone(&self.api),
            Arc::clone(&self.channel),
            Arc::clone(&self.identity),
            self.config,
        );
        TestWidget {
            handle,
            api: self.api,
            channel: self.channel,
            identity: self.identity,
        }
    }
}

// ============================================================================
// Integration Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::{BookingState, ContactForm};
    use crate::error::SyncError;
    use crate::identity::IdentityStore;
    use crate::store::LifecycleStatus;

    async fn started(widget: &TestWidget) -> SyncState {
        widget.handle.create_session().await.unwrap();
        widget.wait(|s| s.has_session() && s.lifecycle == LifecycleStatus::Idle).await
    }

    fn contact(name: &str, email: &str) -> ContactForm {
        ContactForm {
            name: name.to_string(),
            email: email.to_string(),
        }
    }

    /// Drive the booking flow to `confirming` with slot(9) held
    async fn reach_confirming(widget: &TestWidget) {
        widget.api.set_availability("e1", vec![slot(9), slot(10)]);
        widget.handle.begin_booking().await.unwrap();
        widget.handle.select_expert(expert("e1")).await.unwrap();
        widget
            .wait(|s| s.booking.slots.len() == 2 && !s.booking.availability_loading)
            .await;
        widget.handle.select_slot(slot(9)).await.unwrap();
        widget.handle.confirm_slot().await.unwrap();
        assert_eq!(widget.state().booking.state, BookingState::Confirming);
    }

    #[tokio::test]
    async fn test_double_create_makes_one_session() {
        let widget = TestWidget::builder().build();
        widget.api.set_delay("create_session", Duration::from_millis(50));

        let (first, second) = tokio::join!(
            widget.handle.create_session(),
            widget.handle.create_session()
        );
        first.unwrap();
        second.unwrap();

        let state = widget.wait(|s| s.has_session()).await;
        assert_eq!(widget.api.call_count("create_session"), 1);
        assert_eq!(widget.identity.session_id().unwrap(), state.session_id);
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].content, "Welcome!");

        widget.handle.create_session().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(widget.api.call_count("create_session"), 1);
    }

    #[tokio::test]
    async fn test_create_sends_visitor_id_from_identity_store() {
        let identity = MemoryIdentityStore::new();
        identity.ensure_visitor_id("visitor-7").unwrap();
        let widget = TestWidget::builder().identity(identity).build();

        started(&widget).await;

        let requests = widget.api.create_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].visitor_id, "visitor-7");
        assert_eq!(requests[0].user_agent.as_deref(), Some("consult-chat-test"));
    }

    #[tokio::test]
    async fn test_create_failure_persists_nothing() {
        let widget = TestWidget::builder().build();
        widget.api.queue_create(Err(ApiError::network("connection refused")));

        widget.handle.create_session().await.unwrap();
        let state = widget.wait(|s| s.error.is_some()).await;

        assert!(!state.has_session());
        assert_eq!(state.lifecycle, LifecycleStatus::Idle);
        assert!(state.error.as_ref().unwrap().retryable);
        assert_eq!(widget.identity.session_id().unwrap(), None);

        // Retry is user-initiated
        widget.handle.create_session().await.unwrap();
        widget.wait(|s| s.has_session()).await;
        assert_eq!(widget.api.call_count("create_session"), 2);
    }

    #[tokio::test]
    async fn test_create_is_noop_with_stored_session() {
        let identity = MemoryIdentityStore::new();
        identity.set_session_id("s9").unwrap();
        let widget = TestWidget::builder().identity(identity).build();

        widget.handle.create_session().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(widget.api.call_count("create_session"), 0);
        assert!(!widget.state().has_session());
    }

    #[tokio::test]
    async fn test_initialize_restores_stored_session() {
        let api = MockApi::new();
        api.insert_session(snapshot("s1", &["Welcome!", "What are you building?"]));
        let identity = MemoryIdentityStore::new();
        identity.set_session_id("s1").unwrap();
        let widget = TestWidget::builder().api(api).identity(identity).build();

        widget.handle.initialize().await.unwrap();
        let state = widget.wait(|s| s.has_session()).await;

        assert_eq!(state.session_id.as_deref(), Some("s1"));
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.phase.as_str(), "greeting");
        assert_eq!(widget.api.call_count("resume_session"), 1);
    }

    #[tokio::test]
    async fn test_initialize_forgets_unknown_session() {
        let identity = MemoryIdentityStore::new();
        identity.set_session_id("gone").unwrap();
        let widget = TestWidget::builder().identity(identity).build();

        widget.handle.initialize().await.unwrap();
        let state = widget.wait(|s| s.error.is_some()).await;

        assert!(!state.has_session());
        assert!(!state.error.unwrap().retryable);
        assert_eq!(widget.identity.session_id().unwrap(), None);

        started(&widget).await;
        assert_eq!(widget.api.call_count("create_session"), 1);
    }

    #[tokio::test]
    async fn test_send_requires_session() {
        let widget = TestWidget::builder().build();
        let err = widget.handle.send_message("Hello").await.unwrap_err();
        assert!(matches!(err, SyncError::NoSession));
        assert!(widget.state().messages.is_empty());
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected_locally() {
        let widget = TestWidget::builder().build();
        started(&widget).await;

        let err = widget.handle.send_message("   ").await.unwrap_err();
        match err {
            SyncError::Validation(e) => assert!(e.message_for("content").is_some()),
            other => panic!("Expected Validation, got {other:?}"),
        }
        assert_eq!(widget.state().messages.len(), 1);
        assert_eq!(widget.api.call_count("send_message"), 0);
    }

    #[tokio::test]
    async fn test_fallback_send_grows_log_by_two() {
        let widget = TestWidget::builder().build();
        let before = started(&widget).await.messages.len();
        widget.api.set_delay("send_message", Duration::from_millis(30));

        widget.handle.send_message("Hello").await.unwrap();
        let echoed = widget.state();
        assert_eq!(echoed.messages.len(), before + 1);
        assert!(echoed.messages.last().unwrap().is_pending());
        assert!(echoed.is_streaming);

        let state = widget
            .wait(|s| !s.is_streaming && s.messages.len() == before + 2)
            .await;
        let contents: Vec<&str> = state.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["Welcome!", "Hello", "Echo: Hello"]);
        assert!(state.messages.iter().all(|m| m.delivery == Delivery::Confirmed));
        assert_eq!(widget.api.call_count("send_message"), 1);
    }

    #[tokio::test]
    async fn test_failed_send_keeps_echo_and_sets_banner() {
        let widget = TestWidget::builder().build();
        started(&widget).await;
        widget.api.queue_send(Err(ApiError::from_status(503, "Service unavailable")));

        widget.handle.send_message("Hello").await.unwrap();
        let state = widget.wait(|s| s.error.is_some()).await;

        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages[1].content, "Hello");
        assert_eq!(state.messages[1].delivery, Delivery::Failed);
        assert!(state.error.as_ref().unwrap().retryable);
        assert!(!state.is_streaming);

        widget.handle.clear_error().await.unwrap();
        assert!(widget.state().error.is_none());
    }

    #[tokio::test]
    async fn test_realtime_stream_and_echo_reconciliation() {
        let widget = TestWidget::builder().build();
        let server = widget.channel.accept_next();
        widget.api.queue_create(Ok(snapshot("s1", &["Welcome!"])));
        started(&widget).await;

        server.connected();
        widget.wait(|s| s.connection.is_connected()).await;

        widget.handle.send_message("Hello").await.unwrap();
        assert!(widget.state().messages[1].is_pending());

        // The server broadcasts the visitor's message under its own id
        server.send_message(&message("m-v1", "s1", Role::Visitor, "Hello"));
        let state = widget.wait(|s| s.position("m-v1").is_some()).await;
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.position("m-v1"), Some(1));
        assert!(!state.messages.iter().any(Message::is_pending));

        server.send("typing_start", json!({}));
        widget.wait(|s| s.is_streaming).await;

        server.stream("m1", "Hel", false);
        widget.wait(|s| s.message("m1").is_some_and(|m| m.content == "Hel")).await;
        server.stream("m1", "Hello there", true);
        let state = widget
            .wait(|s| !s.is_streaming && s.message("m1").is_some_and(|m| m.content == "Hello there"))
            .await;

        assert_eq!(state.messages.iter().filter(|m| m.id == "m1").count(), 1);
        assert_eq!(state.messages.len(), 3);
        assert_eq!(widget.api.call_count("send_message"), 0);
        assert_eq!(
            widget.channel.sent(),
            vec![
                ClientEvent::Join {
                    session_id: "s1".to_string()
                },
                ClientEvent::SendMessage {
                    session_id: "s1".to_string(),
                    content: "Hello".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_domain_events_fold_into_state() {
        let widget = TestWidget::builder().build();
        let server = widget.channel.accept_next();
        widget.api.queue_create(Ok(snapshot("s1", &["Welcome!"])));
        started(&widget).await;
        server.connected();
        widget.wait(|s| s.connection.is_connected()).await;

        server.send("phase_change", json!({"phase": "discovery"}));
        server.send(
            "prd_generated",
            json!({"title": "Requirements", "content": "# Goals"}),
        );
        server.send("experts_matched", json!({"experts": [expert("e1"), expert("e2")]}));

        let state = widget
            .wait(|s| s.phase.as_str() == "discovery" && s.document.is_some() && s.matched_experts.len() == 2)
            .await;
        assert_eq!(state.session.as_ref().unwrap().phase.as_str(), "discovery");
        assert_eq!(state.document.unwrap().title, "Requirements");
    }

    #[tokio::test]
    async fn test_resume_replaces_local_messages() {
        let widget = TestWidget::builder().build();
        widget.api.queue_create(Ok(snapshot("s1", &["Welcome!"])));
        started(&widget).await;
        widget.api.queue_send(Err(ApiError::network("offline")));
        widget.handle.send_message("draft").await.unwrap();
        widget.wait(|s| s.error.is_some()).await;
        assert_eq!(widget.state().messages.len(), 2);

        widget.handle.load_session("s1").await.unwrap();
        let expected = widget.api.session("s1").unwrap().messages;
        let state = widget
            .wait(|s| s.lifecycle == LifecycleStatus::Idle && s.messages == expected)
            .await;

        assert!(state.error.is_none());
        assert_eq!(widget.identity.session_id().unwrap().as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn test_stale_fallback_after_session_switch_is_dropped() {
        let widget = TestWidget::builder().build();
        widget.api.queue_create(Ok(snapshot("s1", &["Welcome!"])));
        widget.api.insert_session(snapshot("s2", &["Earlier", "Conversation"]));
        started(&widget).await;
        widget.api.set_delay("send_message", Duration::from_millis(80));

        widget.handle.send_message("Hello").await.unwrap();
        widget.handle.load_session("s2").await.unwrap();
        let switched = widget
            .wait(|s| s.session_id.as_deref() == Some("s2") && s.lifecycle == LifecycleStatus::Idle)
            .await;

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(widget.api.call_count("get_session"), 1);
        let state = widget.state();
        assert_eq!(state.messages, switched.messages);
        assert_eq!(state.messages.len(), 2);
        assert!(state.error.is_none());
        assert!(!state.is_streaming);
    }

    #[tokio::test]
    async fn test_server_close_is_terminal() {
        let widget = TestWidget::builder().build();
        let server = widget.channel.accept_next();
        started(&widget).await;
        server.connected();
        widget.wait(|s| s.connection.is_connected()).await;

        server.close("session ended");
        let state = widget
            .wait(|s| matches!(s.connection, ConnectionStatus::Closed { .. }))
            .await;

        let banner = state.error.unwrap();
        assert!(!banner.retryable);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(widget.channel.open_count(), 1);
    }

    #[tokio::test]
    async fn test_booking_flow_completes_and_cancels() {
        let widget = TestWidget::builder().build();
        started(&widget).await;
        reach_confirming(&widget).await;

        widget.handle.update_contact(contact("Ada Lovelace", "ada@example.com")).await.unwrap();
        widget.handle.submit_booking().await.unwrap();
        let state = widget.wait(|s| s.booking.state == BookingState::Completed).await;

        let booking = state.booking.created_booking.unwrap();
        assert_eq!(booking.client_name, "Ada Lovelace");
        assert_eq!(booking.start_time, slot(9).start_time);
        let requests = widget.api.booking_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].timezone, "UTC");
        assert_eq!(requests[0].expert_id, "e1");

        widget.handle.cancel_booking().await.unwrap();
        widget.wait(|s| s.booking.state == BookingState::Cancelled).await;
        assert_eq!(widget.api.call_count("cancel_booking"), 1);
    }

    #[tokio::test]
    async fn test_booking_failure_keeps_form() {
        let widget = TestWidget::builder().build();
        started(&widget).await;
        reach_confirming(&widget).await;

        let form = contact("Ada Lovelace", "ada@example.com");
        widget.handle.update_contact(form.clone()).await.unwrap();
        widget.api.queue_booking(Err(ApiError::network("connection reset")));
        widget.handle.submit_booking().await.unwrap();

        let state = widget
            .wait(|s| !s.booking.submitting && s.error.is_some())
            .await;
        assert_eq!(state.booking.state, BookingState::Confirming);
        assert_eq!(state.booking.contact, form);
        assert_eq!(state.booking.selected_slot, Some(slot(9)));
        assert!(state.error.unwrap().retryable);

        widget.handle.submit_booking().await.unwrap();
        widget.wait(|s| s.booking.state == BookingState::Completed).await;
    }

    #[tokio::test]
    async fn test_invalid_contact_errors_are_field_local() {
        let widget = TestWidget::builder().build();
        started(&widget).await;
        reach_confirming(&widget).await;

        widget.handle.update_contact(contact("Ada", "not-an-email")).await.unwrap();
        let err = widget.handle.submit_booking().await.unwrap_err();
        match err {
            SyncError::Validation(e) => {
                assert!(e.message_for("email").is_some());
                assert!(e.message_for("name").is_none());
            }
            other => panic!("Expected Validation, got {other:?}"),
        }

        let state = widget.state();
        assert_eq!(state.booking.state, BookingState::Confirming);
        assert_eq!(state.booking.contact.name, "Ada");
        assert!(state.booking.field_error("email").is_some());
        assert!(state.error.is_none());
        assert_eq!(widget.api.call_count("create_booking"), 0);
    }

    #[tokio::test]
    async fn test_refresh_polls_only_while_slot_held() {
        let widget = TestWidget::builder().build();
        started(&widget).await;
        widget.api.set_availability("e1", vec![slot(9), slot(10)]);
        widget.handle.select_expert(expert("e1")).await.unwrap();
        widget
            .wait(|s| s.booking.slots.len() == 2 && !s.booking.availability_loading)
            .await;

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(widget.api.call_count("get_availability"), 1);

        widget.handle.select_slot(slot(9)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let polled = widget.api.call_count("get_availability");
        assert!(polled >= 3, "expected refreshes while held, got {polled}");

        widget.handle.release_slot().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let stopped = widget.api.call_count("get_availability");
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(widget.api.call_count("get_availability"), stopped);
    }

    #[tokio::test]
    async fn test_refresh_releases_slot_taken_elsewhere() {
        let widget = TestWidget::builder().build();
        started(&widget).await;
        widget.api.set_availability("e1", vec![slot(9), slot(10)]);
        widget.handle.select_expert(expert("e1")).await.unwrap();
        widget.wait(|s| s.booking.slots.len() == 2).await;
        widget.handle.select_slot(slot(9)).await.unwrap();

        widget.api.set_availability("e1", vec![slot(10)]);
        let state = widget
            .wait(|s| s.booking.selected_slot.is_none() && s.error.is_some())
            .await;

        assert_eq!(state.booking.state, BookingState::SelectingTime);
        assert_eq!(state.booking.slots, vec![slot(10)]);
        assert!(!state.error.unwrap().retryable);
    }

    #[tokio::test]
    async fn test_availability_over_realtime_when_connected() {
        let widget = TestWidget::builder().build();
        let server = widget.channel.accept_next();
        widget.api.queue_create(Ok(snapshot("s1", &["Welcome!"])));
        started(&widget).await;
        server.connected();
        widget.wait(|s| s.connection.is_connected()).await;

        widget.handle.select_expert(expert("e1")).await.unwrap();
        assert!(widget.state().booking.availability_loading);
        server.send(
            "availability",
            json!({"expert_id": "e1", "slots": [slot(11)]}),
        );

        let state = widget
            .wait(|s| !s.booking.availability_loading && s.booking.slots.len() == 1)
            .await;
        assert_eq!(state.booking.slots[0], slot(11));
        assert_eq!(widget.api.call_count("get_availability"), 0);
        assert!(widget.channel.sent().contains(&ClientEvent::RequestAvailability {
            session_id: "s1".to_string(),
            expert_id: "e1".to_string(),
            timezone: "UTC".to_string(),
        }));
    }

    #[tokio::test]
    async fn test_undelivered_realtime_send_marks_echo_failed() {
        let widget = TestWidget::builder().build();
        let server = widget.channel.accept_next();
        widget
            .channel
            .fail_event("send_message", TransportError::network("POST reset by peer"));
        widget.api.queue_create(Ok(snapshot("s1", &["Welcome!"])));
        started(&widget).await;
        server.connected();
        widget.wait(|s| s.connection.is_connected()).await;

        widget.handle.send_message("Hello").await.unwrap();
        let state = widget.wait(|s| s.error.is_some()).await;

        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages[1].content, "Hello");
        assert_eq!(state.messages[1].delivery, Delivery::Failed);
        let banner = state.error.unwrap();
        assert!(banner.retryable);
        assert!(banner.message.contains("POST reset by peer"));
        assert_eq!(widget.api.call_count("send_message"), 0);
    }

    #[tokio::test]
    async fn test_send_refused_after_server_close_until_resumed() {
        let widget = TestWidget::builder().build();
        let server = widget.channel.accept_next();
        widget.api.queue_create(Ok(snapshot("s1", &["Welcome!"])));
        started(&widget).await;
        server.connected();
        widget.wait(|s| s.connection.is_connected()).await;
        server.close("session ended");
        widget
            .wait(|s| matches!(s.connection, ConnectionStatus::Closed { .. }))
            .await;

        let err = widget.handle.send_message("Hello").await.unwrap_err();
        match err {
            SyncError::Transport(e) => assert!(e.message.contains("session ended")),
            other => panic!("Expected Transport, got {other:?}"),
        }
        assert_eq!(widget.state().messages.len(), 1);

        widget.handle.load_session("s1").await.unwrap();
        widget
            .wait(|s| s.lifecycle == LifecycleStatus::Idle && s.connection.is_live())
            .await;
        widget.handle.send_message("Hello").await.unwrap();
        let state = widget
            .wait(|s| s.messages.iter().any(|m| m.content == "Echo: Hello"))
            .await;
        assert_eq!(widget.api.call_count("send_message"), 1);
        assert!(state.messages.iter().all(|m| m.delivery == Delivery::Confirmed));
    }

    #[tokio::test]
    async fn test_shutdown_closes_handle() {
        let widget = TestWidget::builder().build();
        widget.handle.shutdown().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let err = widget.handle.create_session().await.unwrap_err();
        assert!(matches!(err, SyncError::Closed));
    }
}
