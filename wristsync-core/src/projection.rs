//! Result state projection: maps the asynchronous reply stream into the state a screen renders.
//!
//! `Idle -> Loading -> {Success, Failure}`. A new fetch goes straight back to `Loading`.
//! Fetching while the peer is unreachable fails immediately with `NoConnection` and sends
//! nothing. Replies are matched on request id; a reply for a superseded request is dropped.
//!
//! State is owned by the view model and only changes through `&mut self`, so it stays on
//! whichever task drives the screen.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

use crate::entity::ExerciseEntity;
use crate::error::{AppError, NetworkError};
use crate::protocol::RequestId;
use crate::session::{ExercisesEvent, SessionSyncRepository};
use crate::usecase::{RequestRecentExercisesUseCase, RequestSearchExercisesUseCase};

/// Default bound on how long a screen waits for the peer.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ResultState<T, E> {
    #[default]
    Idle,
    Loading,
    Success(T),
    Failure(E),
}

impl<T, E> ResultState<T, E> {
    pub fn is_loading(&self) -> bool {
        matches!(self, ResultState::Loading)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            ResultState::Success(v) => Some(v),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&E> {
        match self {
            ResultState::Failure(e) => Some(e),
            _ => None,
        }
    }

    /// A failed cycle offers the user a retry.
    pub fn can_retry(&self) -> bool {
        matches!(self, ResultState::Failure(_))
    }
}

pub type ExercisesState = ResultState<Vec<ExerciseEntity>, AppError>;

/// Shared state machine behind the exercise view models.
struct Projection {
    events: broadcast::Receiver<ExercisesEvent>,
    state: ExercisesState,
    pending: Option<RequestId>,
}

impl Projection {
    fn new(events: broadcast::Receiver<ExercisesEvent>) -> Self {
        Self {
            events,
            state: ResultState::Idle,
            pending: None,
        }
    }

    fn begin(&mut self, reachable: bool, issue: impl FnOnce() -> RequestId) {
        if !reachable {
            self.pending = None;
            self.state = ResultState::Failure(NetworkError::NoConnection.into());
            return;
        }
        self.state = ResultState::Loading;
        self.pending = Some(issue());
        // The transport may have published a send failure synchronously.
        self.drain();
    }

    /// Returns true when the event resolved the pending request.
    fn apply(&mut self, event: ExercisesEvent) -> bool {
        if self.pending != Some(event.request_id) {
            tracing::warn!(
                request_id = %event.request_id,
                pending = ?self.pending,
                "stale reply ignored"
            );
            return false;
        }
        self.pending = None;
        self.state = match event.result {
            Ok(exercises) => ResultState::Success(exercises),
            Err(e) => ResultState::Failure(e),
        };
        true
    }

    fn drain(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    self.apply(event);
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "result stream lagged");
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Closed) => {
                    self.fail_closed();
                    break;
                }
            }
        }
    }

    fn fail_closed(&mut self) {
        if self.pending.take().is_some() {
            self.state = ResultState::Failure(
                NetworkError::Underlying("result stream closed".to_string()).into(),
            );
        }
    }

    async fn wait(&mut self, timeout: Duration) {
        if self.pending.is_none() {
            return;
        }
        let outcome = tokio::time::timeout(timeout, async {
            loop {
                match self.events.recv().await {
                    Ok(event) => {
                        if self.apply(event) {
                            return;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "result stream lagged");
                    }
                    Err(RecvError::Closed) => {
                        self.fail_closed();
                        return;
                    }
                }
            }
        })
        .await;
        if outcome.is_err() {
            tracing::warn!(pending = ?self.pending, ?timeout, "no reply before timeout");
            self.pending = None;
            self.state = ResultState::Failure(NetworkError::Timeout.into());
        }
    }
}

/// Screen-level state for "recent exercises" on the requesting device.
pub struct RecentExercisesViewModel {
    session: Arc<dyn SessionSyncRepository>,
    request: RequestRecentExercisesUseCase,
    projection: Projection,
    limit: u32,
}

impl RecentExercisesViewModel {
    /// Subscribes to the result stream immediately so no reply is missed.
    pub fn new(session: Arc<dyn SessionSyncRepository>, limit: u32) -> Self {
        let events = session.recent_exercises();
        Self {
            request: RequestRecentExercisesUseCase::new(session.clone()),
            session,
            projection: Projection::new(events),
            limit,
        }
    }

    pub fn state(&self) -> &ExercisesState {
        &self.projection.state
    }

    pub fn pending_request(&self) -> Option<RequestId> {
        self.projection.pending
    }

    pub fn fetch(&mut self) {
        let reachable = self.session.is_reachable();
        let limit = self.limit;
        let request = &self.request;
        self.projection.begin(reachable, || request.execute(limit));
    }

    /// Apply whatever has already arrived without waiting.
    pub fn poll(&mut self) {
        self.projection.drain();
    }

    /// Wait for the pending request to resolve, failing with `Timeout` after `timeout`.
    pub async fn wait_for_reply(&mut self, timeout: Duration) -> &ExercisesState {
        self.projection.wait(timeout).await;
        &self.projection.state
    }

    /// User-visible message when the last cycle failed.
    pub fn error_message(&self) -> Option<String> {
        self.projection.state.error().map(AppError::user_message)
    }
}

/// Screen-level state for exercise search on the requesting device.
pub struct SearchExercisesViewModel {
    session: Arc<dyn SessionSyncRepository>,
    request: RequestSearchExercisesUseCase,
    projection: Projection,
    limit: u32,
}

impl SearchExercisesViewModel {
    pub fn new(session: Arc<dyn SessionSyncRepository>, limit: u32) -> Self {
        let events = session.search_results();
        Self {
            request: RequestSearchExercisesUseCase::new(session.clone()),
            session,
            projection: Projection::new(events),
            limit,
        }
    }

    pub fn state(&self) -> &ExercisesState {
        &self.projection.state
    }

    pub fn search(&mut self, query: Option<String>) {
        let reachable = self.session.is_reachable();
        let limit = self.limit;
        let request = &self.request;
        self.projection
            .begin(reachable, move || request.execute(query, limit));
    }

    pub fn poll(&mut self) {
        self.projection.drain();
    }

    pub async fn wait_for_reply(&mut self, timeout: Duration) -> &ExercisesState {
        self.projection.wait(timeout).await;
        &self.projection.state
    }

    pub fn error_message(&self) -> Option<String> {
        self.projection.state.error().map(AppError::user_message)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;
    use crate::entity::Locale;
    use crate::relay::{loopback_pair, pump_inbound, Activatable, InboundDispatcher};
    use crate::repository::InMemoryExerciseRepository;
    use crate::session::SessionSync;
    use crate::usecase::ExerciseRequestHandler;

    /// Session double: counts sends and lets the test publish events by hand.
    struct FakeSession {
        reachable: AtomicBool,
        sends: AtomicUsize,
        tx: broadcast::Sender<ExercisesEvent>,
    }

    impl FakeSession {
        fn new(reachable: bool) -> Arc<Self> {
            let (tx, _) = broadcast::channel(8);
            Arc::new(Self {
                reachable: AtomicBool::new(reachable),
                sends: AtomicUsize::new(0),
                tx,
            })
        }

        fn reply(&self, request_id: RequestId, result: Result<Vec<ExerciseEntity>, AppError>) {
            self.tx.send(ExercisesEvent { request_id, result }).unwrap();
        }
    }

    impl SessionSyncRepository for FakeSession {
        fn is_reachable(&self) -> bool {
            self.reachable.load(Ordering::SeqCst)
        }

        fn request_recent_exercises(&self, _limit: u32) -> RequestId {
            RequestId(self.sends.fetch_add(1, Ordering::SeqCst) as u64 + 1)
        }

        fn recent_exercises(&self) -> broadcast::Receiver<ExercisesEvent> {
            self.tx.subscribe()
        }

        fn request_search_exercises(&self, _query: Option<String>, _limit: u32) -> RequestId {
            RequestId(self.sends.fetch_add(1, Ordering::SeqCst) as u64 + 1)
        }

        fn search_results(&self) -> broadcast::Receiver<ExercisesEvent> {
            self.tx.subscribe()
        }
    }

    fn two_exercises() -> Vec<ExerciseEntity> {
        vec![
            ExerciseEntity::new("e1", "Pull Up"),
            ExerciseEntity::new("e2", "Push Up"),
        ]
    }

    #[test]
    fn unreachable_fetch_fails_without_sending() {
        let session = FakeSession::new(false);
        let mut vm = RecentExercisesViewModel::new(session.clone(), 10);
        vm.fetch();
        assert_eq!(
            vm.state(),
            &ResultState::Failure(NetworkError::NoConnection.into())
        );
        assert_eq!(session.sends.load(Ordering::SeqCst), 0);
        assert!(vm.state().can_retry());
        assert!(vm.error_message().is_some());
    }

    #[test]
    fn reachable_fetch_goes_idle_loading_success() {
        let session = FakeSession::new(true);
        let mut vm = RecentExercisesViewModel::new(session.clone(), 10);
        assert_eq!(vm.state(), &ResultState::Idle);
        vm.fetch();
        assert!(vm.state().is_loading());
        let id = vm.pending_request().unwrap();
        session.reply(id, Ok(two_exercises()));
        vm.poll();
        assert_eq!(vm.state(), &ResultState::Success(two_exercises()));
        assert_eq!(vm.pending_request(), None);
    }

    #[test]
    fn stream_error_maps_to_failure() {
        let session = FakeSession::new(true);
        let mut vm = RecentExercisesViewModel::new(session.clone(), 10);
        vm.fetch();
        let id = vm.pending_request().unwrap();
        session.reply(id, Err(AppError::Unknown("phone store failed".into())));
        vm.poll();
        assert_eq!(
            vm.state(),
            &ResultState::Failure(AppError::Unknown("phone store failed".into()))
        );
    }

    #[test]
    fn refetch_returns_to_loading_directly() {
        let session = FakeSession::new(true);
        let mut vm = RecentExercisesViewModel::new(session.clone(), 10);
        vm.fetch();
        session.reply(vm.pending_request().unwrap(), Ok(vec![]));
        vm.poll();
        assert!(vm.state().value().is_some());
        vm.fetch();
        assert!(vm.state().is_loading());
    }

    // Without correlation a late reply to the first fetch would resolve the second one.
    #[test]
    fn stale_reply_for_superseded_request_is_ignored() {
        let session = FakeSession::new(true);
        let mut vm = RecentExercisesViewModel::new(session.clone(), 10);
        vm.fetch();
        let first = vm.pending_request().unwrap();
        vm.fetch();
        let second = vm.pending_request().unwrap();
        assert_ne!(first, second);

        session.reply(first, Ok(vec![ExerciseEntity::new("old", "Old")]));
        vm.poll();
        assert!(vm.state().is_loading());

        session.reply(second, Ok(two_exercises()));
        vm.poll();
        assert_eq!(vm.state(), &ResultState::Success(two_exercises()));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_reply_times_out() {
        let session = FakeSession::new(true);
        let mut vm = RecentExercisesViewModel::new(session.clone(), 10);
        vm.fetch();
        let state = vm.wait_for_reply(Duration::from_secs(3)).await;
        assert_eq!(state, &ResultState::Failure(NetworkError::Timeout.into()));
    }

    #[tokio::test]
    async fn wait_without_pending_request_returns_current_state() {
        let session = FakeSession::new(false);
        let mut vm = RecentExercisesViewModel::new(session, 10);
        vm.fetch();
        let state = vm.wait_for_reply(Duration::from_millis(1)).await;
        assert!(state.error().unwrap().is_no_connection());
    }

    #[tokio::test]
    async fn end_to_end_over_loopback() {
        let (phone, watch) = loopback_pair();
        phone.transport.activate();
        watch.transport.activate();

        let repo = Arc::new(InMemoryExerciseRepository::new(two_exercises()));
        let handler = Arc::new(ExerciseRequestHandler::new(repo, Locale::default()));
        tokio::spawn(pump_inbound(
            phone.inbound,
            InboundDispatcher::new().with_handler(handler),
            phone.transport.clone(),
        ));

        let session = Arc::new(SessionSync::new(watch.transport.clone()));
        tokio::spawn(pump_inbound(
            watch.inbound,
            InboundDispatcher::new().with_session(session.clone()),
            watch.transport.clone(),
        ));

        let mut vm = RecentExercisesViewModel::new(session, 5);
        vm.fetch();
        assert!(vm.state().is_loading());
        let state = vm.wait_for_reply(Duration::from_secs(5)).await;
        let names: Vec<&str> = state.value().unwrap().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["Pull Up", "Push Up"]);
    }

    #[tokio::test]
    async fn search_end_to_end_over_loopback() {
        let (phone, watch) = loopback_pair();
        phone.transport.activate();
        watch.transport.activate();

        let repo = Arc::new(InMemoryExerciseRepository::new(two_exercises()));
        let handler = Arc::new(ExerciseRequestHandler::new(repo, Locale::default()));
        tokio::spawn(pump_inbound(
            phone.inbound,
            InboundDispatcher::new().with_handler(handler),
            phone.transport.clone(),
        ));
        let session = Arc::new(SessionSync::new(watch.transport.clone()));
        tokio::spawn(pump_inbound(
            watch.inbound,
            InboundDispatcher::new().with_session(session.clone()),
            watch.transport.clone(),
        ));

        let mut vm = SearchExercisesViewModel::new(session, 5);
        vm.search(Some("push".to_string()));
        let state = vm.wait_for_reply(Duration::from_secs(5)).await;
        assert_eq!(state.value().unwrap().len(), 1);
        assert_eq!(state.value().unwrap()[0].id, "e2");
    }

    #[test]
    fn link_drop_fails_fetch_and_direct_requests() {
        let (phone, watch) = loopback_pair();
        phone.transport.activate();
        watch.transport.activate();
        let session = Arc::new(SessionSync::new(watch.transport.clone()));
        let mut vm = RecentExercisesViewModel::new(session.clone(), 5);
        watch.transport.set_link_up(false);
        // Reachability is re-checked by fetch, so the failure is immediate.
        vm.fetch();
        assert!(vm.state().error().unwrap().is_no_connection());
        // A request sent directly while unreachable is reported on the stream.
        let mut rx = session.recent_exercises();
        let id = session.request_recent_exercises(5);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.request_id, id);
        assert!(event.result.unwrap_err().is_no_connection());
    }
}
