//! Session sync repository: typed capabilities over the relay's message dispatch.
//!
//! Requests are fire-and-forget. Results arrive later on a broadcast stream per request kind,
//! one event per completed request. Streams do not replay: subscribe before requesting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::entity::ExerciseEntity;
use crate::error::{AppError, NetworkError};
use crate::protocol::{Message, RequestId};
use crate::relay::{MessageTransport, SendError};

const STREAM_CAPACITY: usize = 16;

pub type ExercisesResult = Result<Vec<ExerciseEntity>, AppError>;

/// One completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExercisesEvent {
    pub request_id: RequestId,
    pub result: ExercisesResult,
}

/// Capability facade the requesting device programs against.
pub trait SessionSyncRepository: Send + Sync {
    fn is_reachable(&self) -> bool;

    /// Issue a request; the outcome is published on [`recent_exercises`](Self::recent_exercises).
    fn request_recent_exercises(&self, limit: u32) -> RequestId;

    fn recent_exercises(&self) -> broadcast::Receiver<ExercisesEvent>;

    fn request_search_exercises(&self, query: Option<String>, limit: u32) -> RequestId;

    fn search_results(&self) -> broadcast::Receiver<ExercisesEvent>;
}

/// [`SessionSyncRepository`] backed by a [`MessageTransport`].
pub struct SessionSync {
    transport: Arc<dyn MessageTransport>,
    next_id: AtomicU64,
    recent_tx: broadcast::Sender<ExercisesEvent>,
    search_tx: broadcast::Sender<ExercisesEvent>,
}

impl SessionSync {
    pub fn new(transport: Arc<dyn MessageTransport>) -> Self {
        let (recent_tx, _) = broadcast::channel(STREAM_CAPACITY);
        let (search_tx, _) = broadcast::channel(STREAM_CAPACITY);
        Self {
            transport,
            next_id: AtomicU64::new(1),
            recent_tx,
            search_tx,
        }
    }

    fn allocate_id(&self) -> RequestId {
        RequestId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn send_or_publish(
        &self,
        message: Message,
        request_id: RequestId,
        stream: &broadcast::Sender<ExercisesEvent>,
    ) {
        if let Err(e) = self.transport.send(message) {
            tracing::warn!(%request_id, error = %e, "request not sent");
            let error = match e {
                SendError::Unreachable => NetworkError::NoConnection,
                other => NetworkError::Underlying(other.to_string()),
            };
            publish(
                stream,
                ExercisesEvent {
                    request_id,
                    result: Err(error.into()),
                },
            );
        }
    }

    /// Feed a reply received from the peer. Non-reply messages are ignored.
    pub fn on_message(&self, message: Message) {
        let (stream, request_id, body) = match message {
            Message::RecentExercisesReply { request_id, body } => {
                (&self.recent_tx, request_id, body)
            }
            Message::SearchExercisesReply { request_id, body } => {
                (&self.search_tx, request_id, body)
            }
            other => {
                tracing::debug!(kind = other.kind(), "not a reply; ignored");
                return;
            }
        };
        publish(
            stream,
            ExercisesEvent {
                request_id,
                result: body.into_result(),
            },
        );
    }
}

fn publish(stream: &broadcast::Sender<ExercisesEvent>, event: ExercisesEvent) {
    let request_id = event.request_id;
    if stream.send(event).is_err() {
        tracing::debug!(%request_id, "no subscribers; result dropped");
    }
}

impl SessionSyncRepository for SessionSync {
    fn is_reachable(&self) -> bool {
        self.transport.is_reachable()
    }

    fn request_recent_exercises(&self, limit: u32) -> RequestId {
        let request_id = self.allocate_id();
        self.send_or_publish(
            Message::RecentExercisesRequest { request_id, limit },
            request_id,
            &self.recent_tx,
        );
        request_id
    }

    fn recent_exercises(&self) -> broadcast::Receiver<ExercisesEvent> {
        self.recent_tx.subscribe()
    }

    fn request_search_exercises(&self, query: Option<String>, limit: u32) -> RequestId {
        let request_id = self.allocate_id();
        self.send_or_publish(
            Message::SearchExercisesRequest {
                request_id,
                query,
                limit,
            },
            request_id,
            &self.search_tx,
        );
        request_id
    }

    fn search_results(&self) -> broadcast::Receiver<ExercisesEvent> {
        self.search_tx.subscribe()
    }
}
