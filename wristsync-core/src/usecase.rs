//! Request/handle use cases on either side of the relay.
//!
//! The requesting device only forwards to its [`SessionSyncRepository`]; the serving device
//! answers from its local [`ExerciseRepository`]. Either side can be tested without a transport.

use std::sync::Arc;

use crate::entity::{ExerciseEntity, Locale};
use crate::error::AppError;
use crate::protocol::{Message, ReplyBody, RequestId};
use crate::repository::ExerciseRepository;
use crate::session::SessionSyncRepository;

pub struct RequestRecentExercisesUseCase {
    repository: Arc<dyn SessionSyncRepository>,
}

impl RequestRecentExercisesUseCase {
    pub fn new(repository: Arc<dyn SessionSyncRepository>) -> Self {
        Self { repository }
    }

    pub fn execute(&self, limit: u32) -> RequestId {
        self.repository.request_recent_exercises(limit)
    }
}

pub struct RequestSearchExercisesUseCase {
    repository: Arc<dyn SessionSyncRepository>,
}

impl RequestSearchExercisesUseCase {
    pub fn new(repository: Arc<dyn SessionSyncRepository>) -> Self {
        Self { repository }
    }

    pub fn execute(&self, query: Option<String>, limit: u32) -> RequestId {
        self.repository.request_search_exercises(query, limit)
    }
}

/// Serving side of a recent-exercises request.
pub struct HandleRecentExercisesRequestUseCase<R> {
    repository: Arc<R>,
    locale: Locale,
}

impl<R: ExerciseRepository> HandleRecentExercisesRequestUseCase<R> {
    /// Uses the device-local locale.
    pub fn new(repository: Arc<R>) -> Self {
        Self::with_locale(repository, Locale::current())
    }

    pub fn with_locale(repository: Arc<R>, locale: Locale) -> Self {
        Self { repository, locale }
    }

    /// Always starts at offset 0.
    pub fn execute(&self, limit: u32) -> Result<Vec<ExerciseEntity>, AppError> {
        self.repository
            .recent_exercises(limit as usize, 0, &self.locale)
            .map_err(AppError::wrap)
    }
}

pub struct HandleSearchExercisesRequestUseCase<R> {
    repository: Arc<R>,
    locale: Locale,
}

impl<R: ExerciseRepository> HandleSearchExercisesRequestUseCase<R> {
    pub fn new(repository: Arc<R>) -> Self {
        Self::with_locale(repository, Locale::current())
    }

    pub fn with_locale(repository: Arc<R>, locale: Locale) -> Self {
        Self { repository, locale }
    }

    pub fn execute(&self, query: Option<&str>, limit: u32) -> Result<Vec<ExerciseEntity>, AppError> {
        let mut hits = self
            .repository
            .search_exercises(query, &self.locale)
            .map_err(AppError::wrap)?;
        hits.truncate(limit as usize);
        Ok(hits)
    }
}

/// Answers inbound requests on the serving device.
pub trait RequestHandler: Send + Sync {
    /// `None` for messages that are not requests this handler serves.
    fn handle(&self, request: &Message) -> Option<Message>;
}

/// [`RequestHandler`] for the exercise requests, backed by one repository.
pub struct ExerciseRequestHandler<R> {
    recent: HandleRecentExercisesRequestUseCase<R>,
    search: HandleSearchExercisesRequestUseCase<R>,
}

impl<R: ExerciseRepository> ExerciseRequestHandler<R> {
    pub fn new(repository: Arc<R>, locale: Locale) -> Self {
        Self {
            recent: HandleRecentExercisesRequestUseCase::with_locale(
                repository.clone(),
                locale.clone(),
            ),
            search: HandleSearchExercisesRequestUseCase::with_locale(repository, locale),
        }
    }
}

impl<R: ExerciseRepository> RequestHandler for ExerciseRequestHandler<R> {
    fn handle(&self, request: &Message) -> Option<Message> {
        match request {
            Message::RecentExercisesRequest { request_id, limit } => {
                let result = self.recent.execute(*limit);
                if let Err(e) = &result {
                    tracing::warn!(%request_id, error = %e, "recent exercises failed");
                }
                Some(Message::RecentExercisesReply {
                    request_id: *request_id,
                    body: ReplyBody::from_result(result),
                })
            }
            Message::SearchExercisesRequest {
                request_id,
                query,
                limit,
            } => {
                let result = self.search.execute(query.as_deref(), *limit);
                if let Err(e) = &result {
                    tracing::warn!(%request_id, error = %e, "exercise search failed");
                }
                Some(Message::SearchExercisesReply {
                    request_id: *request_id,
                    body: ReplyBody::from_result(result),
                })
            }
            Message::Ping
            | Message::Pong
            | Message::RecentExercisesReply { .. }
            | Message::SearchExercisesReply { .. } => None,
        }
    }
}
