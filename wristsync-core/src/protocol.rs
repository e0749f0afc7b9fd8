//! WristSync wire protocol: message types and version.

use serde::{Deserialize, Serialize};

use crate::entity::ExerciseEntity;
use crate::error::{AppError, NetworkError};

/// Current protocol version. Exchanged in the transport handshake.
pub const PROTOCOL_VERSION: u8 = 1;

/// Correlates a reply with the request that caused it. Monotonic per requesting session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which [`AppError`] variant a reply error came from, so the requester can rebuild it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NoConnection,
    Timeout,
    Network,
    Decoding,
    /// Also assumed when a peer sends `error` without a kind.
    #[default]
    Unknown,
}

/// Reply body: either the exercises or an error message, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exercises: Option<Vec<ExerciseEntity>>,
    /// The error's own message, without the variant's display prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl ReplyBody {
    pub fn from_result(result: Result<Vec<ExerciseEntity>, AppError>) -> Self {
        match result {
            Ok(exercises) => ReplyBody {
                exercises: Some(exercises),
                error: None,
                error_kind: None,
            },
            Err(e) => {
                let (kind, message) = match e {
                    AppError::Network(NetworkError::NoConnection) => {
                        (ErrorKind::NoConnection, NetworkError::NoConnection.to_string())
                    }
                    AppError::Network(NetworkError::Timeout) => {
                        (ErrorKind::Timeout, NetworkError::Timeout.to_string())
                    }
                    AppError::Network(NetworkError::Underlying(m)) => (ErrorKind::Network, m),
                    AppError::Decoding(m) => (ErrorKind::Decoding, m),
                    AppError::Unknown(m) => (ErrorKind::Unknown, m),
                };
                ReplyBody {
                    exercises: None,
                    error: Some(message),
                    error_kind: Some(kind),
                }
            }
        }
    }

    /// Rebuilds the peer's `AppError`; a body with neither key is a decoding failure.
    pub fn into_result(self) -> Result<Vec<ExerciseEntity>, AppError> {
        match (self.exercises, self.error) {
            (_, Some(message)) => Err(match self.error_kind.unwrap_or_default() {
                ErrorKind::NoConnection => NetworkError::NoConnection.into(),
                ErrorKind::Timeout => NetworkError::Timeout.into(),
                ErrorKind::Network => NetworkError::Underlying(message).into(),
                ErrorKind::Decoding => AppError::Decoding(message),
                ErrorKind::Unknown => AppError::Unknown(message),
            }),
            (Some(exercises), None) => Ok(exercises),
            (None, None) => Err(AppError::Decoding(
                "reply carries neither exercises nor error".to_string(),
            )),
        }
    }
}

/// All wire message types. Encoding is JSON tagged by `type`; framing is length-prefix (see wire module).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Liveness probe; answered with `Pong`.
    Ping,
    Pong,
    /// Ask the serving device for its most recently used exercises.
    RecentExercisesRequest { request_id: RequestId, limit: u32 },
    RecentExercisesReply {
        request_id: RequestId,
        #[serde(flatten)]
        body: ReplyBody,
    },
    /// Search the serving device's exercises by name. `None` lists everything.
    SearchExercisesRequest {
        request_id: RequestId,
        #[serde(default)]
        query: Option<String>,
        limit: u32,
    },
    SearchExercisesReply {
        request_id: RequestId,
        #[serde(flatten)]
        body: ReplyBody,
    },
}

impl Message {
    /// Tag as it appears on the wire; used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Ping => "ping",
            Message::Pong => "pong",
            Message::RecentExercisesRequest { .. } => "recent_exercises_request",
            Message::RecentExercisesReply { .. } => "recent_exercises_reply",
            Message::SearchExercisesRequest { .. } => "search_exercises_request",
            Message::SearchExercisesReply { .. } => "search_exercises_reply",
        }
    }
}
