//! Application error taxonomy. Everything that reaches a view model is an [`AppError`].

/// Transport-level failure reasons.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    #[error("the paired device is not reachable")]
    NoConnection,
    #[error("the paired device did not reply in time")]
    Timeout,
    #[error("{0}")]
    Underlying(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AppError {
    #[error("network error: {0}")]
    Network(#[from] NetworkError),
    #[error("could not decode data: {0}")]
    Decoding(String),
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl AppError {
    /// Re-wrap a lower-layer failure. An `AppError` passes through unchanged, anything else
    /// becomes `Unknown` carrying its message.
    pub fn wrap<E>(err: E) -> AppError
    where
        E: std::error::Error + 'static,
    {
        let any: &dyn std::any::Any = &err;
        match any.downcast_ref::<AppError>() {
            Some(app) => app.clone(),
            None => AppError::Unknown(err.to_string()),
        }
    }

    pub fn is_no_connection(&self) -> bool {
        matches!(self, AppError::Network(NetworkError::NoConnection))
    }

    /// Message shown to the user alongside a retry affordance.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Network(NetworkError::NoConnection) => {
                "Your phone is not reachable. Open the app on your phone and try again.".to_string()
            }
            AppError::Network(NetworkError::Timeout) => {
                "Your phone took too long to answer. Try again.".to_string()
            }
            AppError::Network(NetworkError::Underlying(msg)) => {
                format!("Connection problem: {msg}")
            }
            AppError::Decoding(_) => "Received data could not be read.".to_string(),
            AppError::Unknown(msg) => format!("Something went wrong: {msg}"),
        }
    }
}
