use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("write conflict on {collection}/{id}: {field} changed")]
    Conflict {
        collection: String,
        id: String,
        field: String,
    },
    #[error("document {collection}/{id} not found")]
    NotFound { collection: String, id: String },
}

#[derive(Debug, Error)]
pub enum ChallengeError {
    #[error("{0}")]
    Precondition(String),
    #[error("{0}")]
    InvalidArgument(String),
    #[error("stale day: caller observed day {expected} but the challenge is on day {actual}")]
    StaleDay { expected: u32, actual: u32 },
    #[error("{0} not found")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ChallengeError {
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Another writer got there first.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::StaleDay { .. } | Self::Store(StoreError::Conflict { .. })
        )
    }
}

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<ChallengeError> for AppError {
    fn from(err: ChallengeError) -> Self {
        let status = match &err {
            ChallengeError::Precondition(_) | ChallengeError::StaleDay { .. } => StatusCode::CONFLICT,
            ChallengeError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ChallengeError::NotFound(_) => StatusCode::NOT_FOUND,
            ChallengeError::Store(StoreError::Conflict { .. }) => StatusCode::CONFLICT,
            ChallengeError::Store(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
            ChallengeError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        ChallengeError::from(err).into()
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        (self.status, self.message).into_response()
    }
}
