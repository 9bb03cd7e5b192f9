use crate::date_key::DateKey;
use axum::http::StatusCode;
use thiserror::Error;

/// Failures surfaced by the tracking core.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDateFormat(String),

    #[error("field '{0}' is reserved")]
    ReservedField(String),

    #[error("item '{id}' not found in {scope}")]
    ItemNotFound { scope: String, id: String },

    /// Read miss. Callers recover it locally as an empty record.
    #[error("no record for {0}")]
    RecordNotFound(DateKey),

    #[error("sync failed for {key}: {source}")]
    SyncFailed {
        key: DateKey,
        #[source]
        source: TransportError,
    },

    /// Out-of-order response for a superseded mutation. Never leaves the coordinator.
    #[error("stale response for {key} (sequence {seq})")]
    StaleResponse { key: DateKey, seq: u64 },

    /// A read against the persistence service failed.
    #[error("fetch failed: {0}")]
    FetchFailed(#[from] TransportError),

    #[error("pending mutation for {0} was cancelled")]
    Cancelled(DateKey),

    #[error("cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },
}

impl TrackerError {
    pub fn item_not_found(scope: impl std::fmt::Display, id: impl Into<String>) -> Self {
        Self::ItemNotFound {
            scope: scope.to_string(),
            id: id.into(),
        }
    }
}

/// Failures talking to the persistence service.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("resource not found")]
    NotFound,

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Error body returned by the reference service.
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

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn internal(err: impl std::error::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::internal(err)
    }
}

impl From<TrackerError> for AppError {
    fn from(err: TrackerError) -> Self {
        match err {
            TrackerError::InvalidDateFormat(_) | TrackerError::ReservedField(_) => {
                Self::bad_request(err.to_string())
            }
            TrackerError::ItemNotFound { .. } | TrackerError::RecordNotFound(_) => {
                Self::not_found(err.to_string())
            }
            other => Self::internal(other),
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        (self.status, self.message).into_response()
    }
}
