use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

/// Error kinds surfaced across the runtime plane (spec §7).
///
/// Store, bus, and session errors all normalize into this enum at the
/// boundary of their owning component; callers downstream never need to
/// match on the lower-level `sqlx::Error`/`async_nats` error types directly.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("device not connected")]
    DeviceNotConnected,

    #[error("timeout")]
    Timeout,

    #[error("canceled")]
    Canceled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            RelayError::Unauthorized => StatusCode::UNAUTHORIZED,
            RelayError::Forbidden => StatusCode::FORBIDDEN,
            RelayError::NotFound(_) => StatusCode::NOT_FOUND,
            RelayError::Conflict(_) => StatusCode::CONFLICT,
            RelayError::DeviceNotConnected => StatusCode::CONFLICT,
            RelayError::Timeout => StatusCode::REQUEST_TIMEOUT,
            // 499 is nginx's client-closed-request convention; axum has no
            // named constant for it, so it's spelled out explicitly.
            RelayError::Canceled => StatusCode::from_u16(499).unwrap(),
            RelayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    request_id: Uuid,
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        let body = ErrorBody {
            error: self.to_string(),
            request_id: Uuid::new_v4(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for RelayError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                RelayError::Conflict(db_err.message().to_string())
            }
            sqlx::Error::RowNotFound => RelayError::NotFound("row not found".to_string()),
            other => RelayError::Internal(other.to_string()),
        }
    }
}

impl From<async_nats::Error> for RelayError {
    fn from(err: async_nats::Error) -> Self {
        RelayError::Internal(err.to_string())
    }
}

impl From<crate::frame::FrameError> for RelayError {
    fn from(err: crate::frame::FrameError) -> Self {
        RelayError::Internal(format!("malformed frame: {err}"))
    }
}
