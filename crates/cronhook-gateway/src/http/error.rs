//! Mapping from scheduler errors to HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use cronhook_scheduler::SchedulerError;
use serde_json::json;
use tracing::error;

/// Handler error: a [`SchedulerError`] rendered as `{"error", "code"}`.
pub struct ApiError(pub SchedulerError);

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            SchedulerError::JobNotFound { .. } => StatusCode::NOT_FOUND,
            SchedulerError::Validation(_) | SchedulerError::InvalidSchedule(_) => {
                StatusCode::BAD_REQUEST
            }
            SchedulerError::Conflict(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = self.0.code(), error = %self.0, "request failed");
        }
        let body = json!({ "error": self.0.to_string(), "code": self.0.code() });
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use cronhook_core::JobId;

    #[test]
    fn status_codes_follow_error_kind() {
        let cases = [
            (SchedulerError::JobNotFound { id: JobId(1) }, StatusCode::NOT_FOUND),
            (SchedulerError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (SchedulerError::Conflict("x".into()), StatusCode::CONFLICT),
            (SchedulerError::Transport("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError(err).into_response().status(), expected);
        }
    }
}
