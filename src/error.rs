// src/error.rs

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Global Application Error Enum.
/// Centralizes error handling and mapping to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    // 500 Internal Server Error
    InternalServerError(String),

    // 400 Bad Request
    BadRequest(String),

    // 401 Unauthorized
    AuthError(String),

    // 404 Not Found
    NotFound(String),

    // 409 Conflict (e.g., mutating a submitted attempt)
    Conflict(String),

    // 503 Service Unavailable (remote store unreachable)
    ServiceUnavailable(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for AppError {}

/// Implements `IntoResponse` for `AppError`.
/// Converts the error into a JSON response with appropriate HTTP status code.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::AuthError(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::ServiceUnavailable(msg) => {
                tracing::warn!("Remote store unavailable: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Could not reach the exam server. Check your connection and try again."
                        .to_string(),
                )
            }
        };
        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Converts `sqlx::Error` into `AppError`.
/// Pool exhaustion and I/O failures are transient, everything else is internal.
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed => {
                AppError::ServiceUnavailable(err.to_string())
            }
            _ => AppError::InternalServerError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

/// Why a submission attempt did not produce an attempt record.
///
/// Every variant except `AlreadySubmitted` leaves the session in progress so
/// the student can retry or acknowledge and leave.
#[derive(Debug)]
pub enum SubmitError {
    /// Another submission already holds the session.
    AlreadySubmitted,
    QuizNotFound(i64),
    MaxAttemptsReached { max_attempts: i64 },
    NotYetOpen,
    WindowClosed,
    /// The attempt record write did not confirm within its bound.
    WriteTimedOut,
    /// The whole sequence exceeded the guard.
    TakingTooLong,
    /// Remote store failure while validating or writing.
    Store(AppError),
}

impl SubmitError {
    /// Stable machine-readable reason code.
    pub fn reason(&self) -> &'static str {
        match self {
            SubmitError::AlreadySubmitted => "already_submitted",
            SubmitError::QuizNotFound(_) => "quiz_not_found",
            SubmitError::MaxAttemptsReached { .. } => "max_attempts_reached",
            SubmitError::NotYetOpen => "not_yet_open",
            SubmitError::WindowClosed => "window_closed",
            SubmitError::WriteTimedOut => "write_timed_out",
            SubmitError::TakingTooLong => "taking_too_long",
            SubmitError::Store(_) => "store_unavailable",
        }
    }

    /// Message shown to the student: what happened and what to do.
    pub fn user_message(&self) -> String {
        match self {
            SubmitError::AlreadySubmitted => {
                "This exam has already been submitted.".to_string()
            }
            SubmitError::QuizNotFound(_) => {
                "This quiz no longer exists. Please contact your teacher.".to_string()
            }
            SubmitError::MaxAttemptsReached { max_attempts } => format!(
                "You have reached the maximum of {} attempt(s) for this quiz. Your answers were not recorded.",
                max_attempts
            ),
            SubmitError::NotYetOpen => {
                "This quiz is not open yet. Please wait for the start time.".to_string()
            }
            SubmitError::WindowClosed => {
                "The submission window for this quiz has closed. Please contact your teacher."
                    .to_string()
            }
            SubmitError::WriteTimedOut => {
                "Saving your submission timed out. Check your internet connection and press submit again."
                    .to_string()
            }
            SubmitError::TakingTooLong => {
                "Submission is taking too long. Check your internet connection and try again."
                    .to_string()
            }
            SubmitError::Store(_) => {
                "Could not reach the exam server. Your answers are saved locally; try submitting again."
                    .to_string()
            }
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            SubmitError::AlreadySubmitted => StatusCode::CONFLICT,
            SubmitError::QuizNotFound(_) => StatusCode::NOT_FOUND,
            SubmitError::MaxAttemptsReached { .. }
            | SubmitError::NotYetOpen
            | SubmitError::WindowClosed => StatusCode::FORBIDDEN,
            SubmitError::WriteTimedOut | SubmitError::TakingTooLong => {
                StatusCode::GATEWAY_TIMEOUT
            }
            SubmitError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::Store(err) => write!(f, "store failure: {}", err),
            SubmitError::QuizNotFound(id) => write!(f, "quiz {} not found", id),
            other => f.write_str(other.reason()),
        }
    }
}

impl std::error::Error for SubmitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SubmitError::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<AppError> for SubmitError {
    fn from(err: AppError) -> Self {
        SubmitError::Store(err)
    }
}

impl IntoResponse for SubmitError {
    fn into_response(self) -> Response {
        if let SubmitError::Store(err) = &self {
            tracing::error!("Submission store failure: {}", err);
        }
        let body = Json(json!({
            "error": self.user_message(),
            "reason": self.reason(),
        }));

        (self.status(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_error_messages_are_actionable() {
        let err = SubmitError::MaxAttemptsReached { max_attempts: 2 };
        assert_eq!(err.reason(), "max_attempts_reached");
        assert!(err.user_message().contains("2 attempt"));

        let err = SubmitError::Store(AppError::ServiceUnavailable("connection reset".into()));
        assert!(!err.user_message().contains("connection reset"));
    }

    #[test]
    fn test_submit_error_status_codes() {
        assert_eq!(SubmitError::AlreadySubmitted.status(), StatusCode::CONFLICT);
        assert_eq!(SubmitError::WindowClosed.status(), StatusCode::FORBIDDEN);
        assert_eq!(SubmitError::WriteTimedOut.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
