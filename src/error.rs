use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::db::StoreError;
use crate::reminders::ReminderError;
use crate::reviews::{AggregateError, ReviewError};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Busy: {0}")]
    Busy(String),

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => AppError::NotFound(what),
            other => AppError::Store(other),
        }
    }
}

impl From<ReviewError> for AppError {
    fn from(e: ReviewError) -> Self {
        match e {
            ReviewError::Invalid(msg) => AppError::BadRequest(msg),
            ReviewError::Aggregate(e @ AggregateError::InvalidRating(_)) => {
                AppError::BadRequest(e.to_string())
            }
            ReviewError::Aggregate(e @ AggregateError::InvariantViolation(_)) => {
                AppError::Conflict(e.to_string())
            }
            e @ ReviewError::AggregationFailed { .. } => AppError::Busy(e.to_string()),
            ReviewError::NotFound(what) => AppError::NotFound(what),
            e @ ReviewError::NotAuthor => AppError::Forbidden(e.to_string()),
            e @ ReviewError::SelfReview => AppError::BadRequest(e.to_string()),
            ReviewError::Store(e) => AppError::from(e),
        }
    }
}

impl From<ReminderError> for AppError {
    fn from(e: ReminderError) -> Self {
        match e {
            ReminderError::InvalidEvent(msg) => AppError::BadRequest(msg),
            ReminderError::Store(e) => AppError::from(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(what) => (StatusCode::NOT_FOUND, format!("Not found: {}", what)),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Conflict(msg) => {
                tracing::error!("Rejected inconsistent review change: {}", msg);
                (StatusCode::CONFLICT, msg.clone())
            }
            AppError::Busy(msg) => {
                tracing::warn!("{}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, msg.clone())
            }
            AppError::Store(e) => {
                tracing::error!("Store error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    fn response_status(err: impl Into<AppError>) -> StatusCode {
        err.into().into_response().status()
    }

    #[test]
    fn not_found_returns_404() {
        assert_eq!(
            response_status(AppError::NotFound("review".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            response_status(StoreError::NotFound("review r1".into())),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn unauthorized_returns_401() {
        assert_eq!(
            response_status(AppError::Unauthorized),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn validation_errors_return_400() {
        assert_eq!(
            response_status(ReviewError::Invalid("comment too long".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            response_status(ReviewError::Aggregate(AggregateError::InvalidRating(9))),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            response_status(ReminderError::InvalidEvent("empty id".into())),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn invariant_violation_returns_409() {
        assert_eq!(
            response_status(ReviewError::Aggregate(AggregateError::InvariantViolation(
                "no 3-star reviews to remove".into()
            ))),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn non_author_returns_403() {
        assert_eq!(
            response_status(ReviewError::NotAuthor),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn exhausted_retries_return_503() {
        assert_eq!(
            response_status(ReviewError::AggregationFailed { attempts: 5 }),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn store_errors_return_500() {
        assert_eq!(
            response_status(ReviewError::Store(StoreError::Corrupt("bad row".into()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            response_status(ReminderError::Store(StoreError::Conflict("locked".into()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
