use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::orchestration::TaskError;
use crate::reduce::ServiceError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Internal server error: {0}")]
    Internal(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Busy(_) => AppError::Conflict(err.to_string()),
            ServiceError::Key(_) => AppError::BadRequest(err.to_string()),
            ServiceError::Store(_) | ServiceError::Reduce(_) => AppError::Internal(err.to_string()),
        }
    }
}

impl From<TaskError> for AppError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::Overlapping { .. } | TaskError::AlreadyRunning(_) => {
                AppError::Conflict(err.to_string())
            }
            TaskError::InvalidParam { .. } => AppError::BadRequest(err.to_string()),
            TaskError::UnknownTask(_)
            | TaskError::Service(_)
            | TaskError::Store(_)
            | TaskError::Chain(_) => AppError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_errors_map_to_status() {
        let overlap = AppError::from(TaskError::Overlapping {
            task_type: "BALANCE_REDUCE".to_string(),
            param: "{}".to_string(),
        });
        assert_eq!(overlap.into_response().status(), StatusCode::CONFLICT);

        let invalid = AppError::from(TaskError::invalid_param("x", "bad"));
        assert_eq!(invalid.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_busy_key_is_conflict() {
        let busy = AppError::from(ServiceError::Busy("0xt:0xo".to_string()));
        assert_eq!(busy.into_response().status(), StatusCode::CONFLICT);
    }
}
