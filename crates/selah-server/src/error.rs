use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Internal server error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl AppError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(error: rusqlite::Error) -> Self {
        Self::Internal(error.to_string())
    }
}

impl From<selah_core::Error> for AppError {
    fn from(error: selah_core::Error) -> Self {
        match error {
            selah_core::Error::InvalidInput(message) => Self::BadRequest(message),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_invalid_input_maps_to_bad_request() {
        let error: AppError = selah_core::Error::InvalidInput("bad verse".to_string()).into();
        assert!(matches!(error, AppError::BadRequest(_)));
    }

    #[test]
    fn test_core_storage_error_maps_to_internal() {
        let error: AppError = selah_core::Error::NotFound("x".to_string()).into();
        assert!(matches!(error, AppError::Internal(_)));
    }

    #[test]
    fn test_sqlite_error_maps_to_internal() {
        let error: AppError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(error, AppError::Internal(_)));
    }
}
