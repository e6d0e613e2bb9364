use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::error::AppError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Serialize, Clone)]
pub enum ApiError {
    #[error("Internal server error")]
    InternalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    DatasetUnavailable(String),
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::NotFound(msg) => Self::NotFound(msg),
            AppError::Validation(msg) => Self::ValidationError(msg),
            AppError::DatasetMissing(_) => Self::DatasetUnavailable(err.to_string()),
            _ => {
                tracing::error!("Internal error: {:?}", err);
                Self::InternalError("Internal server error".to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match self {
            Self::InternalError(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse {
                    error: message,
                    status: "error".to_string(),
                },
            ),
            Self::ValidationError(message) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: message,
                    status: "error".to_string(),
                },
            ),
            Self::NotFound(message) => (
                StatusCode::NOT_FOUND,
                ErrorResponse {
                    error: message,
                    status: "error".to_string(),
                },
            ),
            Self::DatasetUnavailable(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse {
                    error: message,
                    status: "error".to_string(),
                },
            ),
        };

        (status, Json(error_response)).into_response()
    }
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    error: String,
    status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of<T: IntoResponse>(response: T) -> StatusCode {
        response.into_response().status()
    }

    #[test]
    fn test_app_error_conversion() {
        let missing = AppError::DatasetMissing("notices".to_string());
        let api_error = ApiError::from(missing);
        assert!(
            matches!(api_error, ApiError::DatasetUnavailable(msg) if msg == "Dataset 'notices' unavailable")
        );

        let validation = AppError::Validation("질문이 비어 있습니다.".to_string());
        assert!(matches!(
            ApiError::from(validation),
            ApiError::ValidationError(_)
        ));

        let internal = AppError::InternalError("db password leaked".to_string());
        let api_error = ApiError::from(internal);
        assert!(matches!(api_error, ApiError::InternalError(msg) if msg == "Internal server error"));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            status_of(ApiError::ValidationError("bad".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(ApiError::NotFound("missing".to_string())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(ApiError::DatasetUnavailable("Dataset 'rules' unavailable".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(ApiError::InternalError("x".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
