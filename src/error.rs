//! The single place failures become HTTP responses.
//!
//! Handlers return `Result<_, ApiError>` and use `?`; classification and
//! translation happen here, once.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::db::DbError;
use crate::lifecycle::LifecycleError;
use crate::tasks::QueueError;
use crate::translate::{TranslatedError, translate};

pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";
pub const NOT_READY_MESSAGE: &str = "Service is not ready, please try again";

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Database(#[from] DbError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("method not allowed")]
    MethodNotAllowed,
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    fn to_translated(&self) -> TranslatedError {
        match self {
            Self::Database(err) => translate(err).unwrap_or_else(|| {
                tracing::error!(error = %err, "untranslated database error");
                internal_error()
            }),
            Self::Lifecycle(LifecycleError::NotStarted) => TranslatedError {
                status: StatusCode::SERVICE_UNAVAILABLE,
                message: NOT_READY_MESSAGE.to_string(),
            },
            Self::Lifecycle(err) => {
                tracing::error!(error = %err, "resource lifecycle error");
                internal_error()
            }
            Self::Queue(err) => {
                tracing::warn!(error = %err, "task queue rejected job");
                TranslatedError {
                    status: StatusCode::SERVICE_UNAVAILABLE,
                    message: err.to_string(),
                }
            }
            Self::NotFound(message) => TranslatedError {
                status: StatusCode::NOT_FOUND,
                message: message.clone(),
            },
            Self::BadRequest(message) => TranslatedError {
                status: StatusCode::BAD_REQUEST,
                message: message.clone(),
            },
            Self::MethodNotAllowed => TranslatedError {
                status: StatusCode::METHOD_NOT_ALLOWED,
                message: self.to_string(),
            },
        }
    }
}

fn internal_error() -> TranslatedError {
    TranslatedError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: INTERNAL_ERROR_MESSAGE.to_string(),
    }
}

impl IntoResponse for TranslatedError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            message: self.message,
        });
        (self.status, body).into_response()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.to_translated().into_response()
    }
}

/// Response for a handler that panicked. Used by the panic-catching layer so
/// the process keeps serving.
pub fn panic_response(_: Box<dyn std::any::Any + Send + 'static>) -> Response {
    tracing::error!("handler panicked");
    internal_error().into_response()
}
