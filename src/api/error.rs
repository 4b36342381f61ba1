use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::scheduler::SchedulerError;
use crate::session::SessionError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("missing or unknown session")]
    Unauthorized,

    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] JsonRejection),

    #[error("malformed path: {0}")]
    MalformedPath(#[from] PathRejection),

    #[error("malformed query: {0}")]
    MalformedQuery(#[from] QueryRejection),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Scheduler(e) => e.kind(),
            ApiError::Unauthorized => "unauthorized",
            ApiError::MalformedPayload(_) | ApiError::MalformedPath(_) | ApiError::MalformedQuery(_) => {
                "invalid_request"
            }
            ApiError::Session(_) => "unavailable",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Scheduler(e) => match e {
                SchedulerError::NotFound(..) => StatusCode::NOT_FOUND,
                SchedulerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                SchedulerError::Conflict(_) => StatusCode::CONFLICT,
                SchedulerError::Forbidden(_) => StatusCode::FORBIDDEN,
                SchedulerError::InvalidTransition { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                SchedulerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::MalformedPayload(_) | ApiError::MalformedPath(_) | ApiError::MalformedQuery(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Session(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();
        if status.is_server_error() {
            tracing::error!("{self}");
        } else {
            tracing::debug!(kind, "request rejected: {self}");
        }
        metrics::counter!(crate::observability::API_ERRORS_TOTAL, "kind" => kind).increment(1);

        (status, Json(json!({ "error": kind, "message": self.to_string() }))).into_response()
    }
}
