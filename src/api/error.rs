use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::engine::EngineError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Engine(#[from] EngineError),

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("invalid request body: {0}")]
    Body(#[from] JsonRejection),

    #[error("invalid path: {0}")]
    Path(#[from] PathRejection),

    #[error("invalid query: {0}")]
    Query(#[from] QueryRejection),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::Body(_) | ApiError::Path(_) | ApiError::Query(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Engine(e) => match e {
                EngineError::Validation(_) | EngineError::LimitExceeded(_) => {
                    StatusCode::BAD_REQUEST
                }
                EngineError::NotFound(_) => StatusCode::NOT_FOUND,
                EngineError::AlreadyExists(_)
                | EngineError::SlotTaken(_)
                | EngineError::TherapistOff { .. }
                | EngineError::SlotSuppressed { .. }
                | EngineError::InvalidTransition { .. }
                | EngineError::HasLiveBookings(_) => StatusCode::CONFLICT,
                // Transient: the caller cannot know whether the write landed.
                EngineError::WalError(_) => StatusCode::SERVICE_UNAVAILABLE,
            },
        }
    }

    /// Machine-readable error kind for clients that branch on it.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) | ApiError::Body(_) | ApiError::Path(_) | ApiError::Query(_) => {
                "validation"
            }
            ApiError::Engine(e) => match e {
                EngineError::Validation(_) => "validation",
                EngineError::LimitExceeded(_) => "limit_exceeded",
                EngineError::NotFound(_) => "not_found",
                EngineError::AlreadyExists(_) => "already_exists",
                EngineError::SlotTaken(_) => "slot_taken",
                EngineError::TherapistOff { .. } => "therapist_off",
                EngineError::SlotSuppressed { .. } => "slot_suppressed",
                EngineError::InvalidTransition { .. } => "invalid_transition",
                EngineError::HasLiveBookings(_) => "has_live_bookings",
                EngineError::WalError(_) => "unavailable",
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{status}: {self}");
        } else {
            tracing::debug!("{status}: {self}");
        }

        let body = Json(json!({
            "error": self.to_string(),
            "kind": self.kind(),
        }));
        (status, body).into_response()
    }
}
