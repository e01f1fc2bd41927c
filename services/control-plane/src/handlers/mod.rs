//! HTTP handlers for the control plane

pub mod executions;
pub mod transactions;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;
use validator::Validate;

use crate::error::EngineError;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
}

impl EngineError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::AdmissionRejected { .. } => StatusCode::TOO_MANY_REQUESTS,
            EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
            EngineError::StateConflict(_) => StatusCode::CONFLICT,
            EngineError::InsufficientBalance { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::Rpc(_) => StatusCode::BAD_GATEWAY,
            EngineError::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation_failed",
            EngineError::AdmissionRejected { .. } => "admission_rejected",
            EngineError::NotFound { .. } => "not_found",
            EngineError::StateConflict(_) => "state_conflict",
            EngineError::InsufficientBalance { .. } => "insufficient_balance",
            EngineError::Rpc(_) => "rpc_error",
            EngineError::Persistence(_) => "persistence_error",
            EngineError::Configuration(_) => "configuration_error",
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        let body = ErrorBody {
            error: self.to_string(),
            code: self.code(),
        };
        (status, Json(body)).into_response()
    }
}

/// Run derive-based request validation, mapping failures to 400
pub(crate) fn validate_request<T: Validate>(req: &T) -> Result<(), EngineError> {
    req.validate()
        .map_err(|errors| EngineError::Validation(errors.to_string()))
}
