use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

use namegnome_core::CoreError;

pub type AppResult<T> = Result<T, AppError>;

/// HTTP-facing error: a status code, a stable machine code, a human message
/// and (for structured failures like disambiguation) a full response body.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub body: Option<serde_json::Value>,
}

impl AppError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            body: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "validation_error",
            message,
        )
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Some(body) = self.body {
            return (self.status, Json(body)).into_response();
        }
        let body = Json(json!({
            "error": {
                "code": self.code,
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));
        (self.status, body).into_response()
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        let code = err.code().to_string();
        match err {
            CoreError::Validation(message) => Self::validation(message),
            CoreError::DisambiguationRequired(pending) => Self {
                status: StatusCode::CONFLICT,
                code,
                message: format!("disambiguation required for {}", pending.field),
                body: Some(json!({
                    "status": "disambiguation_required",
                    "disambiguation_token": pending.token,
                    "field": pending.field,
                    "candidates": pending.candidates,
                    "suggested": pending.suggested,
                })),
            },
            CoreError::ProviderUnavailable {
                provider,
                offline,
                message,
            } => Self {
                status: StatusCode::SERVICE_UNAVAILABLE,
                code,
                message,
                body: Some(json!({
                    "error": {
                        "code": "provider_unavailable",
                        "provider": provider,
                        "offline": offline,
                    }
                })),
            },
            CoreError::StalePlan { expected, actual } => Self {
                status: StatusCode::CONFLICT,
                code,
                message: format!("plan is stale: expected fingerprint {expected}, got {actual}"),
                body: None,
            },
            CoreError::Locked {
                root,
                owner,
                acquired_at,
            } => Self {
                status: StatusCode::LOCKED,
                code,
                message: format!("{} is locked", root.display()),
                body: Some(json!({
                    "error": {
                        "code": "locked",
                        "active_job_id": owner,
                        "acquired_at": acquired_at,
                    }
                })),
            },
            other => Self::internal(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err.to_string())
    }
}
