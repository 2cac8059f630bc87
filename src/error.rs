use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::scheduling::SchedulingError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorObject,
}

#[derive(Debug, Serialize)]
pub struct ErrorObject {
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(&'static str, String),
    Forbidden(&'static str, String),
    BadRequest(&'static str, String),
    NotFound(&'static str, String),
    Conflict(&'static str, String),
    Internal(String),
}

impl ApiError {
    pub fn invalid_credentials() -> Self {
        ApiError::Unauthorized("INVALID_CREDENTIALS", "Email or password is incorrect".into())
    }

    pub fn session_expired() -> Self {
        ApiError::Unauthorized("SESSION_EXPIRED", "Session expired".into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::BadRequest("VALIDATION_ERROR", message.into())
    }

    pub fn not_found(what: &str) -> Self {
        ApiError::NotFound("NOT_FOUND", format!("{what} not found"))
    }

    pub fn admin_only() -> Self {
        ApiError::Forbidden("FORBIDDEN", "Insufficient permissions".into())
    }

    /// Used as `.map_err(ApiError::db)` on every query.
    pub fn db(e: sqlx::Error) -> Self {
        tracing::error!(error = %e, "database error");
        ApiError::Internal(format!("db error: {e}"))
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized(code, _)
            | ApiError::Forbidden(code, _)
            | ApiError::BadRequest(code, _)
            | ApiError::NotFound(code, _)
            | ApiError::Conflict(code, _) => *code,
            ApiError::Internal(_) => "INTERNAL",
        }
    }

    fn to_error_response(code: &str, message: &str) -> Json<ErrorResponse> {
        Json(ErrorResponse {
            error: ErrorObject {
                code: code.to_string(),
                message: message.to_string(),
            },
        })
    }
}

impl From<SchedulingError> for ApiError {
    fn from(e: SchedulingError) -> Self {
        match e {
            SchedulingError::InvalidInput(msg) | SchedulingError::Validation(msg) => {
                ApiError::BadRequest("VALIDATION_ERROR", msg)
            }
            SchedulingError::NotFound(what) => ApiError::not_found(what),
            e @ SchedulingError::Conflict { .. } => {
                ApiError::Conflict("APPOINTMENT_CONFLICT", e.to_string())
            }
            SchedulingError::InvalidState(msg) => ApiError::BadRequest("INVALID_STATE", msg.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.code();
        match self {
            ApiError::Unauthorized(_, msg) => {
                (StatusCode::UNAUTHORIZED, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Forbidden(_, msg) => {
                (StatusCode::FORBIDDEN, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::BadRequest(_, msg) => {
                (StatusCode::BAD_REQUEST, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::NotFound(_, msg) => {
                (StatusCode::NOT_FOUND, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Conflict(_, msg) => {
                (StatusCode::CONFLICT, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiError::to_error_response(code, &msg),
            )
                .into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn scheduling_errors_map_to_http_codes() {
        let conflict: ApiError = SchedulingError::Conflict {
            appointment_id: Uuid::nil(),
        }
        .into();
        assert_eq!(conflict.code(), "APPOINTMENT_CONFLICT");
        assert_eq!(conflict.into_response().status(), StatusCode::CONFLICT);

        let bad: ApiError = SchedulingError::InvalidInput("time".into()).into();
        assert_eq!(bad.code(), "VALIDATION_ERROR");
        assert_eq!(bad.into_response().status(), StatusCode::BAD_REQUEST);

        let missing: ApiError = SchedulingError::NotFound("Patient").into();
        assert_eq!(missing.into_response().status(), StatusCode::NOT_FOUND);

        let state: ApiError =
            SchedulingError::InvalidState("Cannot delete completed appointments").into();
        assert_eq!(state.code(), "INVALID_STATE");
        assert_eq!(state.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
