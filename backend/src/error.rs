use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Serialize, Serializer};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgriError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Non-success answer from a third-party provider; `status` is the provider's.
    #[error("Upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Bcrypt error: {0}")]
    Bcrypt(#[from] bcrypt::BcryptError),

    #[error("Token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for AgriError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                AgriError::Conflict("Resource already exists".to_string())
            }
            other => AgriError::Database(other),
        }
    }
}

impl Serialize for AgriError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.to_string().as_ref())
    }
}

pub type AgriResult<T> = Result<T, AgriError>;

impl AgriError {
    /// Stable machine-readable kind reported next to the message.
    pub fn kind(&self) -> &'static str {
        match self {
            AgriError::Validation(_) => "validation_error",
            AgriError::Unauthorized(_) => "unauthorized",
            AgriError::Forbidden(_) => "forbidden",
            AgriError::NotFound(_) => "not_found",
            AgriError::Conflict(_) => "conflict",
            AgriError::InvalidState(_) => "invalid_state",
            AgriError::ServiceUnavailable(_) => "service_unavailable",
            AgriError::Upstream { .. } | AgriError::Network(_) => "upstream_error",
            _ => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AgriError::Validation(_) => StatusCode::BAD_REQUEST,
            AgriError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AgriError::Forbidden(_) => StatusCode::FORBIDDEN,
            AgriError::NotFound(_) => StatusCode::NOT_FOUND,
            AgriError::Conflict(_) | AgriError::InvalidState(_) => StatusCode::CONFLICT,
            AgriError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AgriError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            AgriError::Network(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AgriError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();
        let error_message = match self {
            AgriError::Validation(msg)
            | AgriError::Unauthorized(msg)
            | AgriError::Forbidden(msg)
            | AgriError::NotFound(msg)
            | AgriError::Conflict(msg)
            | AgriError::InvalidState(msg)
            | AgriError::ServiceUnavailable(msg) => msg,
            AgriError::Upstream { status, message } => {
                tracing::warn!("Upstream provider returned {}: {}", status, message);
                message
            }
            AgriError::Network(e) => {
                tracing::error!("Network Error: {:?}", e);
                "Failed to reach upstream provider".to_string()
            }
            AgriError::Database(e) => {
                tracing::error!("Database Error: {:?}", e);
                "A database error occurred".to_string()
            }
            other => {
                tracing::error!("Unhandled Error: {:?}", other);
                "An internal error occurred".to_string()
            }
        };

        let body = Json(json!({
            "success": false,
            "kind": kind,
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AgriError::Validation("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AgriError::Unauthorized("x".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AgriError::Forbidden("x".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AgriError::NotFound("x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AgriError::InvalidState("x".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AgriError::ServiceUnavailable("x".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_upstream_status_passthrough() {
        let err = AgriError::Upstream {
            status: 401,
            message: "bad key".into(),
        };
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.kind(), "upstream_error");

        let garbage = AgriError::Upstream {
            status: 42,
            message: "nonsense".into(),
        };
        assert_eq!(garbage.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_unauthorized_and_forbidden_are_distinct() {
        let a = AgriError::Unauthorized("no token".into());
        let b = AgriError::Forbidden("wrong role".into());
        assert_ne!(a.kind(), b.kind());
        assert_ne!(a.status(), b.status());
    }
}
