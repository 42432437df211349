use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Methods accepted when the store is writable.
pub const ALLOW_READ_WRITE: &str = "GET, HEAD, PUT, DELETE";

/// Methods accepted when the store is read-only.
pub const ALLOW_READ_ONLY: &str = "GET, HEAD";

#[derive(Error, Debug)]
pub enum FileServerError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Path is outside root directory")]
    Forbidden,

    #[error("Precondition failed")]
    PreconditionFailed,

    #[error("Server is in read-only mode")]
    ReadOnly,

    #[error("Method not allowed")]
    MethodNotAllowed { allow: &'static str },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
}

impl FileServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            FileServerError::NotFound(_) => StatusCode::NOT_FOUND,
            FileServerError::Forbidden => StatusCode::FORBIDDEN,
            FileServerError::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            FileServerError::ReadOnly | FileServerError::MethodNotAllowed { .. } => {
                StatusCode::METHOD_NOT_ALLOWED
            }
            FileServerError::InvalidOperation(_) => StatusCode::CONFLICT,
            FileServerError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            FileServerError::NotFound(_) => "NOT_FOUND",
            FileServerError::Forbidden => "FORBIDDEN",
            FileServerError::PreconditionFailed => "PRECONDITION_FAILED",
            FileServerError::ReadOnly => "READ_ONLY",
            FileServerError::MethodNotAllowed { .. } => "METHOD_NOT_ALLOWED",
            FileServerError::InvalidOperation(_) => "INVALID_OPERATION",
            FileServerError::Io(_) => "IO_ERROR",
        }
    }
}

impl IntoResponse for FileServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let allow = match &self {
            FileServerError::ReadOnly => Some(ALLOW_READ_ONLY),
            FileServerError::MethodNotAllowed { allow } => Some(*allow),
            _ => None,
        };

        // Raw IO errors may carry absolute paths; keep them in the log only.
        let message = match &self {
            FileServerError::Io(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };

        let body = ErrorResponse {
            error: message,
            code: self.code(),
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(allow) = allow {
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static(allow));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            FileServerError::NotFound("x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(FileServerError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            FileServerError::PreconditionFailed.status(),
            StatusCode::PRECONDITION_FAILED
        );
        assert_eq!(
            FileServerError::ReadOnly.status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            FileServerError::Io(std::io::Error::other("disk full")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_read_only_sets_allow_header() {
        let response = FileServerError::ReadOnly.into_response();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            response.headers().get(header::ALLOW).unwrap(),
            ALLOW_READ_ONLY
        );
    }

    #[test]
    fn test_method_not_allowed_uses_given_allow_list() {
        let response = FileServerError::MethodNotAllowed {
            allow: ALLOW_READ_WRITE,
        }
        .into_response();
        assert_eq!(
            response.headers().get(header::ALLOW).unwrap(),
            ALLOW_READ_WRITE
        );
    }

    #[test]
    fn test_not_found_has_no_allow_header() {
        let response = FileServerError::NotFound("a.txt".into()).into_response();
        assert!(response.headers().get(header::ALLOW).is_none());
    }
}
