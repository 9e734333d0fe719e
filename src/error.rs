//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepoError {
    /// A filter key has the wrong runtime shape. `field` names the offending key.
    #[error("malformed filter: {field}: {reason}")]
    MalformedFilter { field: &'static str, reason: String },
    #[error("execution context has no database handle")]
    NoDatabaseHandle,
    #[error("entity {0} has no primary key")]
    NoPrimaryKey(String),
    #[error("ambiguous identity: {0}")]
    AmbiguousIdentity(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// Passed through from the store untouched.
    #[error(transparent)]
    Storage(#[from] sqlx::Error),
    #[error("decode: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("config: {0}")]
    Config(String),
}

impl RepoError {
    pub(crate) fn malformed(field: &'static str, reason: impl Into<String>) -> Self {
        RepoError::MalformedFilter {
            field,
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code, used in error bodies and logs.
    pub fn code(&self) -> &'static str {
        match self {
            RepoError::MalformedFilter { .. } => "malformed_filter",
            RepoError::NoDatabaseHandle => "no_database_handle",
            RepoError::NoPrimaryKey(_) => "no_primary_key",
            RepoError::AmbiguousIdentity(_) => "ambiguous_identity",
            RepoError::NotFound(_) => "not_found",
            RepoError::Storage(_) => "storage_failure",
            RepoError::Decode(_) => "decode_error",
            RepoError::BadRequest(_) => "bad_request",
            RepoError::Config(_) => "config_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            RepoError::MalformedFilter { .. }
            | RepoError::AmbiguousIdentity(_)
            | RepoError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RepoError::NotFound(_) => StatusCode::NOT_FOUND,
            RepoError::NoDatabaseHandle
            | RepoError::NoPrimaryKey(_)
            | RepoError::Storage(_)
            | RepoError::Decode(_)
            | RepoError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for RepoError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.to_string(),
                details: None,
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_filter_names_field() {
        let e = RepoError::malformed("joins", "expected an array of strings");
        assert_eq!(e.to_string(), "malformed filter: joins: expected an array of strings");
        assert_eq!(e.status(), StatusCode::BAD_REQUEST);
        assert_eq!(e.code(), "malformed_filter");
    }

    #[test]
    fn storage_errors_pass_through() {
        let e = RepoError::from(sqlx::Error::RowNotFound);
        assert_eq!(e.to_string(), sqlx::Error::RowNotFound.to_string());
        assert_eq!(e.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
