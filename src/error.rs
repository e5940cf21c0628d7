//! Typed errors and HTTP mapping.

use crate::scope::Scope;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("duplicate resource kind: {0}")]
    DuplicateKind(String),
    #[error("missing setting: {0}")]
    MissingSetting(&'static str),
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("resource kind not found: {kind}")]
    KindNotFound { kind: String },
    #[error("{kind} cannot be served at {scope} scope")]
    ScopeNotSupported { kind: String, scope: Scope },
    #[error("{kind} '{name}' not found")]
    NotFound { kind: String, name: String },
    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: String, name: String },
    #[error("{kind} '{name}' was modified concurrently (expected version {expected}, found {actual})")]
    Conflict {
        kind: String,
        name: String,
        expected: u64,
        actual: u64,
    },
    #[error("{kind} '{name}' is not accessible: {reason}")]
    Forbidden {
        kind: String,
        name: String,
        reason: String,
    },
    #[error("secret for '{config}' is owned by {secret_owner}, config is owned by {config_owner}")]
    SecretScopeMismatch {
        config: String,
        secret_owner: Scope,
        config_owner: Scope,
    },
    #[error("invalid query parameter {field}: {reason}")]
    InvalidQuery { field: String, reason: String },
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("{operation} cancelled")]
    Cancelled { operation: &'static str },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("internal: {0}")]
    Internal(String),
}

impl AppError {
    pub fn not_found(kind: &str, name: &str) -> Self {
        AppError::NotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }

    pub fn invalid_query(field: &str, reason: impl Into<String>) -> Self {
        AppError::InvalidQuery {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub fn forbidden(kind: &str, name: &str, reason: impl Into<String>) -> Self {
        AppError::Forbidden {
            kind: kind.to_string(),
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound { .. })
    }

    /// Machine-readable code and HTTP status for this error.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::KindNotFound { .. } => (StatusCode::NOT_FOUND, "kind_not_found"),
            AppError::ScopeNotSupported { .. } => (StatusCode::BAD_REQUEST, "scope_not_supported"),
            AppError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            AppError::AlreadyExists { .. } => (StatusCode::CONFLICT, "already_exists"),
            AppError::Conflict { .. } => (StatusCode::CONFLICT, "conflict"),
            AppError::Forbidden { .. } => (StatusCode::FORBIDDEN, "forbidden"),
            AppError::SecretScopeMismatch { .. } => (StatusCode::FORBIDDEN, "secret_scope_mismatch"),
            AppError::InvalidQuery { .. } => (StatusCode::BAD_REQUEST, "invalid_query"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AppError::Cancelled { .. } => (StatusCode::REQUEST_TIMEOUT, "cancelled"),
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            AppError::Db(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }

    /// The offending input, so callers can tell which kind, name or field was rejected.
    fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::KindNotFound { kind } => Some(json!({ "kind": kind })),
            AppError::ScopeNotSupported { kind, scope } => {
                Some(json!({ "kind": kind, "scope": scope.to_string() }))
            }
            AppError::NotFound { kind, name } | AppError::AlreadyExists { kind, name } => {
                Some(json!({ "kind": kind, "name": name }))
            }
            AppError::Conflict {
                kind,
                name,
                expected,
                actual,
            } => Some(json!({
                "kind": kind,
                "name": name,
                "expectedVersion": expected.to_string(),
                "actualVersion": actual.to_string(),
            })),
            AppError::Forbidden { kind, name, .. } => Some(json!({ "kind": kind, "name": name })),
            AppError::SecretScopeMismatch {
                config,
                secret_owner,
                config_owner,
            } => Some(json!({
                "config": config,
                "secretOwner": secret_owner.to_string(),
                "configOwner": config_owner.to_string(),
            })),
            AppError::InvalidQuery { field, .. } => Some(json!({ "field": field })),
            AppError::Cancelled { operation } => Some(json!({ "operation": operation })),
            _ => None,
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

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
                details: self.details(),
            },
        };
        (status, Json(body)).into_response()
    }
}
