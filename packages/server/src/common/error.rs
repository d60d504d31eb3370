//! Crate-wide error taxonomy (spec §7) as a tagged sum type, with the HTTP
//! mapping every external-facing endpoint converges on.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::common::auth::AuthError;
use crate::domains::jobs::backend::BackendError;
use crate::domains::jobs::blob::BlobError;
use crate::domains::jobs::queue::QueueError;
use crate::domains::jobs::quota::QuotaError;
use crate::domains::jobs::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("authentication required")]
    Unauthenticated,

    #[error("token expired")]
    TokenExpired,

    #[error("quota exceeded")]
    QuotaExceeded { remaining: i64 },

    #[error("failed to enqueue job: {0}")]
    EnqueueFailed(String),

    #[error("backend throttled the request")]
    Throttled,

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("backend refused the prompt: {0}")]
    PolicyBlocked(String),

    #[error("job was dead-lettered after exhausting redeliveries")]
    DeadLettered,

    #[error("job not found")]
    NotFound,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Stable machine-readable error kind, matching spec §7's taxonomy names.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::InvalidInput(_) => "invalid_input",
            AppError::Unauthenticated => "unauthenticated",
            AppError::TokenExpired => "token_expired",
            AppError::QuotaExceeded { .. } => "quota_exceeded",
            AppError::EnqueueFailed(_) => "enqueue_failed",
            AppError::Throttled => "throttled",
            AppError::BackendUnavailable(_) => "backend_unavailable",
            AppError::PolicyBlocked(_) => "policy_blocked",
            AppError::DeadLettered => "dead_lettered",
            AppError::NotFound => "not_found",
            AppError::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthenticated | AppError::TokenExpired => StatusCode::UNAUTHORIZED,
            AppError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::EnqueueFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Throttled | AppError::BackendUnavailable(_) | AppError::PolicyBlocked(_) => {
                StatusCode::BAD_GATEWAY
            }
            AppError::DeadLettered => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorPayload,
}

#[derive(Serialize)]
struct ErrorPayload {
    kind: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    remaining: Option<i64>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if matches!(self, AppError::Internal(_)) {
            tracing::error!(error = %self, "internal error");
        }
        let remaining = match &self {
            AppError::QuotaExceeded { remaining } => Some(*remaining),
            _ => None,
        };
        let status = self.status();
        let body = ErrorBody {
            error: ErrorPayload {
                kind: self.kind(),
                message: self.to_string(),
                remaining,
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => AppError::NotFound,
            StoreError::IllegalTransition { .. } => AppError::Internal(anyhow::anyhow!(e)),
            StoreError::Db(err) => AppError::Internal(err.into()),
        }
    }
}

impl From<QueueError> for AppError {
    fn from(e: QueueError) -> Self {
        AppError::EnqueueFailed(e.to_string())
    }
}

impl From<BlobError> for AppError {
    fn from(e: BlobError) -> Self {
        AppError::Internal(anyhow::anyhow!(e))
    }
}

impl From<BackendError> for AppError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Throttled => AppError::Throttled,
            BackendError::BackendUnavailable(msg) => AppError::BackendUnavailable(msg),
            BackendError::PolicyBlocked(msg) => AppError::PolicyBlocked(msg),
        }
    }
}

impl From<QuotaError> for AppError {
    fn from(e: QuotaError) -> Self {
        let QuotaError::Db(err) = e;
        AppError::Internal(err.into())
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::AuthenticationRequired | AuthError::InvalidCredentials => {
                AppError::Unauthenticated
            }
            AuthError::TokenExpired => AppError::TokenExpired,
            AuthError::InvalidToken => AppError::Unauthenticated,
        }
    }
}
