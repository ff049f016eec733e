// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The HTTP-facing error taxonomy. Handlers parse input, invoke one
//! component method, and format JSON — validation/not-found failures map
//! to `ApiError` here; permission denials never do (they surface as a
//! failed `ToolPart` instead, per the tool-execution loop).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("session '{0}' is busy processing another turn")]
    SessionBusy(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidRequest(_) => "INVALID_REQUEST",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::SessionBusy(_) => "SESSION_BUSY",
            ApiError::Internal(_) => "INTERNAL",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::SessionBusy(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "internal error");
        }
        let message = match &self {
            // Never leak internals to the client; the real error is logged above.
            ApiError::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        };
        let body = ErrorBody { error: ErrorDetail { code: self.code().to_string(), message } };
        (status, Json(body)).into_response()
    }
}

/// Translate a [`opencode_agent::ProcessorError`] into the HTTP taxonomy.
/// `PermissionDenied` never reaches here in practice — the processor
/// recovers it locally into a failed `ToolPart` — but a defensive mapping
/// is kept in case a future caller surfaces it directly.
impl From<opencode_agent::ProcessorError> for ApiError {
    fn from(err: opencode_agent::ProcessorError) -> Self {
        use opencode_agent::ProcessorError::*;
        match err {
            SessionBusy(id) => ApiError::SessionBusy(id),
            UnknownAgent(name) => ApiError::InvalidRequest(format!("unknown agent: {name}")),
            UnknownProvider(name) => ApiError::InvalidRequest(format!("unknown provider: {name}")),
            Cancelled => ApiError::Internal(anyhow::anyhow!("turn cancelled")),
            StepBudgetExhausted(n) => {
                ApiError::Internal(anyhow::anyhow!("step budget of {n} exhausted"))
            }
            PermissionDenied(e) => ApiError::Internal(anyhow::anyhow!(e)),
            Storage(e) => ApiError::Internal(anyhow::anyhow!(e)),
            Provider(e) => ApiError::Internal(e),
        }
    }
}

impl From<opencode_storage::StorageError> for ApiError {
    fn from(err: opencode_storage::StorageError) -> Self {
        match err {
            opencode_storage::StorageError::NotFound(path) => ApiError::NotFound(path),
            other => ApiError::Internal(anyhow::anyhow!(other)),
        }
    }
}
