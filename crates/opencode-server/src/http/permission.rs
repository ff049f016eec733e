// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The operator-facing half of the Permission Broker: responding to a
//! pending ask. Requests themselves are raised internally by the Session
//! Processor and observed via `/event`/`/global/event`, not through this
//! module.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use opencode_permission::Decision;

use crate::error::ApiError;
use crate::http::extract::ValidJson;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    pub decision: Decision,
}

/// `POST /permission/{id}/respond` — resolve a pending permission request.
/// `404` if `id` names no pending request (already resolved, or never existed).
pub async fn respond(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ValidJson(req): ValidJson<RespondRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if state.permission.respond(&id, req.decision).await {
        Ok(Json(json!({"success": true})))
    } else {
        Err(ApiError::NotFound(format!("permission request '{id}' not found")))
    }
}
