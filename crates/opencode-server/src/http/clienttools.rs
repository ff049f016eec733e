// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! REST surface over the [`opencode_clienttools::ClientToolRegistry`] and
//! [`opencode_clienttools::ClientToolBroker`]. The companion SSE feed lives
//! in [`crate::http::sse::client_tool_pending`].

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use opencode_clienttools::{ExecutionRequest, ExecutionResult};

use crate::error::ApiError;
use crate::http::extract::ValidJson;
use crate::state::AppState;

const DEFAULT_EXECUTE_TIMEOUT: Duration = Duration::from_secs(120);

pub async fn list_all_tools(State(state): State<AppState>) -> Json<Vec<Value>> {
    let tools = state.client_tools.registry().all_tools();
    Json(tools.iter().map(|t| serde_json::to_value(t).unwrap_or(json!(null))).collect())
}

pub async fn list_client_tools(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> Json<Vec<Value>> {
    let tools = state.client_tools.registry().tools_for(&client_id);
    Json(tools.iter().map(|t| serde_json::to_value(t).unwrap_or(json!(null))).collect())
}

#[derive(Debug, Deserialize)]
pub struct RegisterToolSpec {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Value,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(rename = "clientID")]
    pub client_id: String,
    pub tools: Vec<RegisterToolSpec>,
}

pub async fn register(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<RegisterRequest>,
) -> Result<Json<Vec<Value>>, ApiError> {
    if req.client_id.trim().is_empty() {
        return Err(ApiError::InvalidRequest("missing 'clientID'".to_string()));
    }
    let specs = req.tools.into_iter().map(|t| (t.id, t.description, t.parameters)).collect();
    let defs = state.client_tools.registry().register(&req.client_id, specs);
    state
        .events
        .publish(opencode_events::Event::new(
            "client.tool.registered",
            None,
            json!({"clientId": req.client_id}),
        ))
        .await;
    Ok(Json(defs.iter().map(|d| serde_json::to_value(d).unwrap_or(json!(null))).collect()))
}

#[derive(Debug, Deserialize)]
pub struct UnregisterQuery {
    #[serde(rename = "clientID")]
    pub client_id: String,
    #[serde(default)]
    pub tools: Option<String>,
}

pub async fn unregister(
    State(state): State<AppState>,
    Query(q): Query<UnregisterQuery>,
) -> Result<Json<Value>, ApiError> {
    if q.client_id.trim().is_empty() {
        return Err(ApiError::InvalidRequest("missing 'clientID'".to_string()));
    }
    let tool_ids: Vec<String> = q
        .tools
        .map(|s| s.split(',').map(str::to_string).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();
    state.client_tools.registry().unregister(&q.client_id, &tool_ids);
    state
        .events
        .publish(opencode_events::Event::new(
            "client.tool.unregistered",
            None,
            json!({"clientId": q.client_id}),
        ))
        .await;
    Ok(Json(json!({"success": true})))
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    #[serde(rename = "clientID")]
    pub client_id: String,
    #[serde(rename = "toolID")]
    pub tool_id: String,
    #[serde(rename = "sessionID")]
    pub session_id: String,
    #[serde(rename = "messageID")]
    pub message_id: String,
    #[serde(rename = "callID")]
    pub call_id: String,
    #[serde(default)]
    pub input: Value,
}

pub async fn execute(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<ExecuteRequest>,
) -> Result<Json<Value>, ApiError> {
    let exec_req = ExecutionRequest {
        tool_id: req.tool_id,
        session_id: req.session_id,
        message_id: req.message_id,
        call_id: req.call_id,
        input: req.input,
    };
    let output = state
        .client_tools
        .execute(&req.client_id, exec_req, DEFAULT_EXECUTE_TIMEOUT)
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!(e)))?;
    Ok(Json(json!({"output": output})))
}

#[derive(Debug, Deserialize)]
pub struct ResultRequest {
    #[serde(rename = "requestID")]
    pub request_id: String,
    pub status: String,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

pub async fn result(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<ResultRequest>,
) -> Result<Json<Value>, ApiError> {
    let accepted = state
        .client_tools
        .submit_result(ExecutionResult {
            request_id: req.request_id,
            status: req.status,
            output: req.output,
            error: req.error,
        })
        .await;
    if accepted {
        Ok(Json(json!({"success": true})))
    } else {
        Err(ApiError::NotFound("no pending request for this id".to_string()))
    }
}
