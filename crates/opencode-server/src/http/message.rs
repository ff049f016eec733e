// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The turn endpoint: `POST /session/{id}/message` streams a turn's
//! progress as newline-delimited JSON, driven by subscribing to the event
//! bus for this session while [`opencode_agent::SessionProcessor::submit`]
//! runs concurrently. `GET` variants read the persisted transcript back.

use async_stream::stream;
use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use opencode_agent::AgentRuntimeContext;
use opencode_entities as entities;
use opencode_events::Filter;

use crate::error::ApiError;
use crate::http::extract::ValidJson;
use crate::http::session::find_session;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    pub content: String,
    #[serde(default)]
    pub agent: Option<String>,
}

#[derive(Serialize, Default)]
struct MessageChunk {
    #[serde(skip_serializing_if = "Option::is_none")]
    info: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parts: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn ndjson_line(chunk: &MessageChunk) -> Bytes {
    let mut s = serde_json::to_string(chunk).unwrap_or_else(|_| "{}".to_string());
    s.push('\n');
    Bytes::from(s)
}

pub async fn post_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ValidJson(req): ValidJson<PostMessageRequest>,
) -> Result<Response, ApiError> {
    if req.content.trim().is_empty() {
        return Err(ApiError::InvalidRequest("missing 'content'".to_string()));
    }
    let session = find_session(&state, &id).await?;
    let agent_name = req.agent.unwrap_or_else(|| state.agents.default_agent().name.clone());

    let mut sub = state.events.subscribe(Filter::Session(session.id.clone())).await;
    let cancel = state.new_turn_token(&session.id).await;

    let processor = state.processor.clone();
    let session_for_task = session.clone();
    let mut task = tokio::spawn(async move {
        let runtime_ctx = AgentRuntimeContext::default();
        processor.submit(&session_for_task, &agent_name, req.content, &runtime_ctx, cancel).await
    });

    let session_id = session.id.clone();
    let state_for_stream = state.clone();
    let body_stream = stream! {
        loop {
            tokio::select! {
                event = sub.receiver.recv() => {
                    let Some(event) = event else { break };
                    let kind = event.kind.clone();
                    let properties = event.properties;
                    match kind.as_str() {
                        "message.created" => {
                            yield Ok::<_, std::io::Error>(ndjson_line(&MessageChunk { info: Some(properties), ..Default::default() }));
                        }
                        "message.part.updated" => {
                            yield Ok(ndjson_line(&MessageChunk { parts: Some(vec![properties]), ..Default::default() }));
                        }
                        "session.error" => {
                            let msg = properties.get("message").and_then(Value::as_str).unwrap_or("error").to_string();
                            yield Ok(ndjson_line(&MessageChunk { error: Some(msg), ..Default::default() }));
                        }
                        _ => {}
                    }
                }
                result = &mut task => {
                    state_for_stream.clear_turn_token(&session_id).await;
                    while let Ok(event) = sub.receiver.try_recv() {
                        if event.kind == "message.part.updated" {
                            yield Ok(ndjson_line(&MessageChunk { parts: Some(vec![event.properties]), ..Default::default() }));
                        }
                    }
                    match result {
                        Ok(Ok(outcome)) => {
                            let msg = entities::get_message(&state_for_stream.storage, &session_id, &outcome.assistant_message_id).await;
                            if let Ok(Some(msg)) = msg {
                                let parts = entities::list_parts(&state_for_stream.storage, &msg.id).await.unwrap_or_default();
                                let parts_json: Vec<Value> = parts.iter().map(|p| serde_json::to_value(p).unwrap_or(json!(null))).collect();
                                yield Ok(ndjson_line(&MessageChunk {
                                    info: Some(serde_json::to_value(&msg).unwrap_or(json!(null))),
                                    parts: Some(parts_json),
                                    error: None,
                                }));
                            }
                        }
                        Ok(Err(err)) => {
                            yield Ok(ndjson_line(&MessageChunk { error: Some(err.to_string()), ..Default::default() }));
                        }
                        Err(join_err) => {
                            yield Ok(ndjson_line(&MessageChunk { error: Some(join_err.to_string()), ..Default::default() }));
                        }
                    }
                    break;
                }
            }
        }
    };

    let body = Body::from_stream(body_stream);
    Ok(([(header::CONTENT_TYPE, "application/x-ndjson")], body).into_response())
}

pub async fn list_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let _ = find_session(&state, &id).await?;
    let messages = entities::list_messages(&state.storage, &id).await?;
    let mut out = Vec::with_capacity(messages.len());
    for m in messages {
        let parts = entities::list_parts(&state.storage, &m.id).await?;
        out.push(json!({"info": m, "parts": parts}));
    }
    Ok(Json(out))
}

pub async fn get_message(
    State(state): State<AppState>,
    Path((id, msg_id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let _ = find_session(&state, &id).await?;
    let message = entities::get_message(&state.storage, &id, &msg_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("message '{msg_id}' not found")))?;
    let parts = entities::list_parts(&state.storage, &message.id).await?;
    Ok(Json(json!({"info": message, "parts": parts})))
}
