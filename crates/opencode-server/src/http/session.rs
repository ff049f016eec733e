// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Session CRUD, abort, init, fork, and share — the non-streaming half of
//! the session surface. The message/turn endpoints live in
//! [`crate::http::message`].

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use opencode_entities::{self as entities, Project, Session};
use opencode_events::{Event, Filter};

use crate::error::ApiError;
use crate::http::extract::ValidJson;
use crate::state::AppState;

/// Find a session by id alone, scanning every known project. Storage is
/// keyed by `(projectId, sessionId)` but most of this HTTP surface only
/// knows the session id; the project set is small enough that a scan is
/// cheap (mirrors `opencode_agent::subagent`'s lookup for the same reason).
pub(crate) async fn find_session(
    state: &AppState,
    session_id: &str,
) -> Result<Session, ApiError> {
    for project_id in state.storage.list(&["session".to_string()]).await {
        if let Some(session) = entities::get_session(&state.storage, &project_id, session_id).await? {
            return Ok(session);
        }
    }
    Err(ApiError::NotFound(format!("session '{session_id}' not found")))
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub directory: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PatchSessionRequest {
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Serialize)]
struct SessionStatus {
    id: String,
    busy: bool,
}

pub async fn list_sessions(State(state): State<AppState>) -> Result<Json<Vec<Session>>, ApiError> {
    let mut all = Vec::new();
    for project_id in state.storage.list(&["session".to_string()]).await {
        all.extend(entities::list_sessions(&state.storage, &project_id).await?);
    }
    all.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(Json(all))
}

pub async fn create_session(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<CreateSessionRequest>,
) -> Result<Json<Session>, ApiError> {
    if req.directory.trim().is_empty() {
        return Err(ApiError::InvalidRequest("missing 'directory'".to_string()));
    }
    let project = Project::for_worktree(req.directory.clone(), None);
    let mut session = Session::new(project.id, req.directory);
    if let Some(title) = req.title {
        session.title = title;
    }
    entities::put_session(&state.storage, &session).await?;
    state
        .events
        .publish_sync(Event::new(
            "session.created",
            Some(session.id.clone()),
            serde_json::to_value(&session).unwrap_or(json!(null)),
        ))
        .await;
    Ok(Json(session))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    Ok(Json(find_session(&state, &id).await?))
}

pub async fn patch_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ValidJson(req): ValidJson<PatchSessionRequest>,
) -> Result<Json<Session>, ApiError> {
    let mut session = find_session(&state, &id).await?;
    if let Some(title) = req.title {
        session.title = title;
    }
    session.touch();
    entities::put_session(&state.storage, &session).await?;
    state
        .events
        .publish(Event::new(
            "session.updated",
            Some(session.id.clone()),
            serde_json::to_value(&session).unwrap_or(json!(null)),
        ))
        .await;
    Ok(Json(session))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = find_session(&state, &id).await?;
    entities::delete_session_cascade(&state.storage, &session.project_id, &session.id).await?;
    state.clear_turn_token(&session.id).await;
    state
        .events
        .publish(Event::new("session.deleted", Some(session.id.clone()), json!({"id": session.id})))
        .await;
    Ok(Json(json!({"success": true})))
}

pub async fn abort_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    // Idempotent: aborting an idle session is a no-op that still returns 200.
    let _ = find_session(&state, &id).await?;
    let aborted = state.abort(&id).await;
    Ok(Json(json!({"aborted": aborted})))
}

/// No dedicated initialization state exists beyond persistence — `init`
/// simply confirms the session exists and bumps its `updated` timestamp,
/// giving clients a cheap "is this session alive" round trip.
pub async fn init_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    let mut session = find_session(&state, &id).await?;
    session.touch();
    entities::put_session(&state.storage, &session).await?;
    Ok(Json(session))
}

#[derive(Debug, Deserialize)]
pub struct ForkSessionRequest {
    #[serde(rename = "messageID")]
    pub message_id: String,
}

/// Branch a session: copy every message up to and including `messageID`
/// (with their parts) into a brand new session under the same project and
/// directory. Ids are freshly minted — the fork is a distinct, independent
/// transcript, not an alias.
pub async fn fork_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ValidJson(req): ValidJson<ForkSessionRequest>,
) -> Result<Json<Session>, ApiError> {
    let source = find_session(&state, &id).await?;
    let messages = entities::list_messages(&state.storage, &source.id).await?;
    let cut = messages
        .iter()
        .position(|m| m.id == req.message_id)
        .ok_or_else(|| ApiError::NotFound(format!("message '{}' not found", req.message_id)))?;

    let mut fork = Session::new(source.project_id.clone(), source.directory.clone());
    fork.title = if source.title.is_empty() {
        "Fork".to_string()
    } else {
        format!("{} (fork)", source.title)
    };
    entities::put_session(&state.storage, &fork).await?;

    for message in &messages[..=cut] {
        let parts = entities::list_parts(&state.storage, &message.id).await?;
        let mut copied = message.clone();
        copied.id = opencode_entities::ids::next_id();
        copied.session_id = fork.id.clone();
        entities::put_message(&state.storage, &copied).await?;
        for part in parts {
            let mut retagged = part;
            retagged.retarget(&fork.id, &copied.id);
            entities::put_part(&state.storage, &retagged).await?;
        }
    }

    state
        .events
        .publish(Event::new("session.created", Some(fork.id.clone()), serde_json::to_value(&fork).unwrap_or(json!(null))))
        .await;
    Ok(Json(fork))
}

pub async fn share_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = find_session(&state, &id).await?;
    let url = format!("opencode://share/{}", session.id);
    state
        .storage
        .put(&["share".to_string(), session.id.clone()], &url)
        .await?;
    Ok(Json(json!({"url": url})))
}

pub async fn unshare_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let _ = find_session(&state, &id).await?;
    state.storage.delete(&["share".to_string(), id]).await;
    Ok(Json(json!({"success": true})))
}

pub async fn session_status(State(state): State<AppState>) -> Result<Json<Vec<SessionStatus>>, ApiError> {
    let mut all = Vec::new();
    for project_id in state.storage.list(&["session".to_string()]).await {
        all.extend(entities::list_sessions(&state.storage, &project_id).await?);
    }
    let aborts = state.aborts.lock().await;
    let statuses = all
        .into_iter()
        .map(|s| SessionStatus { busy: aborts.contains_key(&s.id), id: s.id })
        .collect();
    Ok(Json(statuses))
}

/// Used by `GET /event?sessionID=` to validate the subscription up front.
pub fn session_filter(session_id: Option<String>) -> Result<Filter, ApiError> {
    match session_id {
        Some(id) if !id.is_empty() => Ok(Filter::Session(id)),
        _ => Err(ApiError::InvalidRequest("missing 'sessionID'".to_string())),
    }
}
