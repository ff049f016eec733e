// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Read-mostly inventory endpoints: config, providers, agents, and the
//! external-tooling surfaces (command/formatter/mcp/lsp) that have no
//! backing component in this workspace — those return honest, minimal
//! listings rather than simulated integrations.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use opencode_entities::Project;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn get_config(State(state): State<AppState>) -> Json<Value> {
    Json(serde_json::to_value(&*state.config).unwrap_or(json!({})))
}

pub async fn get_config_providers(State(state): State<AppState>) -> Json<Value> {
    let providers = state.providers.list();
    let models = state.providers.all_models();
    Json(json!({
        "providers": providers,
        "models": models,
        "default": state.providers.default_model().map(|(p, m)| json!({"provider": p, "model": m})),
    }))
}

pub async fn get_agents(State(state): State<AppState>) -> Json<Value> {
    let agents: Vec<Value> = state
        .agents
        .names()
        .into_iter()
        .filter_map(|name| state.agents.get(name))
        .map(|a| {
            json!({
                "name": a.name,
                "description": a.description,
                "mode": a.mode.to_string(),
                "defaultProvider": a.default_provider,
                "defaultModel": a.default_model,
                "maxSteps": a.max_steps,
            })
        })
        .collect();
    Json(json!(agents))
}

/// No custom-command definitions exist in this workspace's config schema
/// (spec's command surface names an external plug-in point this core
/// doesn't implement) — the inventory is honestly empty.
pub async fn list_commands() -> Json<Value> {
    Json(json!([]))
}

pub async fn get_command(Path(name): Path<String>) -> Result<Json<Value>, ApiError> {
    Err(ApiError::NotFound(format!("command '{name}' not found")))
}

pub async fn run_command(Path(name): Path<String>) -> Result<Json<Value>, ApiError> {
    Err(ApiError::NotFound(format!("command '{name}' not found")))
}

/// No formatter integration exists in this workspace; reports an empty
/// inventory and rejects format requests as not-found rather than silently
/// no-op'ing them.
pub async fn list_formatters() -> Json<Value> {
    Json(json!([]))
}

pub async fn format_files() -> Result<Json<Value>, ApiError> {
    Err(ApiError::InvalidRequest("no formatter configured".to_string()))
}

/// No MCP client exists in this workspace; every MCP surface reports an
/// empty inventory or `404` for a specific server/tool.
pub async fn list_mcp() -> Json<Value> {
    Json(json!([]))
}

pub async fn list_mcp_tools() -> Json<Value> {
    Json(json!([]))
}

pub async fn list_mcp_resources() -> Json<Value> {
    Json(json!([]))
}

#[derive(Debug, Deserialize)]
pub struct UriQuery {
    pub uri: String,
}

pub async fn get_mcp_resource(Query(q): Query<UriQuery>) -> Result<Json<Value>, ApiError> {
    Err(ApiError::NotFound(format!("resource '{}' not found", q.uri)))
}

pub async fn add_mcp_server() -> Result<Json<Value>, ApiError> {
    Err(ApiError::InvalidRequest("MCP servers are not supported by this deployment".to_string()))
}

pub async fn remove_mcp_server(Path(name): Path<String>) -> Result<Json<Value>, ApiError> {
    Err(ApiError::NotFound(format!("mcp server '{name}' not found")))
}

pub async fn call_mcp_tool(Path(name): Path<String>) -> Result<Json<Value>, ApiError> {
    Err(ApiError::NotFound(format!("mcp tool '{name}' not found")))
}

/// No LSP client exists in this workspace (spec Non-goals: "LSP client
/// internals" are external); the inventory is honestly empty.
pub async fn list_lsp() -> Json<Value> {
    Json(json!([]))
}

#[derive(Debug, Deserialize)]
pub struct DirectoryQuery {
    pub directory: String,
}

/// `GET /vcs?directory=` — no VCS shelling exists in this workspace; report
/// whether a `.git` directory is present, nothing more.
pub async fn vcs_info(Query(q): Query<DirectoryQuery>) -> Json<Value> {
    let is_git = std::path::Path::new(&q.directory).join(".git").exists();
    Json(json!({"directory": q.directory, "kind": if is_git { "git" } else { "none" }}))
}

pub async fn list_projects(State(state): State<AppState>) -> Json<Value> {
    let project_ids = state.storage.list(&["session".to_string()]).await;
    Json(json!(project_ids))
}

/// `GET /project/current?directory=` — derived fresh on every call, never
/// cached (spec testable property: two calls with the same directory yield
/// the same project id).
pub async fn current_project(Query(q): Query<DirectoryQuery>) -> Json<Value> {
    let project = Project::for_worktree(q.directory, None);
    Json(serde_json::to_value(&project).unwrap_or(json!({})))
}

pub async fn get_path() -> Json<Value> {
    Json(json!({"cwd": std::env::current_dir().map(|p| p.display().to_string()).unwrap_or_default()}))
}

pub async fn list_tools(State(state): State<AppState>) -> Json<Value> {
    let schemas: Vec<Value> = state
        .tools
        .schemas()
        .into_iter()
        .map(|s| json!({"name": s.name, "description": s.description, "parameters": s.parameters}))
        .collect();
    Json(json!(schemas))
}

pub async fn list_tool_ids(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.tools.names()))
}

pub async fn openapi_doc() -> Json<Value> {
    Json(json!({
        "openapi": "3.0.0",
        "info": {"title": "opencode-server", "version": "1.0.0"},
        "paths": {},
    }))
}
