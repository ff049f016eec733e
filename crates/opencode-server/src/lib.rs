// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The HTTP back-end: [`AppState`] plus the axum router that dispatches
//! every request in spec §6.1 onto a handler in [`http`].

pub mod error;
pub mod http;
pub mod state;

use axum::http::{Method, StatusCode};
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

pub use error::ApiError;
pub use state::AppState;

async fn not_found() -> (StatusCode, axum::Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        axum::Json(serde_json::json!({"error": {"code": "NOT_FOUND", "message": "not found"}})),
    )
}

/// Build the full REST surface over `state`. CORS is always-on and
/// permissive (spec §6.1): any origin, the five verbs the API uses plus
/// `OPTIONS`, any header.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        // Session
        .route("/session", get(http::session::list_sessions).post(http::session::create_session))
        .route("/session/status", get(http::session::session_status))
        .route(
            "/session/:id",
            get(http::session::get_session)
                .patch(http::session::patch_session)
                .delete(http::session::delete_session),
        )
        .route("/session/:id/abort", post(http::session::abort_session))
        .route("/session/:id/init", post(http::session::init_session))
        .route("/session/:id/fork", post(http::session::fork_session))
        .route(
            "/session/:id/share",
            post(http::session::share_session).delete(http::session::unshare_session),
        )
        // Messages
        .route(
            "/session/:id/message",
            get(http::message::list_messages).post(http::message::post_message),
        )
        .route("/session/:id/message/:msg_id", get(http::message::get_message))
        // Events (SSE)
        .route("/event", get(http::sse::session_event))
        .route("/global/event", get(http::sse::global_event))
        // Permission
        .route("/permission/:id/respond", post(http::permission::respond))
        // Client tools
        .route("/client-tools/tools", get(http::clienttools::list_all_tools))
        .route("/client-tools/tools/:client_id", get(http::clienttools::list_client_tools))
        .route("/client-tools/register", post(http::clienttools::register))
        .route("/client-tools/unregister", delete(http::clienttools::unregister))
        .route("/client-tools/execute", post(http::clienttools::execute))
        .route("/client-tools/result", post(http::clienttools::result))
        .route("/client-tools/pending/:client_id", get(http::sse::client_tool_pending))
        // Files & search
        .route("/file", get(http::files::file_info))
        .route("/file/content", get(http::files::file_content))
        .route("/file/status", get(http::files::file_status))
        .route("/find", get(http::files::find_in_files))
        .route("/find/file", get(http::files::find_files))
        .route("/find/symbol", get(http::files::find_symbol))
        // Config / inventory
        .route("/config", get(http::inventory::get_config))
        .route("/config/providers", get(http::inventory::get_config_providers))
        .route("/agent", get(http::inventory::get_agents))
        .route("/command", get(http::inventory::list_commands))
        .route(
            "/command/:name",
            get(http::inventory::get_command).post(http::inventory::run_command),
        )
        .route("/formatter", get(http::inventory::list_formatters))
        .route("/formatter/format", post(http::inventory::format_files))
        .route("/mcp", get(http::inventory::list_mcp).post(http::inventory::add_mcp_server))
        .route("/mcp/tools", get(http::inventory::list_mcp_tools))
        .route("/mcp/resources", get(http::inventory::list_mcp_resources))
        .route("/mcp/resource", get(http::inventory::get_mcp_resource))
        .route("/mcp/:name", delete(http::inventory::remove_mcp_server))
        .route("/mcp/tool/:name", post(http::inventory::call_mcp_tool))
        .route("/lsp", get(http::inventory::list_lsp))
        .route("/vcs", get(http::inventory::vcs_info))
        .route("/project", get(http::inventory::list_projects))
        .route("/project/current", get(http::inventory::current_project))
        .route("/path", get(http::inventory::get_path))
        .route("/experimental/tool", get(http::inventory::list_tools))
        .route("/experimental/tool/ids", get(http::inventory::list_tool_ids))
        .route("/doc", get(http::inventory::openapi_doc))
        .fallback(not_found)
        .layer(cors)
        .with_state(state)
}
