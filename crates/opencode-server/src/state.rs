// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Process-global application state: the storage facade, event bus, and
//! every registry/broker the HTTP layer dispatches into. One instance is
//! built in `main` and shared (`Arc`) across every request.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use opencode_agent::{AgentRegistry, SessionProcessor};
use opencode_clienttools::ClientToolBroker;
use opencode_config::Config;
use opencode_events::EventBus;
use opencode_permission::{DoomLoopDetector, PermissionBroker};
use opencode_provider::provider_registry::ProviderRegistry;
use opencode_storage::Storage;
use opencode_tools::ToolRegistry;
use tokio::sync::Mutex;

/// Everything an HTTP handler needs to serve a request. Cheap to clone
/// (every field is an `Arc` or already `Clone`); handlers take
/// `State<AppState>` by value.
#[derive(Clone)]
pub struct AppState {
    pub storage: Storage,
    pub events: EventBus,
    pub tools: Arc<ToolRegistry>,
    pub client_tools: Arc<ClientToolBroker>,
    pub permission: Arc<PermissionBroker>,
    pub doom_loop: Arc<DoomLoopDetector>,
    pub providers: Arc<ProviderRegistry>,
    pub agents: Arc<AgentRegistry>,
    pub processor: Arc<SessionProcessor>,
    pub config: Arc<Config>,
    /// Per-session cancellation tokens for in-flight turns, consulted by
    /// `POST /session/{id}/abort`.
    pub aborts: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl AppState {
    /// Register a fresh cancellation token for a turn about to start,
    /// replacing any stale one left behind by a prior completed turn.
    pub async fn new_turn_token(&self, session_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.aborts.lock().await.insert(session_id.to_string(), token.clone());
        token
    }

    /// Cancel the in-flight turn for a session, if any. Returns `true` if a
    /// token was found (the session had an active turn to abort).
    pub async fn abort(&self, session_id: &str) -> bool {
        match self.aborts.lock().await.get(session_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn clear_turn_token(&self, session_id: &str) {
        self.aborts.lock().await.remove(session_id);
    }
}
