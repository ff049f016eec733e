// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Correlated request/response execution of remote client tools over the
//! event bus: a `client.tool.request` is published, the owning client's
//! `/client-tools/pending/{clientID}` SSE subscription picks it up, and the
//! client eventually calls back with a result.

use std::collections::HashMap;
use std::time::Duration;

use opencode_entities::ids;
use opencode_events::{Event, EventBus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};

use crate::registry::ClientToolRegistry;

/// A request to execute a single client tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub tool_id: String,
    pub session_id: String,
    pub message_id: String,
    pub call_id: String,
    pub input: Value,
}

/// The client's callback payload for a prior request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub request_id: String,
    pub status: String, // "success" | "error"
    pub output: Option<Value>,
    pub error: Option<String>,
}

#[derive(Debug, Error)]
pub enum ClientToolError {
    #[error("no client registered for tool {0}")]
    UnknownTool(String),
    #[error("client tool execution timed out after {0:?}")]
    Timeout(Duration),
    #[error("client tool returned an error: {0}")]
    ClientError(String),
    #[error("request cancelled")]
    Cancelled,
}

struct Pending {
    tx: oneshot::Sender<ExecutionResult>,
    client_id: String,
}

/// Async broker dispatching tool execution to remote clients and
/// correlating their eventual `POST /client-tools/result` callback.
pub struct ClientToolBroker {
    events: EventBus,
    registry: ClientToolRegistry,
    pending: Mutex<HashMap<String, Pending>>,
}

impl ClientToolBroker {
    pub fn new(events: EventBus, registry: ClientToolRegistry) -> Self {
        Self {
            events,
            registry,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &ClientToolRegistry {
        &self.registry
    }

    /// Execute a client tool call end-to-end: publish the request, wait for
    /// the client's result (or `timeout`), publish the terminal event.
    pub async fn execute(&self, client_id: &str, req: ExecutionRequest, timeout: Duration) -> Result<Value, ClientToolError> {
        if self.registry.find_client_for_tool(&req.tool_id).as_deref() != Some(client_id) {
            return Err(ClientToolError::UnknownTool(req.tool_id.clone()));
        }

        let request_id = ids::next_id();
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(
                request_id.clone(),
                Pending {
                    tx,
                    client_id: client_id.to_string(),
                },
            );
        }

        self.events
            .publish(Event::new(
                "client.tool.request",
                Some(req.session_id.clone()),
                serde_json::json!({
                    "requestId": request_id,
                    "clientId": client_id,
                    "toolId": req.tool_id,
                    "messageId": req.message_id,
                    "callId": req.call_id,
                    "input": req.input,
                }),
            ))
            .await;
        self.events
            .publish(Event::new(
                "client.tool.executing",
                Some(req.session_id.clone()),
                serde_json::json!({"requestId": request_id, "clientId": client_id}),
            ))
            .await;

        let outcome = tokio::time::timeout(timeout, rx).await;
        self.pending.lock().await.remove(&request_id);

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => return Err(ClientToolError::Cancelled),
            Err(_) => {
                self.events
                    .publish(Event::new(
                        "client.tool.failed",
                        Some(req.session_id.clone()),
                        serde_json::json!({"requestId": request_id, "error": "timeout"}),
                    ))
                    .await;
                return Err(ClientToolError::Timeout(timeout));
            }
        };

        if result.status == "error" {
            let message = result.error.clone().unwrap_or_else(|| "client tool failed".to_string());
            self.events
                .publish(Event::new(
                    "client.tool.failed",
                    Some(req.session_id.clone()),
                    serde_json::json!({"requestId": request_id, "error": message}),
                ))
                .await;
            return Err(ClientToolError::ClientError(message));
        }

        let output = result.output.unwrap_or(Value::Null);
        self.events
            .publish(Event::new(
                "client.tool.completed",
                Some(req.session_id.clone()),
                serde_json::json!({"requestId": request_id, "output": output}),
            ))
            .await;
        Ok(output)
    }

    /// Deliver a client's callback to the pending request it answers.
    /// Returns `false` if no such request is pending.
    pub async fn submit_result(&self, result: ExecutionResult) -> bool {
        let pending = self.pending.lock().await.remove(&result.request_id);
        match pending {
            Some(p) => p.tx.send(result).is_ok(),
            None => false,
        }
    }

    /// Cancel every pending request owned by `client_id` and drop its tools.
    pub async fn cleanup(&self, client_id: &str) {
        let mut pending = self.pending.lock().await;
        let dead: Vec<String> = pending
            .iter()
            .filter(|(_, p)| p.client_id == client_id)
            .map(|(id, _)| id.clone())
            .collect();
        for id in dead {
            pending.remove(&id);
        }
        drop(pending);
        self.registry.unregister(client_id, &[]);
    }
}
