// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Registry of tools whose implementation lives in a remote client
//! (editor extension, IDE plugin, …) rather than the server process.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

const CLIENT_TOOL_PREFIX: &str = "client_";

/// A single client-provided tool definition, as registered by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Prefixed id: `client_<clientId>_<toolId>`.
    pub id: String,
    pub client_id: String,
    pub description: String,
    pub parameters: Value,
}

/// `true` if `id` names a client tool (carries the `client_` prefix).
pub fn is_client_tool(id: &str) -> bool {
    id.starts_with(CLIENT_TOOL_PREFIX)
}

fn prefixed_id(client_id: &str, tool_id: &str) -> String {
    format!("{CLIENT_TOOL_PREFIX}{client_id}_{tool_id}")
}

#[derive(Default)]
struct Inner {
    /// `clientId -> (prefixedToolId -> ToolDefinition)`.
    by_client: HashMap<String, HashMap<String, ToolDefinition>>,
}

/// Process-global registry of client tools, keyed by owning client.
#[derive(Default)]
pub struct ClientToolRegistry {
    inner: RwLock<Inner>,
}

impl ClientToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `tools` (bare ids, as supplied by the client) under
    /// `client_id`, prefixing each id. Replaces any prior registration for
    /// this client.
    pub fn register(&self, client_id: &str, tools: Vec<(String, String, Value)>) -> Vec<ToolDefinition> {
        let defs: HashMap<String, ToolDefinition> = tools
            .into_iter()
            .map(|(tool_id, description, parameters)| {
                let id = prefixed_id(client_id, &tool_id);
                (
                    id.clone(),
                    ToolDefinition {
                        id,
                        client_id: client_id.to_string(),
                        description,
                        parameters,
                    },
                )
            })
            .collect();
        let mut inner = self.inner.write().unwrap();
        inner.by_client.insert(client_id.to_string(), defs.clone());
        defs.into_values().collect()
    }

    /// Remove some (or, if `tool_ids` is empty, all) of a client's tools.
    pub fn unregister(&self, client_id: &str, tool_ids: &[String]) {
        let mut inner = self.inner.write().unwrap();
        let Some(tools) = inner.by_client.get_mut(client_id) else {
            return;
        };
        if tool_ids.is_empty() {
            inner.by_client.remove(client_id);
            return;
        }
        for id in tool_ids {
            let prefixed = prefixed_id(client_id, id);
            tools.remove(&prefixed);
        }
        if tools.is_empty() {
            inner.by_client.remove(client_id);
        }
    }

    pub fn tools_for(&self, client_id: &str) -> Vec<ToolDefinition> {
        self.inner
            .read()
            .unwrap()
            .by_client
            .get(client_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn all_tools(&self) -> Vec<ToolDefinition> {
        self.inner
            .read()
            .unwrap()
            .by_client
            .values()
            .flat_map(|m| m.values().cloned())
            .collect()
    }

    /// Linear scan to identify the client owning `tool_id` (a fully
    /// prefixed id).
    pub fn find_client_for_tool(&self, tool_id: &str) -> Option<String> {
        let inner = self.inner.read().unwrap();
        inner
            .by_client
            .iter()
            .find(|(_, tools)| tools.contains_key(tool_id))
            .map(|(client_id, _)| client_id.clone())
    }

    pub fn lookup(&self, tool_id: &str) -> Option<ToolDefinition> {
        let inner = self.inner.read().unwrap();
        inner.by_client.values().find_map(|m| m.get(tool_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn register_prefixes_tool_ids() {
        let reg = ClientToolRegistry::new();
        let defs = reg.register("c1", vec![("ping".to_string(), "pings".to_string(), json!({}))]);
        assert_eq!(defs[0].id, "client_c1_ping");
        assert!(is_client_tool(&defs[0].id));
    }

    #[test]
    fn find_client_for_tool_locates_owner() {
        let reg = ClientToolRegistry::new();
        reg.register("c1", vec![("ping".to_string(), "pings".to_string(), json!({}))]);
        assert_eq!(reg.find_client_for_tool("client_c1_ping"), Some("c1".to_string()));
        assert_eq!(reg.find_client_for_tool("nope"), None);
    }

    #[test]
    fn unregister_specific_tool_keeps_others() {
        let reg = ClientToolRegistry::new();
        reg.register(
            "c1",
            vec![
                ("ping".to_string(), "pings".to_string(), json!({})),
                ("pong".to_string(), "pongs".to_string(), json!({})),
            ],
        );
        reg.unregister("c1", &["ping".to_string()]);
        let remaining = reg.tools_for("c1");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "client_c1_pong");
    }

    #[test]
    fn unregister_all_removes_client() {
        let reg = ClientToolRegistry::new();
        reg.register("c1", vec![("ping".to_string(), "pings".to_string(), json!({}))]);
        reg.unregister("c1", &[]);
        assert!(reg.tools_for("c1").is_empty());
    }
}
