// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Named agent bundles and the process-global registry that holds them.
//!
//! An [`AgentDefinition`] is a host-configured bundle: operating mode,
//! default provider/model, system prompt, step budget, and a glob-pattern
//! tool enable/disable map layered on top of the mode-based gating that
//! [`opencode_tools::ToolRegistry::names_for_mode`] already provides.
//! Agent definitions are plug-ins, not file-discovered: the host registers
//! them by calling [`AgentRegistry::register`].

use std::collections::HashMap;
use std::sync::Arc;

use opencode_config::{AgentMode, Config};
use opencode_permission::pattern::Pattern;

/// Glob-pattern tool enable/disable map: `{pattern → bool}`.
///
/// [`Self::tool_enabled`] checks an exact-name entry first, then falls back
/// to the most specific matching pattern (see
/// [`opencode_permission::pattern::Pattern::specificity`]); a tool with no
/// matching entry is enabled by default.
#[derive(Debug, Clone, Default)]
pub struct ToolGate {
    entries: Vec<(Pattern, bool)>,
}

impl ToolGate {
    pub fn new(entries: impl IntoIterator<Item = (String, bool)>) -> Self {
        Self {
            entries: entries.into_iter().map(|(raw, enabled)| (Pattern::new(raw), enabled)).collect(),
        }
    }

    pub fn tool_enabled(&self, name: &str) -> bool {
        if let Some((_, enabled)) = self.entries.iter().find(|(p, _)| p.raw == name) {
            return *enabled;
        }
        self.entries
            .iter()
            .filter(|(p, _)| p.matches(name))
            .max_by_key(|(p, _)| p.specificity())
            .map(|(_, enabled)| *enabled)
            .unwrap_or(true)
    }
}

/// A named, host-configured agent bundle.
#[derive(Debug, Clone)]
pub struct AgentDefinition {
    pub name: String,
    pub description: String,
    pub mode: AgentMode,
    /// Provider id to use when the caller doesn't override one explicitly.
    pub default_provider: Option<String>,
    /// Model id to use when the caller doesn't override one explicitly.
    pub default_model: Option<String>,
    pub system_prompt: Option<String>,
    /// Maximum outer-loop iterations for a turn run under this agent.
    pub max_steps: u32,
    tool_gate: ToolGate,
}

impl AgentDefinition {
    pub fn new(name: impl Into<String>, mode: AgentMode, max_steps: u32) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            mode,
            default_provider: None,
            default_model: None,
            system_prompt: None,
            max_steps,
            tool_gate: ToolGate::default(),
        }
    }

    pub fn with_tool_gate(mut self, gate: ToolGate) -> Self {
        self.tool_gate = gate;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_default_model(mut self, provider: impl Into<String>, model: impl Into<String>) -> Self {
        self.default_provider = Some(provider.into());
        self.default_model = Some(model.into());
        self
    }

    /// Spec §4.G: exact name first, then patterns; default is enabled.
    pub fn tool_enabled(&self, tool_name: &str) -> bool {
        self.tool_gate.tool_enabled(tool_name)
    }
}

/// Process-global, read-mostly registry of [`AgentDefinition`]s.
pub struct AgentRegistry {
    agents: HashMap<String, Arc<AgentDefinition>>,
    default_agent: String,
}

impl AgentRegistry {
    pub fn new(default_agent: impl Into<String>) -> Self {
        Self { agents: HashMap::new(), default_agent: default_agent.into() }
    }

    pub fn register(&mut self, agent: AgentDefinition) {
        self.agents.insert(agent.name.clone(), Arc::new(agent));
    }

    pub fn get(&self, name: &str) -> Option<Arc<AgentDefinition>> {
        self.agents.get(name).cloned()
    }

    pub fn default_agent(&self) -> Arc<AgentDefinition> {
        self.agents
            .get(&self.default_agent)
            .cloned()
            .unwrap_or_else(|| panic!("default agent '{}' not registered", self.default_agent))
    }

    pub fn names(&self) -> Vec<&str> {
        self.agents.keys().map(String::as_str).collect()
    }
}

/// Seeds a registry with one builtin agent per [`AgentMode`] (`research`,
/// `plan`, `agent`), named after the mode, each with an empty tool gate —
/// mode-based filtering in [`opencode_tools::ToolRegistry`] already scopes
/// their tool surface, so the pattern map only needs entries when a host
/// wants to further restrict a specific named agent. The default agent is
/// `config.agent.default_mode`.
pub fn builtin_agents(config: &Config) -> AgentRegistry {
    let max_steps = config.agent.max_tool_rounds;
    let mut registry = AgentRegistry::new(config.agent.default_mode.to_string());

    registry.register(
        AgentDefinition::new("research", AgentMode::Research, max_steps)
            .with_description("Read-only investigation: no file writes, no shell side effects."),
    );
    registry.register(
        AgentDefinition::new("plan", AgentMode::Plan, max_steps)
            .with_description("Produces a structured plan without making changes."),
    );
    let mut agent = AgentDefinition::new("agent", AgentMode::Agent, max_steps)
        .with_description("Full read/write agent.");
    if let Some(prompt) = &config.agent.system_prompt {
        agent = agent.with_system_prompt(prompt.clone());
    }
    registry.register(agent);

    registry
}
