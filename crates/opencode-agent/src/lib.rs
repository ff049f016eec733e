// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod agent_registry;
mod compact;
mod processor;
mod prompts;
mod runtime_context;
mod subagent;

pub use agent_registry::{builtin_agents, AgentDefinition, AgentRegistry, ToolGate};
pub use compact::{
    compact_session, compact_session_with_strategy, emergency_compact, smart_truncate,
};
pub use processor::{LockMode, ProcessorError, SessionProcessor, TurnOutcome};
pub use prompts::{system_prompt, PromptContext};
pub use runtime_context::AgentRuntimeContext;
pub use subagent::{
    execute_subtask, DepthGuard, ProcessorHandle, SubtaskError, SubtaskOptions, SubtaskOutcome,
    TaskTool,
};
