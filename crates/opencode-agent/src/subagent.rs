// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Subagent executor: runs a focused sub-task under a named agent in a
//! fresh child session, and returns its final text output.
//!
//! This is the counterpart the `task` tool dispatches into. It reuses
//! [`crate::processor::SessionProcessor`] rather than re-implementing a
//! tool-call loop, the same way the legacy task tool reused the top-level
//! agent loop but with a depth guard and a trimmed tool surface.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use opencode_entities::{self as entities, Session as EntSession};
use opencode_tools::{Tool, ToolCall, ToolContext, ToolOutput};

use crate::agent_registry::AgentRegistry;
use crate::processor::{ProcessorError, SessionProcessor};
use crate::runtime_context::AgentRuntimeContext;

/// Maximum subagent nesting depth. A subagent's own turn may itself
/// delegate via the `task` tool, but only up to this many levels deep.
pub const MAX_DEPTH: usize = 3;

#[derive(Debug, Error)]
pub enum SubtaskError {
    #[error("maximum subagent nesting depth ({MAX_DEPTH}) exceeded")]
    DepthExceeded,
    #[error("parent session '{0}' not found")]
    ParentSessionNotFound(String),
    #[error(transparent)]
    Processor(#[from] ProcessorError),
    #[error(transparent)]
    Storage(#[from] opencode_storage::StorageError),
}

/// Per-call options for [`execute_subtask`].
#[derive(Debug, Clone, Default)]
pub struct SubtaskOptions {
    /// Runtime context to thread through to the child session's system
    /// prompt (project root, git/CI notes, `AGENTS.md`).
    pub runtime_ctx: AgentRuntimeContext,
    /// Cancellation token, propagated to the child turn.
    pub cancel: CancellationToken,
}

/// Result of a completed subtask.
#[derive(Debug, Clone)]
pub struct SubtaskOutcome {
    pub session_id: String,
    pub output: String,
}

/// A tracked nesting-depth counter shared by a session's subagent calls.
/// One instance is created per top-level turn and cloned into every
/// subsequent subagent invocation it spawns.
#[derive(Clone, Default)]
pub struct DepthGuard(Arc<AtomicUsize>);

impl DepthGuard {
    pub fn new() -> Self {
        Self(Arc::new(AtomicUsize::new(0)))
    }

    fn enter(&self) -> Result<DepthToken, SubtaskError> {
        let prev = self.0.fetch_add(1, Ordering::SeqCst);
        if prev >= MAX_DEPTH {
            self.0.fetch_sub(1, Ordering::SeqCst);
            return Err(SubtaskError::DepthExceeded);
        }
        Ok(DepthToken(self.0.clone()))
    }
}

struct DepthToken(Arc<AtomicUsize>);

impl Drop for DepthToken {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Spawn `agent_name` as a subagent of `parent_session_id`, give it
/// `prompt` as its sole user turn, run it to completion through the same
/// [`SessionProcessor`] that drives top-level turns, and return its final
/// assistant text.
///
/// Child sessions are persisted like any other (spec requires subagent
/// transcripts be inspectable after the fact) and are linked to the parent
/// via [`opencode_entities::Session::child_of`].
pub async fn execute_subtask(
    processor: &SessionProcessor,
    storage: &opencode_storage::Storage,
    depth: &DepthGuard,
    parent_session_id: &str,
    agent_name: &str,
    prompt: String,
    opts: SubtaskOptions,
) -> Result<SubtaskOutcome, SubtaskError> {
    let _token = depth.enter()?;

    let parent = find_session(storage, parent_session_id)
        .await?
        .ok_or_else(|| SubtaskError::ParentSessionNotFound(parent_session_id.to_string()))?;

    let child = EntSession::child_of(&parent, parent.project_id.clone());
    entities::put_session(storage, &child).await?;

    let outcome = processor
        .submit(&child, agent_name, prompt, &opts.runtime_ctx, opts.cancel)
        .await?;

    Ok(SubtaskOutcome { session_id: child.id, output: outcome.text })
}

/// Look up a session by id alone. [`opencode_entities::get_session`] is
/// keyed by `(project_id, session_id)`; since a subagent call only knows
/// the parent session id, scan the projects the storage backend knows
/// about. Storage is in-process and project counts are small, so a scan
/// is acceptable here.
async fn find_session(
    storage: &opencode_storage::Storage,
    session_id: &str,
) -> Result<Option<EntSession>, opencode_storage::StorageError> {
    for project_id in storage.list(&["session".to_string()]).await {
        if let Some(session) = entities::get_session(storage, &project_id, session_id).await? {
            return Ok(Some(session));
        }
    }
    Ok(None)
}

/// Handle to a [`SessionProcessor`] that becomes available only after the
/// server has finished constructing it.
///
/// [`SessionProcessor`] owns the [`opencode_tools::ToolRegistry`] that
/// registers [`TaskTool`], so the processor cannot exist until the registry
/// (and therefore this tool) already does. [`OnceCell`] breaks the cycle:
/// the tool is registered with an empty handle, and the host calls
/// [`ProcessorHandle::set`] once the processor itself is built.
#[derive(Clone, Default)]
pub struct ProcessorHandle(Arc<OnceCell<Arc<SessionProcessor>>>);

impl ProcessorHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the handle to a constructed processor. Must be called exactly
    /// once, after [`opencode_tools::ToolRegistry::register`] has already
    /// taken ownership of the [`TaskTool`] built from this handle.
    pub fn set(&self, processor: Arc<SessionProcessor>) {
        let _ = self.0.set(processor);
    }

    fn get(&self) -> Option<&Arc<SessionProcessor>> {
        self.0.get()
    }
}

/// The `task` tool: delegates a focused sub-task to a named agent running
/// in its own child session, via [`execute_subtask`].
pub struct TaskTool {
    processor: ProcessorHandle,
    agents: Arc<AgentRegistry>,
    storage: opencode_storage::Storage,
    depth: DepthGuard,
}

impl TaskTool {
    pub fn new(
        processor: ProcessorHandle,
        agents: Arc<AgentRegistry>,
        storage: opencode_storage::Storage,
        depth: DepthGuard,
    ) -> Self {
        Self { processor, agents, storage, depth }
    }
}

#[async_trait]
impl Tool for TaskTool {
    fn name(&self) -> &str {
        "task"
    }

    fn description(&self) -> &str {
        "Delegate a focused sub-task to a named agent running in its own session. Useful \
         for isolating a well-scoped piece of work (e.g. research, a narrow refactor) from \
         the main conversation. Returns the sub-agent's final text output."
    }

    fn parameters_schema(&self) -> Value {
        let agent_names = self.agents.names();
        json!({
            "type": "object",
            "properties": {
                "agent": {
                    "type": "string",
                    "description": "Name of the agent to delegate to",
                    "enum": agent_names,
                },
                "prompt": {
                    "type": "string",
                    "description": "The task description for the sub-agent"
                }
            },
            "required": ["agent", "prompt"]
        })
    }

    fn default_policy(&self) -> opencode_tools::ApprovalPolicy {
        opencode_tools::ApprovalPolicy::Auto
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let Some(processor) = self.processor.get() else {
            return ToolOutput::err(&call.id, "session processor not yet initialized");
        };
        let agent_name = match call.args.get("agent").and_then(Value::as_str) {
            Some(a) => a.to_string(),
            None => return ToolOutput::err(&call.id, "missing 'agent' argument"),
        };
        let prompt = match call.args.get("prompt").and_then(Value::as_str) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err(&call.id, "missing 'prompt' argument"),
        };

        let opts = SubtaskOptions { runtime_ctx: AgentRuntimeContext::default(), cancel: CancellationToken::new() };
        match execute_subtask(processor, &self.storage, &self.depth, &ctx.session_id, &agent_name, prompt, opts).await
        {
            Ok(outcome) => ToolOutput::ok(&call.id, outcome.output),
            Err(err) => ToolOutput::err(&call.id, err.to_string()),
        }
    }
}
