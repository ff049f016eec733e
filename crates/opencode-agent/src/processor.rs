// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The Session Processor: drives one turn of a session through the
//! tool-execution loop — persist the user input, repeatedly call the model,
//! dispatch any tool calls it requests, and persist every step — until the
//! model stops requesting tools or the agent's step budget is exhausted.
//!
//! Ownership split with the rest of the crate: [`prompts`] builds the system
//! prompt, [`compact`] rewrites history when it grows too large, and this
//! module is the only piece that actually drives a turn end to end.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use opencode_clienttools::{ClientToolBroker, ExecutionRequest};
use opencode_config::Config;
use opencode_entities::{
    self as entities, Message as EntMessage, Part as EntPart, Role as EntRole, Session as EntSession,
    ToolPart, ToolState,
};
use opencode_events::{Event, EventBus};
use opencode_permission::{DoomLoopDetector, PermissionBroker, PermissionType, RejectedError};
use opencode_provider::{
    provider_registry::ProviderRegistry, CompletionRequest, FunctionCall, Message as ProviderMessage,
    MessageContent, ResponseEvent, Role as ProviderRole, ToolSchema as ProviderToolSchema,
};
use opencode_storage::Storage;
use opencode_tools::{OutputCategory, Tool, ToolCall, ToolContext, ToolRegistry};

use crate::agent_registry::{AgentDefinition, AgentRegistry};
use crate::compact::compact_session_with_strategy;
use crate::prompts::{self, PromptContext};
use crate::runtime_context::AgentRuntimeContext;

/// Default per-tool-call execution timeout, used when neither
/// `config.agent.max_step_timeout_secs` nor `config.tools.timeout_secs`
/// applies (client tools, which have no per-tool config knob).
const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("session '{0}' is busy processing another turn")]
    SessionBusy(String),
    #[error("unknown agent: {0}")]
    UnknownAgent(String),
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("turn cancelled")]
    Cancelled,
    #[error("step budget of {0} exhausted without the model finishing")]
    StepBudgetExhausted(u32),
    #[error("permission denied: {0}")]
    PermissionDenied(#[from] RejectedError),
    #[error(transparent)]
    Storage(#[from] opencode_storage::StorageError),
    #[error(transparent)]
    Provider(#[from] anyhow::Error),
}

/// How [`SessionProcessor::submit`] behaves when a session's turn lock is
/// already held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Return [`ProcessorError::SessionBusy`] immediately.
    FailFast,
    /// Wait for the in-flight turn to finish, then proceed.
    Block,
}

/// Everything the Session Processor needs to drive a turn: the entity store,
/// event bus, tool surfaces, permission/doom-loop guards, and the provider
/// and agent registries. Constructed once per process and shared (`Arc`)
/// across requests.
pub struct SessionProcessor {
    storage: Storage,
    events: EventBus,
    tools: Arc<ToolRegistry>,
    client_tools: Arc<ClientToolBroker>,
    permission: Arc<PermissionBroker>,
    doom_loop: Arc<DoomLoopDetector>,
    providers: Arc<ProviderRegistry>,
    agents: Arc<AgentRegistry>,
    config: Config,
    lock_mode: LockMode,
    session_locks: AsyncMutex<BTreeMap<String, Arc<AsyncMutex<()>>>>,
}

/// Result of one completed turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Id of the final assistant message produced this turn.
    pub assistant_message_id: String,
    /// Concatenated text of the final assistant message.
    pub text: String,
    /// Number of outer-loop steps taken.
    pub steps: u32,
}

impl SessionProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: Storage,
        events: EventBus,
        tools: Arc<ToolRegistry>,
        client_tools: Arc<ClientToolBroker>,
        permission: Arc<PermissionBroker>,
        doom_loop: Arc<DoomLoopDetector>,
        providers: Arc<ProviderRegistry>,
        agents: Arc<AgentRegistry>,
        config: Config,
        lock_mode: LockMode,
    ) -> Self {
        Self {
            storage,
            events,
            tools,
            client_tools,
            permission,
            doom_loop,
            providers,
            agents,
            config,
            lock_mode,
            session_locks: AsyncMutex::new(BTreeMap::new()),
        }
    }

    async fn lock_for(&self, session_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.session_locks.lock().await;
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Submit a user turn and drive it to completion (or cancellation).
    ///
    /// `runtime_ctx` carries environment-detected prompt context (project
    /// root, git/CI notes, `AGENTS.md` contents); `cancel` aborts the turn at
    /// the next step boundary or mid-stream.
    pub async fn submit(
        &self,
        session: &EntSession,
        agent_name: &str,
        user_text: String,
        runtime_ctx: &AgentRuntimeContext,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome, ProcessorError> {
        let agent = self
            .agents
            .get(agent_name)
            .ok_or_else(|| ProcessorError::UnknownAgent(agent_name.to_string()))?;

        let lock = self.lock_for(&session.id).await;
        let _guard = match self.lock_mode {
            LockMode::FailFast => lock
                .clone()
                .try_lock_owned()
                .map_err(|_| ProcessorError::SessionBusy(session.id.clone()))?,
            LockMode::Block => lock.clone().lock_owned().await,
        };

        let provider_id = agent
            .default_provider
            .clone()
            .unwrap_or_else(|| self.config.model.provider.clone());
        let provider = self
            .providers
            .get(&provider_id)
            .ok_or_else(|| ProcessorError::UnknownProvider(provider_id.clone()))?;

        self.persist_user_turn(session, &user_text).await?;

        let outcome = self.run_loop(session, &agent, &provider_id, provider.model_name(), runtime_ctx, cancel).await;

        self.doom_loop.clear(&session.id);

        outcome
    }

    async fn persist_user_turn(&self, session: &EntSession, text: &str) -> Result<(), ProcessorError> {
        let message = EntMessage::new(&session.id, EntRole::User);
        entities::put_message(&self.storage, &message).await?;
        self.events.publish(Event::new(
            "message.created",
            Some(session.id.clone()),
            serde_json::to_value(&message).unwrap_or(Value::Null),
        )).await;

        let mut part = EntPart::new_text(&session.id, &message.id);
        part.append_text(text);
        entities::put_part(&self.storage, &part).await?;
        self.events.publish(Event::new(
            "message.part.updated",
            Some(session.id.clone()),
            serde_json::to_value(&part).unwrap_or(Value::Null),
        )).await;
        Ok(())
    }

    async fn run_loop(
        &self,
        session: &EntSession,
        agent: &AgentDefinition,
        provider_id: &str,
        model_id: &str,
        runtime_ctx: &AgentRuntimeContext,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome, ProcessorError> {
        let provider = self
            .providers
            .get(provider_id)
            .ok_or_else(|| ProcessorError::UnknownProvider(provider_id.to_string()))?;

        let registered_agents = self.agents.names();
        let agent_defs: Vec<AgentDefinition> = registered_agents
            .iter()
            .filter_map(|name| self.agents.get(name))
            .filter(|a| a.name != agent.name)
            .map(|a| (*a).clone())
            .collect();

        let prompt_ctx = PromptContext {
            project_root: runtime_ctx.project_root.as_deref(),
            git_context: runtime_ctx.git_context_note.as_deref(),
            project_context_file: runtime_ctx.project_context_file.as_deref(),
            ci_context: runtime_ctx.ci_context_note.as_deref(),
            append: runtime_ctx.append_system_prompt.as_deref(),
            agents: &agent_defs,
        };
        let system_text = prompts::system_prompt(
            agent.mode,
            runtime_ctx
                .system_prompt_override
                .as_deref()
                .or(agent.system_prompt.as_deref()),
            prompt_ctx,
        );

        let tool_names: Vec<String> = self
            .tools
            .names_for_mode(agent.mode)
            .into_iter()
            .filter(|name| agent.tool_enabled(name))
            .collect();
        let mut tool_schemas: Vec<ProviderToolSchema> = self
            .tools
            .schemas_for_mode(agent.mode)
            .into_iter()
            .filter(|s| tool_names.contains(&s.name))
            .map(|s| ProviderToolSchema { name: s.name, description: s.description, parameters: s.parameters })
            .collect();
        for def in self.client_tools.registry().all_tools() {
            tool_schemas.push(ProviderToolSchema {
                name: def.id,
                description: def.description,
                parameters: def.parameters,
            });
        }

        let mut last_message_id = String::new();
        let mut last_text = String::new();
        let mut step: u32 = 0;
        let mut current_message: Option<EntMessage> = None;

        loop {
            if cancel.is_cancelled() {
                if let Some(message) = current_message.take() {
                    self.finalize_turn(session, message, None).await?;
                }
                return Err(ProcessorError::Cancelled);
            }
            if step >= agent.max_steps {
                self.events.publish(Event::new(
                    "session.error",
                    Some(session.id.clone()),
                    serde_json::json!({"message": "step budget exhausted"}),
                )).await;
                let message = match current_message.take() {
                    Some(m) => m,
                    None => {
                        let m = EntMessage::new(&session.id, EntRole::Assistant).with_model(provider_id, model_id);
                        entities::put_message(&self.storage, &m).await?;
                        self.events.publish(Event::new(
                            "message.created",
                            Some(session.id.clone()),
                            serde_json::to_value(&m).unwrap_or(Value::Null),
                        )).await;
                        m
                    }
                };
                self.finalize_turn(session, message, Some("max steps reached")).await?;
                return Err(ProcessorError::StepBudgetExhausted(agent.max_steps));
            }
            step += 1;

            let mut history = self.reconstruct_history(&session.id).await?;
            self.maybe_compact(&mut history, &system_text);

            let mut messages = vec![ProviderMessage::system(&system_text)];
            messages.extend(history);

            let assistant_message = EntMessage::new(&session.id, EntRole::Assistant).with_model(provider_id, model_id);
            entities::put_message(&self.storage, &assistant_message).await?;
            let step_start = EntPart::new_step_start(&session.id, &assistant_message.id);
            entities::put_part(&self.storage, &step_start).await?;
            self.events.publish(Event::new(
                "message.created",
                Some(session.id.clone()),
                serde_json::to_value(&assistant_message).unwrap_or(Value::Null),
            )).await;
            current_message = Some(assistant_message.clone());

            let req = CompletionRequest {
                messages,
                tools: tool_schemas.clone(),
                stream: true,
                system_dynamic_suffix: None,
                cache_key: Some(session.id.clone()),
            };

            let mut stream = provider.complete(req).await?;

            let mut text_part: Option<EntPart> = None;
            let mut reasoning_part: Option<EntPart> = None;
            let mut pending_calls: BTreeMap<u32, PendingCall> = BTreeMap::new();
            let mut hit_max_tokens = false;
            let mut done = false;

            while let Some(item) = stream.next().await {
                if cancel.is_cancelled() {
                    self.finalize_turn(session, assistant_message.clone(), None).await?;
                    return Err(ProcessorError::Cancelled);
                }
                match item? {
                    ResponseEvent::TextDelta(delta) => {
                        let part = text_part.get_or_insert_with(|| EntPart::new_text(&session.id, &assistant_message.id));
                        part.append_text(&delta);
                        entities::put_part(&self.storage, part).await?;
                        self.events.publish(Event::new(
                            "message.part.updated",
                            Some(session.id.clone()),
                            serde_json::to_value(part).unwrap_or(Value::Null),
                        )).await;
                    }
                    ResponseEvent::ThinkingDelta(delta) => {
                        let part = reasoning_part
                            .get_or_insert_with(|| EntPart::new_reasoning(&session.id, &assistant_message.id));
                        part.append_text(&delta);
                        entities::put_part(&self.storage, part).await?;
                    }
                    ResponseEvent::ToolCall { index, id, name, arguments } => {
                        pending_calls.insert(index, PendingCall { id, name, arguments });
                    }
                    ResponseEvent::MaxTokens => {
                        hit_max_tokens = true;
                        done = true;
                    }
                    ResponseEvent::Usage { .. } => {}
                    ResponseEvent::Done => {
                        done = true;
                    }
                    ResponseEvent::Error(message) => {
                        self.events.publish(Event::new(
                            "session.error",
                            Some(session.id.clone()),
                            serde_json::json!({"message": message}),
                        )).await;
                    }
                }
                if done {
                    break;
                }
            }

            let _ = hit_max_tokens;

            let step_finish = EntPart::new_step_finish(&session.id, &assistant_message.id);
            entities::put_part(&self.storage, &step_finish).await?;

            last_message_id = assistant_message.id.clone();
            last_text = match &text_part {
                Some(EntPart::Text { text, .. }) => text.clone(),
                _ => String::new(),
            };

            if pending_calls.is_empty() {
                let mut completed = assistant_message;
                completed.complete();
                entities::put_message(&self.storage, &completed).await?;
                self.events.publish(Event::new(
                    "session.idle",
                    Some(session.id.clone()),
                    serde_json::json!({"messageId": completed.id}),
                )).await;
                return Ok(TurnOutcome { assistant_message_id: last_message_id, text: last_text, steps: step });
            }

            for (_, call) in pending_calls {
                self.execute_tool_call(session, agent, &assistant_message.id, call, &cancel).await?;
            }
        }
    }

    /// Close out a turn that didn't reach its normal completion point (abort
    /// or step-budget exhaustion): fail any `ToolPart` still `Pending` or
    /// `Executing` on `message`, optionally record an error `Part`, then mark
    /// `message` completed and publish `session.idle` so clients waiting on
    /// the turn unblock instead of hanging on a message that never finishes.
    async fn finalize_turn(
        &self,
        session: &EntSession,
        mut message: EntMessage,
        error_text: Option<&str>,
    ) -> Result<(), ProcessorError> {
        let parts = entities::list_parts(&self.storage, &message.id).await?;
        for part in parts {
            if let EntPart::Tool(mut tool_part) = part {
                if matches!(tool_part.state, ToolState::Pending | ToolState::Executing) {
                    tool_part.fail("aborted");
                    entities::put_part(&self.storage, &EntPart::Tool(tool_part.clone())).await?;
                    self.events.publish(Event::new(
                        "message.part.updated",
                        Some(session.id.clone()),
                        serde_json::to_value(&tool_part).unwrap_or(Value::Null),
                    )).await;
                }
            }
        }

        if let Some(text) = error_text {
            let mut error_part = EntPart::new_text(&session.id, &message.id);
            if let EntPart::Text { text: t, .. } = &mut error_part {
                t.push_str(text);
            }
            entities::put_part(&self.storage, &error_part).await?;
            self.events.publish(Event::new(
                "message.part.updated",
                Some(session.id.clone()),
                serde_json::to_value(&error_part).unwrap_or(Value::Null),
            )).await;
        }

        message.complete();
        entities::put_message(&self.storage, &message).await?;
        self.events.publish(Event::new(
            "session.idle",
            Some(session.id.clone()),
            serde_json::json!({"messageId": message.id}),
        )).await;
        Ok(())
    }

    /// Reconstruct `opencode_provider::Message` history from persisted
    /// entities. Reasoning parts are not replayed into history — they are
    /// provider-side scratch space, not something the model needs to see
    /// again on a later turn.
    async fn reconstruct_history(&self, session_id: &str) -> Result<Vec<ProviderMessage>, ProcessorError> {
        let messages = entities::list_messages(&self.storage, session_id).await?;
        let mut out = Vec::new();
        for m in &messages {
            let parts = entities::list_parts(&self.storage, &m.id).await?;
            match m.role {
                EntRole::User => {
                    let text = concat_text(&parts);
                    if !text.is_empty() {
                        out.push(ProviderMessage::user(text));
                    }
                }
                EntRole::System => {
                    let text = concat_text(&parts);
                    if !text.is_empty() {
                        out.push(ProviderMessage::system(text));
                    }
                }
                EntRole::Assistant => {
                    let text = concat_text(&parts);
                    if !text.is_empty() {
                        out.push(ProviderMessage::assistant(text));
                    }
                    for p in &parts {
                        if let EntPart::Tool(tp) = p {
                            out.push(ProviderMessage {
                                role: ProviderRole::Assistant,
                                content: MessageContent::ToolCall {
                                    tool_call_id: tp.tool_call_id.clone(),
                                    function: FunctionCall { name: tp.tool_name.clone(), arguments: tp.input.to_string() },
                                },
                            });
                            match tp.state {
                                ToolState::Completed => {
                                    out.push(ProviderMessage::tool_result(&tp.tool_call_id, tp.output.clone().unwrap_or_default()));
                                }
                                ToolState::Failed => {
                                    out.push(ProviderMessage::tool_result(&tp.tool_call_id, tp.error.clone().unwrap_or_default()));
                                }
                                ToolState::Pending | ToolState::Executing => {}
                            }
                        }
                    }
                }
                EntRole::Tool => {}
            }
        }
        Ok(out)
    }

    fn maybe_compact(&self, history: &mut Vec<ProviderMessage>, system_text: &str) {
        let system_tokens = ProviderMessage::system(system_text).approx_tokens();
        let history_tokens: usize = history.iter().map(|m| m.approx_tokens()).sum();
        let total = system_tokens + history_tokens;
        let window = self
            .providers
            .all_models()
            .into_iter()
            .map(|e| e.context_window as usize)
            .max()
            .unwrap_or(128_000);
        let threshold = (window as f32 * self.config.agent.compaction_threshold) as usize;
        if total > threshold {
            compact_session_with_strategy(history, None, &self.config.agent.compaction_strategy);
        }
    }

    async fn execute_tool_call(
        &self,
        session: &EntSession,
        agent: &AgentDefinition,
        message_id: &str,
        call: PendingCall,
        cancel: &CancellationToken,
    ) -> Result<(), ProcessorError> {
        let input: Value = serde_json::from_str(&call.arguments).unwrap_or(Value::Null);
        let mut tool_part = ToolPart::new(&session.id, message_id, &call.id, &call.name, input.clone());
        entities::put_part(&self.storage, &EntPart::Tool(tool_part.clone())).await?;
        self.events.publish(Event::new(
            "message.part.updated",
            Some(session.id.clone()),
            serde_json::to_value(&tool_part).unwrap_or(Value::Null),
        )).await;

        tool_part.start_executing();
        entities::put_part(&self.storage, &EntPart::Tool(tool_part.clone())).await?;
        self.events.publish(Event::new(
            "message.part.updated",
            Some(session.id.clone()),
            serde_json::to_value(&tool_part).unwrap_or(Value::Null),
        )).await;

        if self.doom_loop.record(&session.id, &call.name, &input) {
            let cancel_fut = cancel.cancelled();
            let verdict = self
                .permission
                .ask(
                    &agent.name,
                    &session.id,
                    PermissionType::DoomLoop,
                    format!("Repeated identical call to `{}`", call.name),
                    &call.name,
                    serde_json::json!({"input": input}),
                    cancel_fut,
                )
                .await;
            if let Err(rejected) = verdict {
                tool_part.fail(rejected.to_string());
                entities::put_part(&self.storage, &EntPart::Tool(tool_part.clone())).await?;
                self.events.publish(Event::new(
                    "message.part.updated",
                    Some(session.id.clone()),
                    serde_json::to_value(&tool_part).unwrap_or(Value::Null),
                )).await;
                return Ok(());
            }
        }

        let timeout = self.tool_timeout(&call.name);
        let output = if opencode_clienttools::is_client_tool(&call.name) {
            self.run_client_tool(session, message_id, &call, input.clone(), timeout).await
        } else {
            self.run_builtin_tool(session, agent, &call, input.clone(), timeout).await
        };

        match output {
            Ok(content) => tool_part.complete(content),
            Err(message) => tool_part.fail(message),
        }
        entities::put_part(&self.storage, &EntPart::Tool(tool_part.clone())).await?;
        self.events.publish(Event::new(
            "message.part.updated",
            Some(session.id.clone()),
            serde_json::to_value(&tool_part).unwrap_or(Value::Null),
        )).await;
        Ok(())
    }

    fn tool_timeout(&self, _tool_name: &str) -> Duration {
        let secs = if self.config.agent.max_step_timeout_secs > 0 {
            self.config.agent.max_step_timeout_secs
        } else if self.config.tools.timeout_secs > 0 {
            self.config.tools.timeout_secs
        } else {
            DEFAULT_TOOL_TIMEOUT_SECS
        };
        Duration::from_secs(secs)
    }

    async fn run_client_tool(
        &self,
        session: &EntSession,
        message_id: &str,
        call: &PendingCall,
        input: Value,
        timeout: Duration,
    ) -> Result<String, String> {
        let req = ExecutionRequest {
            tool_id: call.name.clone(),
            session_id: session.id.clone(),
            message_id: message_id.to_string(),
            call_id: call.id.clone(),
            input,
        };
        let Some(client_id) = self.client_tools.registry().find_client_for_tool(&call.name) else {
            return Err(format!("no client registered for tool {}", call.name));
        };
        match self.client_tools.execute(&client_id, req, timeout).await {
            Ok(value) => Ok(value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string())),
            Err(err) => Err(err.to_string()),
        }
    }

    async fn run_builtin_tool(
        &self,
        session: &EntSession,
        agent: &AgentDefinition,
        call: &PendingCall,
        input: Value,
        timeout: Duration,
    ) -> Result<String, String> {
        let Some(tool) = self.tools.get(&call.name) else {
            return Err(format!("unknown tool: {}", call.name));
        };
        let ctx = ToolContext {
            session_id: session.id.clone(),
            message_id: call.id.clone(),
            call_id: call.id.clone(),
            agent: agent.name.clone(),
            cwd: session.directory.clone(),
            permission: self.permission.clone(),
        };
        let tool_call = ToolCall { id: call.id.clone(), name: call.name.clone(), args: input };
        let category = tool.output_category();
        let result = tokio::time::timeout(timeout, self.tools.execute(&tool_call, &ctx)).await;
        match result {
            Ok(output) => {
                let capped = crate::compact::smart_truncate(
                    &output.content,
                    category,
                    self.config.agent.tool_result_token_cap,
                );
                if output.is_error {
                    Err(capped)
                } else {
                    Ok(capped)
                }
            }
            Err(_) => Err(format!("tool '{}' timed out after {:?}", call.name, timeout)),
        }
    }
}

/// One tool call accumulated across its `ResponseEvent::ToolCall` deltas,
/// keyed by the call's `index` within the current step's batch — `arguments`
/// carries the provider's own running-accumulated JSON, so the latest event
/// for a given index simply replaces the prior one.
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

fn concat_text(parts: &[EntPart]) -> String {
    parts
        .iter()
        .filter_map(|p| match p {
            EntPart::Text { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("")
}
