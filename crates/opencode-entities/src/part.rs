// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids;

/// Execution state of a [`Part::Tool`].
///
/// Transitions `Pending -> Executing -> {Completed | Failed}`; a `ToolPart`
/// never revisits an earlier state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolState {
    Pending,
    Executing,
    Completed,
    Failed,
}

/// A single tool invocation and its lifecycle, persisted as one Part.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolPart {
    pub id: String,
    pub session_id: String,
    pub message_id: String,
    pub tool_call_id: String,
    pub tool_name: String,
    pub input: Value,
    pub state: ToolState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
}

impl ToolPart {
    pub fn new(
        session_id: impl Into<String>,
        message_id: impl Into<String>,
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        input: Value,
    ) -> Self {
        Self {
            id: ids::next_id(),
            session_id: session_id.into(),
            message_id: message_id.into(),
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            input,
            state: ToolState::Pending,
            output: None,
            error: None,
            started_at: None,
            ended_at: None,
        }
    }

    pub fn start_executing(&mut self) {
        self.state = ToolState::Executing;
        self.started_at = Some(chrono::Utc::now().to_rfc3339());
    }

    pub fn complete(&mut self, output: impl Into<String>) {
        self.state = ToolState::Completed;
        self.output = Some(output.into());
        self.ended_at = Some(chrono::Utc::now().to_rfc3339());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.state = ToolState::Failed;
        self.error = Some(error.into());
        self.ended_at = Some(chrono::Utc::now().to_rfc3339());
    }
}

/// An ordered fragment of a Message: text, reasoning, tool call, attached
/// file, or a step boundary marker. Persisted form carries `"type"` as the
/// serde discriminator (spec §9: favor a tagged sum type over inheritance).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text {
        id: String,
        session_id: String,
        message_id: String,
        text: String,
    },
    Reasoning {
        id: String,
        session_id: String,
        message_id: String,
        text: String,
    },
    Tool(ToolPart),
    File {
        id: String,
        session_id: String,
        message_id: String,
        filename: String,
        mime: String,
        url: String,
    },
    StepStart {
        id: String,
        session_id: String,
        message_id: String,
    },
    StepFinish {
        id: String,
        session_id: String,
        message_id: String,
    },
}

impl Part {
    pub fn new_text(session_id: impl Into<String>, message_id: impl Into<String>) -> Self {
        Part::Text {
            id: ids::next_id(),
            session_id: session_id.into(),
            message_id: message_id.into(),
            text: String::new(),
        }
    }

    pub fn new_reasoning(session_id: impl Into<String>, message_id: impl Into<String>) -> Self {
        Part::Reasoning {
            id: ids::next_id(),
            session_id: session_id.into(),
            message_id: message_id.into(),
            text: String::new(),
        }
    }

    pub fn new_step_start(session_id: impl Into<String>, message_id: impl Into<String>) -> Self {
        Part::StepStart {
            id: ids::next_id(),
            session_id: session_id.into(),
            message_id: message_id.into(),
        }
    }

    pub fn new_step_finish(session_id: impl Into<String>, message_id: impl Into<String>) -> Self {
        Part::StepFinish {
            id: ids::next_id(),
            session_id: session_id.into(),
            message_id: message_id.into(),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Part::Text { id, .. }
            | Part::Reasoning { id, .. }
            | Part::File { id, .. }
            | Part::StepStart { id, .. }
            | Part::StepFinish { id, .. } => id,
            Part::Tool(t) => &t.id,
        }
    }

    pub fn message_id(&self) -> &str {
        match self {
            Part::Text { message_id, .. }
            | Part::Reasoning { message_id, .. }
            | Part::File { message_id, .. }
            | Part::StepStart { message_id, .. }
            | Part::StepFinish { message_id, .. } => message_id,
            Part::Tool(t) => &t.message_id,
        }
    }

    /// Append a text delta in place. No-op for non-text/reasoning variants.
    pub fn append_text(&mut self, delta: &str) {
        match self {
            Part::Text { text, .. } | Part::Reasoning { text, .. } => text.push_str(delta),
            _ => {}
        }
    }

    /// Re-home this part under a different session/message, minting a fresh
    /// id. Used when forking a session: copied parts must not alias the
    /// originals.
    pub fn retarget(&mut self, session_id: &str, message_id: &str) {
        let new_id = ids::next_id();
        match self {
            Part::Text { id, session_id: sid, message_id: mid, .. }
            | Part::Reasoning { id, session_id: sid, message_id: mid, .. }
            | Part::File { id, session_id: sid, message_id: mid, .. }
            | Part::StepStart { id, session_id: sid, message_id: mid }
            | Part::StepFinish { id, session_id: sid, message_id: mid } => {
                *id = new_id;
                *sid = session_id.to_string();
                *mid = message_id.to_string();
            }
            Part::Tool(t) => {
                t.id = new_id;
                t.session_id = session_id.to_string();
                t.message_id = message_id.to_string();
            }
        }
    }
}
