// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod builtin;
pub mod events;
pub mod policy;
pub mod registry;
pub mod tool;

pub use events::{TodoItem, ToolEvent};
pub use policy::{ApprovalPolicy, ToolPolicy};
pub use registry::{ToolRegistry, ToolSchema};
pub use tool::{OutputCategory, Tool, ToolCall, ToolContext, ToolOutput, ToolOutputPart};

pub use builtin::edit_file::EditFileTool;
pub use builtin::glob::GlobTool;
pub use builtin::grep::GrepTool;
pub use builtin::list_dir::ListDirTool;
pub use builtin::read_file::ReadFileTool;
pub use builtin::shell::ShellTool;
pub use builtin::todo_write::TodoWriteTool;
pub use builtin::web_fetch::WebFetchTool;
pub use builtin::write::WriteTool;

#[cfg(test)]
pub(crate) fn test_context() -> ToolContext {
    use std::sync::Arc;
    ToolContext {
        session_id: "test-session".into(),
        message_id: "test-message".into(),
        call_id: "test-call".into(),
        agent: "build".into(),
        cwd: std::env::temp_dir().to_string_lossy().into_owned(),
        permission: Arc::new(opencode_permission::PermissionBroker::new(
            opencode_events::EventBus::new(),
        )),
    }
}
