// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Registry and broker for tools whose implementation lives in a remote
//! client (editor extension, IDE plugin, …) rather than the server
//! process itself.

pub mod broker;
pub mod registry;

pub use broker::{ClientToolBroker, ClientToolError, ExecutionRequest, ExecutionResult};
pub use registry::{is_client_tool, ClientToolRegistry, ToolDefinition};
