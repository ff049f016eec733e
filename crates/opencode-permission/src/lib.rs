// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Policy matching, command parsing, doom-loop detection, and the async
//! permission broker that gates dangerous tool calls behind operator
//! approval.

pub mod bash;
pub mod broker;
pub mod doom_loop;
pub mod pattern;

pub use bash::{parse as parse_bash, BashCommand};
pub use broker::{
    is_rejected_error, Decision, PermissionBroker, PermissionRequest, PermissionType, PolicyRules,
    RejectedError, Verdict,
};
pub use doom_loop::DoomLoopDetector;
pub use pattern::{most_specific_match, Pattern};
