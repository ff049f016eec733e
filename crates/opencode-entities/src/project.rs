// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

use crate::ids;

/// A project is never persisted as a mutable row; it is derived on demand
/// from the worktree path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Project {
    pub id: String,
    pub worktree: String,
    pub vcs: Option<String>,
    pub time_created: String,
}

impl Project {
    pub fn for_worktree(worktree: impl Into<String>, vcs: Option<String>) -> Self {
        let worktree = worktree.into();
        Self {
            id: ids::project_id(&worktree),
            worktree,
            vcs,
            time_created: chrono::Utc::now().to_rfc3339(),
        }
    }
}
