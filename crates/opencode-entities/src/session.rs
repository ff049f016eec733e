// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

use crate::ids;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSummary {
    pub additions: u64,
    pub deletions: u64,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionTime {
    pub created: String,
    pub updated: String,
}

/// A conversation: ordered Messages/Parts live under it in storage.
/// `parent_id` is set only for child sessions created by the Subagent
/// Executor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub project_id: String,
    pub directory: String,
    pub title: String,
    pub parent_id: Option<String>,
    pub version: u64,
    pub summary: SessionSummary,
    pub time: SessionTime,
}

impl Session {
    pub fn new(project_id: impl Into<String>, directory: impl Into<String>) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id: ids::next_id(),
            project_id: project_id.into(),
            directory: directory.into(),
            title: String::new(),
            parent_id: None,
            version: 1,
            summary: SessionSummary::default(),
            time: SessionTime {
                created: now.clone(),
                updated: now,
            },
        }
    }

    pub fn child_of(
        parent: &Session,
        project_id: impl Into<String>,
    ) -> Self {
        let mut s = Session::new(project_id, parent.directory.clone());
        s.parent_id = Some(parent.id.clone());
        s
    }

    pub fn touch(&mut self) {
        self.version += 1;
        self.time.updated = chrono::Utc::now().to_rfc3339();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_has_26_char_ulid_id() {
        let s = Session::new("p1", "/tmp");
        assert_eq!(s.id.len(), 26);
    }

    #[test]
    fn child_session_inherits_directory_and_sets_parent_id() {
        let parent = Session::new("p1", "/tmp/work");
        let child = Session::child_of(&parent, "p1");
        assert_eq!(child.directory, parent.directory);
        assert_eq!(child.parent_id, Some(parent.id));
    }

    #[test]
    fn touch_bumps_version_and_updated_time() {
        let mut s = Session::new("p1", "/tmp");
        let before = s.time.updated.clone();
        std::thread::sleep(std::time::Duration::from_millis(2));
        s.touch();
        assert_eq!(s.version, 2);
        assert_ne!(s.time.updated, before);
    }
}
