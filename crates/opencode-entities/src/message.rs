// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

use crate::ids;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessagePath {
    pub cwd: String,
    pub root: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageTime {
    pub created: String,
    pub completed: Option<String>,
}

/// A single turn participant. Content is not stored here — it lives in
/// ordered Parts under `part/<messageId>/<partId>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    pub provider_id: Option<String>,
    pub model_id: Option<String>,
    pub path: Option<MessagePath>,
    pub time: MessageTime,
}

impl Message {
    pub fn new(session_id: impl Into<String>, role: Role) -> Self {
        Self {
            id: ids::next_id(),
            session_id: session_id.into(),
            role,
            provider_id: None,
            model_id: None,
            path: None,
            time: MessageTime {
                created: chrono::Utc::now().to_rfc3339(),
                completed: None,
            },
        }
    }

    pub fn with_model(mut self, provider_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self.model_id = Some(model_id.into());
        self
    }

    pub fn complete(&mut self) {
        self.time.completed = Some(chrono::Utc::now().to_rfc3339());
    }

    pub fn is_completed(&self) -> bool {
        self.time.completed.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_message_is_not_completed() {
        let m = Message::new("s1", Role::User);
        assert!(!m.is_completed());
    }

    #[test]
    fn complete_sets_completed_timestamp() {
        let mut m = Message::new("s1", Role::Assistant);
        m.complete();
        assert!(m.is_completed());
    }

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&Role::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
    }
}
