// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The permission broker: policy matching plus an async ask/approve/deny
//! protocol with per-session pattern caching.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;

use opencode_entities::ids;
use opencode_events::{Event, EventBus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};

use crate::pattern::most_specific_match;

/// The kind of action a permission request guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionType {
    Edit,
    Bash,
    Webfetch,
    ExternalDir,
    DoomLoop,
}

impl PermissionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionType::Edit => "edit",
            PermissionType::Bash => "bash",
            PermissionType::Webfetch => "webfetch",
            PermissionType::ExternalDir => "external_dir",
            PermissionType::DoomLoop => "doom_loop",
        }
    }
}

/// A pending or resolved permission request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub id: String,
    pub session_id: String,
    #[serde(rename = "type")]
    pub kind: PermissionType,
    pub title: String,
    pub patterns: Vec<String>,
    pub metadata: Value,
    pub created_at: String,
}

/// The decision an operator makes in response to a [`PermissionRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Allow this call only.
    Once,
    /// Allow this call and remember the matched pattern for the session.
    Always,
    Reject,
}

/// A synchronous policy outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Ask,
    Deny,
}

#[derive(Debug, Error)]
#[error("permission rejected: session={session_id} type={kind} message={message}")]
pub struct RejectedError {
    pub session_id: String,
    pub kind: PermissionType,
    pub call_id: Option<String>,
    pub message: String,
    pub metadata: Value,
}

/// Returns `true` if `err` downcasts to a [`RejectedError`].
pub fn is_rejected_error(err: &anyhow::Error) -> bool {
    err.downcast_ref::<RejectedError>().is_some()
}

/// Per-(agent,type) policy: ordered `{pattern -> decision}`. `Ask` is the
/// implicit default when no pattern matches.
#[derive(Debug, Clone, Default)]
pub struct PolicyRules {
    pub allow: Vec<String>,
    pub deny: Vec<String>,
    pub ask: Vec<String>,
}

impl PolicyRules {
    /// Decide the verdict for a rendered command/request string: among all
    /// matching patterns across allow/deny/ask, the most specific wins.
    pub fn decide(&self, candidate: &str) -> Verdict {
        let mut best: Option<(i64, Verdict)> = None;
        for (patterns, verdict) in [
            (&self.allow, Verdict::Allow),
            (&self.deny, Verdict::Deny),
            (&self.ask, Verdict::Ask),
        ] {
            if let Some(p) = most_specific_match(patterns, candidate) {
                let spec = crate::pattern::Pattern::new(p.to_string()).specificity();
                if best.map(|(s, _)| spec > s).unwrap_or(true) {
                    best = Some((spec, verdict));
                }
            }
        }
        best.map(|(_, v)| v).unwrap_or(Verdict::Ask)
    }
}

struct Pending {
    tx: oneshot::Sender<Decision>,
}

#[derive(Default)]
struct SessionState {
    /// Patterns approved for the session, per permission type (`always`
    /// decisions accumulate here).
    approved_patterns: HashMap<PermissionType, Vec<String>>,
    /// Whole permission types approved outright for the session.
    approved_types: std::collections::HashSet<PermissionType>,
}

/// Async request/response broker that suspends tool execution until a
/// decision arrives (human approval, or policy auto-resolution).
pub struct PermissionBroker {
    events: EventBus,
    policies: HashMap<(String, PermissionType), PolicyRules>,
    pending: Mutex<HashMap<String, Pending>>,
    requests: Mutex<HashMap<String, PermissionRequest>>,
    sessions: StdMutex<HashMap<String, SessionState>>,
}

impl PermissionBroker {
    pub fn new(events: EventBus) -> Self {
        Self {
            events,
            policies: HashMap::new(),
            pending: Mutex::new(HashMap::new()),
            requests: Mutex::new(HashMap::new()),
            sessions: StdMutex::new(HashMap::new()),
        }
    }

    pub fn with_policy(mut self, agent: impl Into<String>, kind: PermissionType, rules: PolicyRules) -> Self {
        self.policies.insert((agent.into(), kind), rules);
        self
    }

    fn policy_for<'a>(&'a self, agent: &str, kind: PermissionType) -> Option<&'a PolicyRules> {
        self.policies.get(&(agent.to_string(), kind))
    }

    /// Synchronous check: `allow` -> Ok(()); `deny` -> [`RejectedError`].
    /// A bare `ask` verdict also returns `Ok(())` here — callers that need
    /// to suspend for human approval should call [`Self::ask`] instead.
    pub fn check(&self, agent: &str, session_id: &str, kind: PermissionType, candidate: &str) -> Result<Verdict, RejectedError> {
        let verdict = self
            .policy_for(agent, kind)
            .map(|p| p.decide(candidate))
            .unwrap_or(Verdict::Ask);
        if verdict == Verdict::Deny {
            return Err(RejectedError {
                session_id: session_id.to_string(),
                kind,
                call_id: None,
                message: format!("denied by policy: {candidate}"),
                metadata: Value::Null,
            });
        }
        Ok(verdict)
    }

    fn is_session_approved(&self, session_id: &str, kind: PermissionType, candidate: &str) -> bool {
        let sessions = self.sessions.lock().unwrap();
        let Some(state) = sessions.get(session_id) else {
            return false;
        };
        if state.approved_types.contains(&kind) {
            return true;
        }
        state
            .approved_patterns
            .get(&kind)
            .map(|patterns| patterns.iter().any(|p| crate::pattern::Pattern::new(p.clone()).matches(candidate)))
            .unwrap_or(false)
    }

    /// Asynchronous ask: if the session already approved this type or a
    /// matching pattern, resolves immediately with [`Decision::Always`].
    /// Otherwise creates a `PermissionRequest`, publishes `permission.required`,
    /// and suspends until [`Self::respond`] is called or `cancel` fires.
    pub async fn ask(
        &self,
        agent: &str,
        session_id: &str,
        kind: PermissionType,
        title: impl Into<String>,
        candidate: &str,
        metadata: Value,
        cancel: impl std::future::Future<Output = ()>,
    ) -> Result<(), RejectedError> {
        if self.is_session_approved(session_id, kind, candidate) {
            return Ok(());
        }
        match self.check(agent, session_id, kind, candidate) {
            Ok(Verdict::Allow) => return Ok(()),
            Ok(Verdict::Ask) => {}
            Ok(Verdict::Deny) => unreachable!("check() returns Err on Deny"),
            Err(e) => return Err(e),
        }

        let req = PermissionRequest {
            id: ids::next_id(),
            session_id: session_id.to_string(),
            kind,
            title: title.into(),
            patterns: vec![candidate.to_string()],
            metadata: metadata.clone(),
            created_at: chrono::Utc::now().to_rfc3339(),
        };

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(req.id.clone(), Pending { tx });
        }
        {
            let mut requests = self.requests.lock().await;
            requests.insert(req.id.clone(), req.clone());
        }

        self.events.publish_sync(Event::new(
            "permission.required",
            Some(session_id.to_string()),
            serde_json::to_value(&req).unwrap_or(Value::Null),
        )).await;

        let decision = tokio::select! {
            d = rx => d.unwrap_or(Decision::Reject),
            _ = cancel => Decision::Reject,
        };

        self.requests.lock().await.remove(&req.id);

        match decision {
            Decision::Reject => {
                self.events.publish(Event::new(
                    "permission.resolved",
                    Some(session_id.to_string()),
                    serde_json::json!({"id": req.id, "decision": "reject"}),
                )).await;
                Err(RejectedError {
                    session_id: session_id.to_string(),
                    kind,
                    call_id: None,
                    message: "rejected by operator".to_string(),
                    metadata,
                })
            }
            Decision::Once => {
                self.events.publish(Event::new(
                    "permission.resolved",
                    Some(session_id.to_string()),
                    serde_json::json!({"id": req.id, "decision": "once"}),
                )).await;
                Ok(())
            }
            Decision::Always => {
                self.approve_pattern(session_id, kind, candidate);
                self.events.publish(Event::new(
                    "permission.resolved",
                    Some(session_id.to_string()),
                    serde_json::json!({"id": req.id, "decision": "always"}),
                )).await;
                Ok(())
            }
        }
    }

    /// Resolve a pending request. Returns `false` if no such request is
    /// pending (already resolved, or the turn aborted).
    pub async fn respond(&self, request_id: &str, decision: Decision) -> bool {
        let pending = self.pending.lock().await.remove(request_id);
        match pending {
            Some(p) => p.tx.send(decision).is_ok(),
            None => false,
        }
    }

    pub fn approve_pattern(&self, session_id: &str, kind: PermissionType, pattern: &str) {
        let mut sessions = self.sessions.lock().unwrap();
        sessions
            .entry(session_id.to_string())
            .or_default()
            .approved_patterns
            .entry(kind)
            .or_default()
            .push(pattern.to_string());
    }

    pub fn is_approved(&self, session_id: &str, kind: PermissionType) -> bool {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .map(|s| s.approved_types.contains(&kind))
            .unwrap_or(false)
    }

    pub fn clear_session(&self, session_id: &str) {
        self.sessions.lock().unwrap().remove(session_id);
    }

    pub async fn pending_requests(&self) -> Vec<PermissionRequest> {
        self.requests.lock().await.values().cloned().collect()
    }
}
