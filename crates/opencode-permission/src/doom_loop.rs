// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Detects a session repeatedly invoking the same tool with the same input:
//! a "doom loop". Returns `true` on the third identical invocation in a row;
//! any different signature resets the run length to one.

use std::collections::HashMap;
use std::sync::Mutex;

use sha2::{Digest, Sha256};

/// Number of consecutive identical calls that trips the detector.
const TRIP_THRESHOLD: u32 = 3;

struct Run {
    signature: String,
    count: u32,
}

/// Per-session last-signature run tracker.
#[derive(Default)]
pub struct DoomLoopDetector {
    runs: Mutex<HashMap<String, Run>>,
}

/// Normalize a tool input to canonical (sorted-key) JSON before hashing, so
/// key-order churn in a model's JSON emission doesn't spuriously reset the
/// repeat counter.
fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut sorted = serde_json::Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for k in keys {
                sorted.insert(k.clone(), canonicalize(&map[k]));
            }
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        }
        other => other.clone(),
    }
}

pub fn signature(session_id: &str, tool_name: &str, input: &serde_json::Value) -> String {
    let canonical = canonicalize(input);
    let canonical_json = serde_json::to_string(&canonical).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(session_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(tool_name.as_bytes());
    hasher.update(b"\0");
    hasher.update(canonical_json.as_bytes());
    hex::encode(hasher.finalize())
}

impl DoomLoopDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one invocation and return `true` if this is the third (or
    /// later) consecutive identical call.
    pub fn record(&self, session_id: &str, tool_name: &str, input: &serde_json::Value) -> bool {
        let sig = signature(session_id, tool_name, input);
        let mut runs = self.runs.lock().unwrap();
        let run = runs.entry(session_id.to_string()).or_insert_with(|| Run {
            signature: String::new(),
            count: 0,
        });
        if run.signature == sig {
            run.count += 1;
        } else {
            run.signature = sig;
            run.count = 1;
        }
        run.count >= TRIP_THRESHOLD
    }

    /// Reset the tracked run for a session (e.g. after a turn ends).
    pub fn clear(&self, session_id: &str) {
        self.runs.lock().unwrap().remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_two_identical_calls_do_not_trip() {
        let d = DoomLoopDetector::new();
        assert!(!d.record("s1", "bash", &json!({"command": "ls"})));
        assert!(!d.record("s1", "bash", &json!({"command": "ls"})));
    }

    #[test]
    fn third_identical_call_trips() {
        let d = DoomLoopDetector::new();
        assert!(!d.record("s1", "bash", &json!({"command": "ls"})));
        assert!(!d.record("s1", "bash", &json!({"command": "ls"})));
        assert!(d.record("s1", "bash", &json!({"command": "ls"})));
    }

    #[test]
    fn different_signature_resets_run_length() {
        let d = DoomLoopDetector::new();
        assert!(!d.record("s1", "bash", &json!({"command": "ls"})));
        assert!(!d.record("s1", "bash", &json!({"command": "ls"})));
        assert!(!d.record("s1", "bash", &json!({"command": "pwd"})));
        assert!(!d.record("s1", "bash", &json!({"command": "pwd"})));
    }

    #[test]
    fn clear_resets_session() {
        let d = DoomLoopDetector::new();
        d.record("s1", "bash", &json!({"command": "ls"}));
        d.record("s1", "bash", &json!({"command": "ls"}));
        d.clear("s1");
        assert!(!d.record("s1", "bash", &json!({"command": "ls"})));
    }

    #[test]
    fn key_order_does_not_affect_signature() {
        let a = signature("s1", "bash", &json!({"a": 1, "b": 2}));
        let b = signature("s1", "bash", &json!({"b": 2, "a": 1}));
        assert_eq!(a, b);
    }

    #[test]
    fn different_sessions_tracked_independently() {
        let d = DoomLoopDetector::new();
        assert!(!d.record("s1", "bash", &json!({"command": "ls"})));
        assert!(!d.record("s1", "bash", &json!({"command": "ls"})));
        assert!(!d.record("s2", "bash", &json!({"command": "ls"})));
    }
}
