// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Process-scoped ordered key-value store, addressed by a path of string
//! segments (`["session", projectId, sessionId]`).
//!
//! Durability beyond a process crash is not required; writes only need to be
//! visible to subsequent reads within the same process. A `BTreeMap` gives
//! us the lexicographic ordering `List` needs for free.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// A path of string segments addressing a single stored value.
pub type Path = Vec<String>;

fn path_key(path: &[String]) -> String {
    // Joined with a separator that cannot appear in a single segment in
    // practice (ids are hex/ULID, directory names don't contain );
    // used only to give BTreeMap prefix-range semantics over segment
    // boundaries rather than raw string prefixes.
    path.join("\u{1}")
}

fn is_prefix(prefix: &[String], candidate: &[String]) -> bool {
    candidate.len() >= prefix.len() && candidate[..prefix.len()] == *prefix
}

#[derive(Default)]
struct Inner {
    entries: BTreeMap<String, (Path, Value)>,
}

/// Ordered KV facade over namespaced key paths.
///
/// Safe for concurrent readers/writers; internally synchronized with a
/// single `RwLock` (read-mostly workloads dominate: most calls are `Get`
/// or `List`).
#[derive(Clone, Default)]
pub struct Storage {
    inner: Arc<RwLock<Inner>>,
}

impl Storage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize `value` and write it at `path`, overwriting any existing
    /// entry.
    pub async fn put<T: serde::Serialize>(&self, path: &[String], value: &T) -> Result<()> {
        let json = serde_json::to_value(value)?;
        let mut guard = self.inner.write().await;
        guard
            .entries
            .insert(path_key(path), (path.to_vec(), json));
        Ok(())
    }

    /// Read and deserialize the value at `path`.
    pub async fn get<T: serde::de::DeserializeOwned>(&self, path: &[String]) -> Result<T> {
        let guard = self.inner.read().await;
        match guard.entries.get(&path_key(path)) {
            Some((_, v)) => Ok(serde_json::from_value(v.clone())?),
            None => Err(StorageError::NotFound(path.join("/"))),
        }
    }

    /// Like [`Storage::get`] but returns `None` instead of `NotFound`.
    pub async fn get_opt<T: serde::de::DeserializeOwned>(
        &self,
        path: &[String],
    ) -> Result<Option<T>> {
        match self.get(path).await {
            Ok(v) => Ok(Some(v)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// List the next path segment of every entry whose path starts with
    /// `prefix`, deduplicated and lexicographically sorted.
    pub async fn list(&self, prefix: &[String]) -> Vec<String> {
        let guard = self.inner.read().await;
        let mut seen = std::collections::BTreeSet::new();
        for (path, _) in guard.entries.values() {
            if is_prefix(prefix, path) && path.len() > prefix.len() {
                seen.insert(path[prefix.len()].clone());
            }
        }
        seen.into_iter().collect()
    }

    /// List full paths (not just the next segment) under `prefix`, each
    /// deserialized to `T`. Ordered lexicographically by path.
    pub async fn list_values<T: serde::de::DeserializeOwned>(
        &self,
        prefix: &[String],
    ) -> Result<Vec<T>> {
        let guard = self.inner.read().await;
        let mut out = Vec::new();
        for (path, value) in guard.entries.values() {
            if is_prefix(prefix, path) {
                out.push(serde_json::from_value(value.clone())?);
            }
        }
        Ok(out)
    }

    /// Delete the single entry at `path`. No-op if absent.
    pub async fn delete(&self, path: &[String]) {
        let mut guard = self.inner.write().await;
        guard.entries.remove(&path_key(path));
    }

    /// Delete every entry whose path starts with `prefix` (cascade delete).
    pub async fn delete_prefix(&self, prefix: &[String]) {
        let mut guard = self.inner.write().await;
        let keys: Vec<String> = guard
            .entries
            .iter()
            .filter(|(_, (path, _))| is_prefix(prefix, path))
            .map(|(k, _)| k.clone())
            .collect();
        for k in keys {
            guard.entries.remove(&k);
        }
    }
}

fn path(segments: &[&str]) -> Path {
    segments.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
    struct Thing {
        name: String,
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let s = Storage::new();
        let p = path(&["session", "proj1", "sess1"]);
        s.put(&p, &Thing { name: "x".into() }).await.unwrap();
        let got: Thing = s.get(&p).await.unwrap();
        assert_eq!(got.name, "x");
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let s = Storage::new();
        let err = s.get::<Thing>(&path(&["nope"])).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn get_opt_missing_is_none() {
        let s = Storage::new();
        let got = s.get_opt::<Thing>(&path(&["nope"])).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn put_overwrites() {
        let s = Storage::new();
        let p = path(&["a"]);
        s.put(&p, &Thing { name: "one".into() }).await.unwrap();
        s.put(&p, &Thing { name: "two".into() }).await.unwrap();
        let got: Thing = s.get(&p).await.unwrap();
        assert_eq!(got.name, "two");
    }

    #[tokio::test]
    async fn list_returns_next_segment_sorted() {
        let s = Storage::new();
        s.put(&path(&["session", "p1", "b"]), &Thing { name: "b".into() })
            .await
            .unwrap();
        s.put(&path(&["session", "p1", "a"]), &Thing { name: "a".into() })
            .await
            .unwrap();
        s.put(&path(&["session", "p2", "c"]), &Thing { name: "c".into() })
            .await
            .unwrap();
        let children = s.list(&path(&["session", "p1"])).await;
        assert_eq!(children, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn delete_removes_single_entry() {
        let s = Storage::new();
        let p = path(&["x"]);
        s.put(&p, &Thing { name: "x".into() }).await.unwrap();
        s.delete(&p).await;
        assert!(s.get_opt::<Thing>(&p).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_prefix_cascades() {
        let s = Storage::new();
        s.put(&path(&["message", "s1", "m1"]), &Thing { name: "1".into() })
            .await
            .unwrap();
        s.put(&path(&["message", "s1", "m2"]), &Thing { name: "2".into() })
            .await
            .unwrap();
        s.put(&path(&["message", "s2", "m3"]), &Thing { name: "3".into() })
            .await
            .unwrap();
        s.delete_prefix(&path(&["message", "s1"])).await;
        assert!(s
            .get_opt::<Thing>(&path(&["message", "s1", "m1"]))
            .await
            .unwrap()
            .is_none());
        assert!(s
            .get_opt::<Thing>(&path(&["message", "s2", "m3"]))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn list_values_deserializes_all_matches() {
        let s = Storage::new();
        s.put(&path(&["part", "m1", "p1"]), &Thing { name: "a".into() })
            .await
            .unwrap();
        s.put(&path(&["part", "m1", "p2"]), &Thing { name: "b".into() })
            .await
            .unwrap();
        let values: Vec<Thing> = s.list_values(&path(&["part", "m1"])).await.unwrap();
        assert_eq!(values.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_writers_all_visible() {
        let s = Storage::new();
        let mut handles = Vec::new();
        for i in 0..20 {
            let s = s.clone();
            handles.push(tokio::spawn(async move {
                s.put(&path(&["n", &i.to_string()]), &Thing { name: i.to_string() })
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let children = s.list(&path(&["n"])).await;
        assert_eq!(children.len(), 20);
    }
}
