// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Canonical data entities (Project/Session/Message/Part), their
//! serialization, and the cascade-delete helper. Purely data — no I/O of
//! its own beyond delegating reads/writes to [`opencode_storage::Storage`].

pub mod ids;
pub mod message;
pub mod part;
pub mod project;
pub mod session;

pub use message::{Message, MessagePath, MessageTime, Role};
pub use part::{Part, ToolPart, ToolState};
pub use project::Project;
pub use session::{Session, SessionSummary, SessionTime};

use opencode_storage::Storage;

fn session_path(project_id: &str, session_id: &str) -> Vec<String> {
    vec!["session".into(), project_id.into(), session_id.into()]
}

fn session_prefix(project_id: &str) -> Vec<String> {
    vec!["session".into(), project_id.into()]
}

fn message_path(session_id: &str, message_id: &str) -> Vec<String> {
    vec!["message".into(), session_id.into(), message_id.into()]
}

fn message_prefix(session_id: &str) -> Vec<String> {
    vec!["message".into(), session_id.into()]
}

fn part_path(message_id: &str, part_id: &str) -> Vec<String> {
    vec!["part".into(), message_id.into(), part_id.into()]
}

fn part_prefix(message_id: &str) -> Vec<String> {
    vec!["part".into(), message_id.into()]
}

/// Persist a new or updated session at `session/<projectId>/<sessionId>`.
pub async fn put_session(storage: &Storage, session: &Session) -> opencode_storage::Result<()> {
    storage
        .put(&session_path(&session.project_id, &session.id), session)
        .await
}

pub async fn get_session(
    storage: &Storage,
    project_id: &str,
    session_id: &str,
) -> opencode_storage::Result<Option<Session>> {
    storage.get_opt(&session_path(project_id, session_id)).await
}

/// List every session under a project, ordered by id (creation order, since
/// ids are ULID-shaped and therefore lexicographically time-ordered).
pub async fn list_sessions(storage: &Storage, project_id: &str) -> opencode_storage::Result<Vec<Session>> {
    storage.list_values(&session_prefix(project_id)).await
}

pub async fn put_message(storage: &Storage, message: &Message) -> opencode_storage::Result<()> {
    storage
        .put(&message_path(&message.session_id, &message.id), message)
        .await
}

pub async fn get_message(
    storage: &Storage,
    session_id: &str,
    message_id: &str,
) -> opencode_storage::Result<Option<Message>> {
    storage.get_opt(&message_path(session_id, message_id)).await
}

pub async fn list_messages(storage: &Storage, session_id: &str) -> opencode_storage::Result<Vec<Message>> {
    let mut msgs: Vec<Message> = storage.list_values(&message_prefix(session_id)).await?;
    msgs.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(msgs)
}

pub async fn put_part(storage: &Storage, part: &Part) -> opencode_storage::Result<()> {
    storage.put(&part_path(part.message_id(), part.id()), part).await
}

/// Ordered parts for a message: `(messageId, createdAt, id)` total order.
/// Since ids embed a millisecond timestamp, sorting by id alone satisfies
/// this (spec §3.2 invariant 1).
pub async fn list_parts(storage: &Storage, message_id: &str) -> opencode_storage::Result<Vec<Part>> {
    let mut parts: Vec<Part> = storage.list_values(&part_prefix(message_id)).await?;
    parts.sort_by(|a, b| a.id().cmp(b.id()));
    Ok(parts)
}

/// All parts across every message of a session, in transcript order:
/// grouped by message (messages ordered by id), parts within a message
/// ordered by id.
pub async fn list_session_parts(storage: &Storage, session_id: &str) -> opencode_storage::Result<Vec<Part>> {
    let messages = list_messages(storage, session_id).await?;
    let mut out = Vec::new();
    for m in messages {
        out.extend(list_parts(storage, &m.id).await?);
    }
    Ok(out)
}

/// Cascade delete: removing a Session removes its Messages, which removes
/// their Parts (spec §3.2 invariant 2 — no orphan parts).
pub async fn delete_session_cascade(
    storage: &Storage,
    project_id: &str,
    session_id: &str,
) -> opencode_storage::Result<()> {
    let messages = list_messages(storage, session_id).await?;
    for m in &messages {
        storage.delete_prefix(&part_prefix(&m.id)).await;
    }
    storage.delete_prefix(&message_prefix(session_id)).await;
    storage.delete(&session_path(project_id, session_id)).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cascade_delete_removes_messages_and_parts() {
        let storage = Storage::new();
        let session = Session::new("proj1", "/tmp/work");
        put_session(&storage, &session).await.unwrap();

        let msg = Message::new(&session.id, Role::User);
        put_message(&storage, &msg).await.unwrap();

        let part = Part::new_text(&session.id, &msg.id);
        put_part(&storage, &part).await.unwrap();

        delete_session_cascade(&storage, "proj1", &session.id).await.unwrap();

        assert!(get_session(&storage, "proj1", &session.id).await.unwrap().is_none());
        assert!(list_messages(&storage, &session.id).await.unwrap().is_empty());
        assert!(list_parts(&storage, &msg.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_sessions_returns_all_under_project() {
        let storage = Storage::new();
        let a = Session::new("p1", "/tmp/a");
        let b = Session::new("p1", "/tmp/b");
        put_session(&storage, &a).await.unwrap();
        put_session(&storage, &b).await.unwrap();
        let listed = list_sessions(&storage, "p1").await.unwrap();
        assert_eq!(listed.len(), 2);
    }

    #[tokio::test]
    async fn list_parts_is_ordered_by_id() {
        let storage = Storage::new();
        let session = Session::new("p1", "/tmp");
        let msg = Message::new(&session.id, Role::Assistant);
        let p1 = Part::new_text(&session.id, &msg.id);
        put_part(&storage, &p1).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let p2 = Part::new_text(&session.id, &msg.id);
        put_part(&storage, &p2).await.unwrap();
        let listed = list_parts(&storage, &msg.id).await.unwrap();
        assert_eq!(listed[0].id(), p1.id());
        assert_eq!(listed[1].id(), p2.id());
    }
}
