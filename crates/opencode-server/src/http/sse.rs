// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Server-sent event feeds: the global bus firehose, a per-session filter,
//! and the per-client-tool-worker queue. All three follow the same shape —
//! subscribe, stream until the client disconnects, heartbeat every 30s so
//! idle connections don't get reaped by an intermediary proxy.

use std::convert::Infallible;
use std::time::Duration;

use async_stream::stream;
use axum::extract::{Path, Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures::stream::Stream;
use serde::Deserialize;

use opencode_events::Filter;

use crate::error::ApiError;
use crate::http::session::session_filter;
use crate::state::AppState;

const HEARTBEAT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct EventQuery {
    #[serde(rename = "sessionID", default)]
    pub session_id: Option<String>,
}

/// `GET /event?sessionID=` — events scoped to one session. `sessionID` is
/// required; an empty or missing one is a `400 INVALID_REQUEST`.
pub async fn session_event(
    State(state): State<AppState>,
    Query(q): Query<EventQuery>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let filter = session_filter(q.session_id)?;
    Ok(event_stream(state, filter).await)
}

/// `GET /global/event` — every event on the bus, unfiltered.
pub async fn global_event(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    event_stream(state, Filter::All).await
}

async fn event_stream(
    state: AppState,
    filter: Filter,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let mut sub = state.events.subscribe(filter).await;
    let stream = stream! {
        loop {
            match tokio::time::timeout(HEARTBEAT, sub.receiver.recv()).await {
                Ok(Some(event)) => {
                    let data = event.to_wire_json().to_string();
                    yield Ok(SseEvent::default().event(event.kind.clone()).data(data));
                }
                Ok(None) => break,
                Err(_) => yield Ok(SseEvent::default().comment("")),
            }
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// `GET /client-tools/pending/{clientID}` — the work queue for one client
/// tool worker. Only `client.tool.request`/`client.tool.executing` are
/// forwarded: those carry `clientId` in their properties so they can be
/// filtered per-client; the terminal `client.tool.completed`/`failed`
/// events don't (the broker publishes them scoped by session, not client),
/// and the worker already learns its own outcome from the return value of
/// its `POST /client-tools/result` call, so it doesn't need them echoed
/// back here.
pub async fn client_tool_pending(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let mut sub = state
        .events
        .subscribe(Filter::Types(
            ["client.tool.request".to_string(), "client.tool.executing".to_string()]
                .into_iter()
                .collect(),
        ))
        .await;
    let stream = stream! {
        loop {
            match tokio::time::timeout(HEARTBEAT, sub.receiver.recv()).await {
                Ok(Some(event)) => {
                    let belongs = event
                        .properties
                        .get("clientId")
                        .and_then(|v| v.as_str())
                        .map(|id| id == client_id)
                        .unwrap_or(false);
                    if belongs {
                        let data = event.to_wire_json().to_string();
                        yield Ok(SseEvent::default().event(event.kind.clone()).data(data));
                    }
                }
                Ok(None) => break,
                Err(_) => yield Ok(SseEvent::default().comment("")),
            }
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}
