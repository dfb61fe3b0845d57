// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket push handler: streams Event Bus events to connected clients,
//! with an optional client-chosen session filter.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::debug;

use crate::transport::auth;
use crate::transport::state::AppState;

static CLIENT_COUNT: AtomicU32 = AtomicU32::new(0);

/// Number of push clients currently connected, for `/health`.
pub fn client_count() -> u32 {
    CLIENT_COUNT.load(Ordering::Relaxed)
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Ping,
    Subscribe { sessions: Vec<String> },
}

pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let query_string = query.token.as_deref().map(|t| format!("token={t}")).unwrap_or_default();
    if auth::validate_ws_query(&query_string, state.auth_token.as_deref()).is_err() {
        return axum::http::Response::builder()
            .status(401)
            .body(axum::body::Body::from("unauthorized"))
            .unwrap_or_default()
            .into_response();
    }
    ws.on_upgrade(move |socket| handle_connection(state, socket)).into_response()
}

async fn handle_connection(state: Arc<AppState>, socket: WebSocket) {
    let clients = CLIENT_COUNT.fetch_add(1, Ordering::Relaxed) + 1;
    let (mut tx, mut rx) = socket.split();
    let mut events = state.bus.subscribe();
    let mut filter: Option<HashSet<String>> = None;

    if send_json(&mut tx, &serde_json::json!({"type": "connected", "clients": clients})).await.is_err() {
        CLIENT_COUNT.fetch_sub(1, Ordering::Relaxed);
        return;
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                let event = match event {
                    Ok(e) => e,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        state.bus.note_dropped(n);
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };
                if let Some(ref allowed) = filter {
                    if !allowed.contains(event.session_key.as_str()) {
                        continue;
                    }
                }
                if send_json(&mut tx, &event).await.is_err() {
                    break;
                }
            }
            msg = rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(ClientMessage::Ping) => {
                                if send_json(&mut tx, &serde_json::json!({"type": "pong"})).await.is_err() {
                                    break;
                                }
                            }
                            Ok(ClientMessage::Subscribe { sessions }) => {
                                filter = Some(sessions.into_iter().collect());
                            }
                            Err(e) => debug!(error = %e, "unparseable websocket client message"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    CLIENT_COUNT.fetch_sub(1, Ordering::Relaxed);
}

async fn send_json(
    tx: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    value: &impl serde::Serialize,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_owned());
    tx.send(Message::Text(text.into())).await
}
