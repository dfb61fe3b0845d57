// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session listing, detail, output, and lifecycle (nudge / command / kill)
//! handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::model::{Action, Actor, Event, EventKind, InteractionLogEntry, Session, SessionKey};
use crate::transport::state::AppState;
use crate::transport::ErrorResponseExt;

#[derive(Debug, Serialize)]
pub struct AgentListEntry {
    #[serde(flatten)]
    pub session: Session,
    pub connected: bool,
}

/// `GET /api/agents`
pub async fn list(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    let mut agents = Vec::new();
    for supervisor in s.registry.list().await {
        let session = supervisor.snapshot().await;
        agents.push(AgentListEntry { session, connected: !supervisor.is_disconnected() });
    }
    Json(serde_json::json!({"agents": agents, "count": agents.len()})).into_response()
}

/// `GET /api/agents/:key`
pub async fn get(State(s): State<Arc<AppState>>, Path(key): Path<String>) -> impl IntoResponse {
    let Ok(key) = SessionKey::new(key) else {
        return crate::error::ErrorCode::BadRequest.into_response("invalid session key");
    };
    match s.registry.get(&key).await {
        Some(supervisor) => Json(supervisor.snapshot().await).into_response(),
        None => crate::error::ErrorCode::NotFound.into_response("session not registered"),
    }
}

#[derive(Debug, Deserialize)]
pub struct OutputQuery {
    #[serde(default = "default_output_lines")]
    pub lines: u32,
}

fn default_output_lines() -> u32 {
    200
}

/// `GET /api/agents/:key/output?lines=N`
pub async fn output(
    State(s): State<Arc<AppState>>,
    Path(key): Path<String>,
    Query(q): Query<OutputQuery>,
) -> impl IntoResponse {
    let Ok(key) = SessionKey::new(key) else {
        return crate::error::ErrorCode::BadRequest.into_response("invalid session key");
    };
    match s.registry.get(&key).await {
        Some(supervisor) => match supervisor.capture(q.lines).await {
            Ok(text) => {
                Json(serde_json::json!({"session": key, "output": text, "lines": q.lines}))
                    .into_response()
            }
            Err(e) => e.code().into_response(&e.to_string()),
        },
        None => crate::error::ErrorCode::NotFound.into_response("session not registered"),
    }
}

#[derive(Debug, Deserialize)]
pub struct NudgeRequest {
    pub message: String,
}

/// `POST /api/agents/:key/nudge`
///
/// Publishes a `nudge_requested` event rather than enqueuing directly — the
/// Event Bus forwards it into the Command Queue, so the nudge is visible to
/// any other event consumer (the Alert Gate, mirrors) before it becomes a
/// queued command.
pub async fn nudge(
    State(s): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(req): Json<NudgeRequest>,
) -> impl IntoResponse {
    let Ok(key) = SessionKey::new(key) else {
        return crate::error::ErrorCode::BadRequest.into_response("invalid session key");
    };
    if req.message.trim().is_empty() {
        return crate::error::ErrorCode::BadRequest.into_response("nudge message cannot be empty");
    }
    let event =
        Event::new(EventKind::NudgeRequested, key.clone(), serde_json::json!({"command": req.message}));
    match s.bus.publish(event).await {
        Some(job_id) => {
            log_interaction(&s, &key, Action::Nudge, &req.message).await;
            Json(serde_json::json!({"jobId": job_id, "status": "queued"})).into_response()
        }
        None => crate::error::ErrorCode::Internal.into_response("failed to enqueue nudge"),
    }
}

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub command: String,
}

/// `POST /api/agents/:key/command`
pub async fn command(
    State(s): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(req): Json<CommandRequest>,
) -> impl IntoResponse {
    let Ok(key) = SessionKey::new(key) else {
        return crate::error::ErrorCode::BadRequest.into_response("invalid session key");
    };
    match s.queue.enqueue(key.clone(), req.command.clone(), "api".into()).await {
        Ok(job_id) => {
            log_interaction(&s, &key, Action::SendCommand, &req.command).await;
            Json(serde_json::json!({"jobId": job_id, "status": "queued"})).into_response()
        }
        Err(e) => e.code().into_response(&e.to_string()),
    }
}

/// `POST /api/agents/:key/kill`
pub async fn kill(State(s): State<Arc<AppState>>, Path(key): Path<String>) -> impl IntoResponse {
    let Ok(key) = SessionKey::new(key) else {
        return crate::error::ErrorCode::BadRequest.into_response("invalid session key");
    };
    match s.registry.get(&key).await {
        Some(supervisor) => match supervisor.kill().await {
            Ok(()) => {
                log_interaction(&s, &key, Action::Kill, "").await;
                Json(serde_json::json!({"success": true})).into_response()
            }
            Err(e) => e.code().into_response(&e.to_string()),
        },
        None => crate::error::ErrorCode::NotFound.into_response("session not registered"),
    }
}

async fn log_interaction(s: &AppState, key: &SessionKey, action: Action, content: &str) {
    let entry = InteractionLogEntry {
        id: uuid::Uuid::new_v4().to_string(),
        session_key: key.clone(),
        timestamp: chrono::Utc::now(),
        actor: Actor::Api,
        action,
        content: content.to_owned(),
        metadata_json: serde_json::json!({}),
    };
    if let Err(e) = s.store.insert_interaction(&entry).await {
        tracing::warn!(error = %e, "failed to persist interaction log entry");
    }
}
