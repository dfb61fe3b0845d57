// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Alert history, in-memory alert-record inspection, and operator
//! suppression controls.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::model::{Action, Actor, InteractionLogEntry, SessionKey};
use crate::transport::http::commands::ListQuery;
use crate::transport::state::AppState;
use crate::transport::ErrorResponseExt;

/// `GET /api/agents/:key/alerts`
pub async fn list(
    State(s): State<Arc<AppState>>,
    Path(key): Path<String>,
    Query(q): Query<ListQuery>,
) -> impl IntoResponse {
    let Ok(key) = SessionKey::new(key) else {
        return crate::error::ErrorCode::BadRequest.into_response("invalid session key");
    };
    match s.store.list_alerts(&key, q.limit).await {
        Ok(events) => Json(serde_json::json!({"alerts": events})).into_response(),
        Err(e) => e.code().into_response(&e.to_string()),
    }
}

/// `GET /api/alerts/states`
pub async fn states(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({"states": s.alert_gate.states().await})).into_response()
}

#[derive(Debug, Deserialize)]
pub struct SuppressRequest {
    #[serde(default = "default_suppress_minutes")]
    pub duration: u64,
}

fn default_suppress_minutes() -> u64 {
    60
}

/// `POST /api/alerts/:key/suppress`
pub async fn suppress(
    State(s): State<Arc<AppState>>,
    Path(key): Path<String>,
    body: Option<Json<SuppressRequest>>,
) -> impl IntoResponse {
    let Ok(key) = SessionKey::new(key) else {
        return crate::error::ErrorCode::BadRequest.into_response("invalid session key");
    };
    let minutes = body.map(|b| b.duration).unwrap_or_else(default_suppress_minutes);
    s.alert_gate.suppress(key.clone(), Duration::from_secs(minutes * 60)).await;
    log_interaction(&s, &key, Action::SuppressAlerts, "").await;
    Json(serde_json::json!({"success": true, "suppressedForMinutes": minutes})).into_response()
}

/// `POST /api/alerts/:key/unsuppress`
pub async fn unsuppress(State(s): State<Arc<AppState>>, Path(key): Path<String>) -> impl IntoResponse {
    let Ok(key) = SessionKey::new(key) else {
        return crate::error::ErrorCode::BadRequest.into_response("invalid session key");
    };
    s.alert_gate.unsuppress(&key).await;
    log_interaction(&s, &key, Action::UnsuppressAlerts, "").await;
    Json(serde_json::json!({"success": true})).into_response()
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
