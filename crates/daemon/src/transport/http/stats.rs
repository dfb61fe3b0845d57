// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Health and aggregate-stats endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::model::SessionState;
use crate::transport::state::AppState;
use crate::transport::ErrorResponseExt;

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "pushClients": crate::transport::ws::client_count(),
        "timestamp": chrono::Utc::now(),
    }))
}

/// `GET /api/stats`
pub async fn stats(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    let supervisors = s.registry.list().await;
    let mut by_state: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    for supervisor in &supervisors {
        let state: SessionState = supervisor.snapshot().await.state;
        *by_state.entry(state.as_str().to_owned()).or_insert(0) += 1;
    }
    let pending = match s.store.count_pending_commands().await {
        Ok(n) => n,
        Err(e) => return e.code().into_response(&e.to_string()),
    };
    Json(serde_json::json!({
        "agents": {"total": supervisors.len(), "byState": by_state},
        "commands": {"pending": pending},
        "uptime": s.started_at.elapsed().as_secs(),
    }))
    .into_response()
}
