// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command history and interaction-log read endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::model::SessionKey;
use crate::transport::state::AppState;
use crate::transport::ErrorResponseExt;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

/// `GET /api/agents/:key/commands`
pub async fn list(
    State(s): State<Arc<AppState>>,
    Path(key): Path<String>,
    Query(q): Query<ListQuery>,
) -> impl IntoResponse {
    let Ok(key) = SessionKey::new(key) else {
        return crate::error::ErrorCode::BadRequest.into_response("invalid session key");
    };
    match s.store.list_commands(&key, q.limit).await {
        Ok(commands) => Json(serde_json::json!({"commands": commands})).into_response(),
        Err(e) => e.code().into_response(&e.to_string()),
    }
}

/// `GET /api/agents/:key/log`
pub async fn interaction_log(
    State(s): State<Arc<AppState>>,
    Path(key): Path<String>,
    Query(q): Query<ListQuery>,
) -> impl IntoResponse {
    let Ok(key) = SessionKey::new(key) else {
        return crate::error::ErrorCode::BadRequest.into_response("invalid session key");
    };
    match s.store.list_interactions(&key, q.limit).await {
        Ok(entries) => Json(serde_json::json!({"log": entries})).into_response(),
        Err(e) => e.code().into_response(&e.to_string()),
    }
}
