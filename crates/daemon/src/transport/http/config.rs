// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime-reloadable configuration surface.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::config::ReloadableConfig;
use crate::transport::state::AppState;

/// `GET /api/config`
pub async fn get(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    Json(*s.reloadable.read().await).into_response()
}

/// `POST /api/config/reload`
///
/// Re-reads the subset of tunables the `ReloadableConfig` names (stuck
/// threshold, alert policy, rate-limit window, notifier delivery mode) from
/// the body and applies them live, without restarting the process.
pub async fn reload(State(s): State<Arc<AppState>>, Json(patch): Json<ReloadableConfig>) -> impl IntoResponse {
    *s.reloadable.write().await = patch;
    s.alert_gate
        .patch_reloadable(patch.alert_policy, std::time::Duration::from_secs(patch.rate_limit_window_secs))
        .await;
    s.alert_gate.set_notifier_mode(patch.notifier_delivery_mode);
    s.registry.set_stuck_threshold(std::time::Duration::from_secs(patch.stuck_threshold_secs)).await;
    Json(patch).into_response()
}
