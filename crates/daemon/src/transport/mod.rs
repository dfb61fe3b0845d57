// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control Surface: HTTP + WebSocket transport built on axum.

pub mod auth;
pub mod http;
pub mod state;
pub mod ws;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::ErrorCode;
pub use state::AppState;

/// Top-level error envelope shared across every HTTP handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl ErrorCode {
    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { code: self.as_str().to_owned(), message: message.into() }
    }
}

/// Convenience for turning an `ErrorCode` into an axum response inline.
pub trait ErrorResponseExt {
    fn into_response(self, message: &str) -> Response;
}

impl ErrorResponseExt for ErrorCode {
    fn into_response(self, message: &str) -> Response {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ErrorResponse { error: self.to_error_body(message) })).into_response()
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(http::stats::health))
        .route("/api/stats", get(http::stats::stats))
        .route("/api/agents", get(http::agents::list))
        .route("/api/agents/{key}", get(http::agents::get))
        .route("/api/agents/{key}/output", get(http::agents::output))
        .route("/api/agents/{key}/nudge", post(http::agents::nudge))
        .route("/api/agents/{key}/command", post(http::agents::command))
        .route("/api/agents/{key}/kill", post(http::agents::kill))
        .route("/api/agents/{key}/commands", get(http::commands::list))
        .route("/api/agents/{key}/log", get(http::commands::interaction_log))
        .route("/api/agents/{key}/alerts", get(http::alerts::list))
        .route("/api/alerts/states", get(http::alerts::states))
        .route("/api/alerts/{key}/suppress", post(http::alerts::suppress))
        .route("/api/alerts/{key}/unsuppress", post(http::alerts::unsuppress))
        .route("/api/config", get(http::config::get))
        .route("/api/config/reload", post(http::config::reload))
        .route("/ws", get(ws::ws_handler))
        .layer(middleware::from_fn_with_state(state.clone(), auth::auth_layer))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
