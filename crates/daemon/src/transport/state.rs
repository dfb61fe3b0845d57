// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared application state passed to every handler via axum's `State` extractor.

use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::alert::AlertGate;
use crate::bus::EventBus;
use crate::capture::Multiplexer;
use crate::config::{Config, ReloadableConfig};
use crate::queue::CommandQueue;
use crate::store::AuditStore;
use crate::supervisor::registry::SupervisorRegistry;

pub struct AppState {
    pub registry: Arc<SupervisorRegistry>,
    pub queue: Arc<CommandQueue>,
    pub bus: Arc<EventBus>,
    pub alert_gate: Arc<AlertGate>,
    pub store: Arc<AuditStore>,
    pub mux: Arc<dyn Multiplexer>,
    pub auth_token: Option<String>,
    pub reloadable: RwLock<ReloadableConfig>,
    pub shutdown: CancellationToken,
    pub started_at: std::time::Instant,
}

impl AppState {
    pub fn new(
        registry: Arc<SupervisorRegistry>,
        queue: Arc<CommandQueue>,
        bus: Arc<EventBus>,
        alert_gate: Arc<AlertGate>,
        store: Arc<AuditStore>,
        mux: Arc<dyn Multiplexer>,
        config: &Config,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            queue,
            bus,
            alert_gate,
            store,
            mux,
            auth_token: config.auth_token.clone(),
            reloadable: RwLock::new(config.reloadable()),
            shutdown,
            started_at: std::time::Instant::now(),
        }
    }
}
