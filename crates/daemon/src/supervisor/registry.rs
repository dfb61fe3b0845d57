// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervisor registry: the single-owner mutable aggregate holding every
//! session's `Supervisor`. Reads go through a snapshot-copy or read-lock;
//! mutation (register/unregister) is exclusive.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::capture::Multiplexer;
use crate::classifier::Classifier;
use crate::model::{self, SessionKey};
use crate::progress::SharedProgressParser;
use crate::store::AuditStore;
use crate::supervisor::Supervisor;

/// Tunables passed through to every spawned [`Supervisor`].
#[derive(Debug, Clone, Copy)]
pub struct SupervisorParams {
    pub poll_interval: Duration,
    pub capture_lines: u32,
    pub capture_timeout: Duration,
    pub stuck_threshold: Duration,
}

/// Holds every currently-registered `Supervisor`, keyed by session, in
/// insertion order (so `/api/agents` returns a stable listing).
pub struct SupervisorRegistry {
    supervisors: RwLock<IndexMap<SessionKey, Arc<Supervisor>>>,
    mux: Arc<dyn Multiplexer>,
    classifier: Arc<dyn Classifier>,
    progress: SharedProgressParser,
    store: Arc<AuditStore>,
    events: mpsc::Sender<model::Event>,
    params: SupervisorParams,
    live_stuck_threshold_secs: AtomicU64,
}

impl SupervisorRegistry {
    pub fn new(
        mux: Arc<dyn Multiplexer>,
        classifier: Arc<dyn Classifier>,
        progress: SharedProgressParser,
        store: Arc<AuditStore>,
        events: mpsc::Sender<model::Event>,
        params: SupervisorParams,
    ) -> Self {
        let live_stuck_threshold_secs = AtomicU64::new(params.stuck_threshold.as_secs());
        Self {
            supervisors: RwLock::new(IndexMap::new()),
            mux,
            classifier,
            progress,
            store,
            events,
            params,
            live_stuck_threshold_secs,
        }
    }

    fn stuck_threshold(&self) -> Duration {
        Duration::from_secs(self.live_stuck_threshold_secs.load(Ordering::Relaxed))
    }

    /// Push a new stuck-idle threshold to every currently-registered
    /// supervisor, and to any spawned afterward.
    pub async fn set_stuck_threshold(&self, threshold: Duration) {
        self.live_stuck_threshold_secs.store(threshold.as_secs(), Ordering::Relaxed);
        for supervisor in self.supervisors.read().await.values() {
            supervisor.set_stuck_threshold(threshold);
        }
    }

    pub async fn get(&self, key: &SessionKey) -> Option<Arc<Supervisor>> {
        self.supervisors.read().await.get(key).cloned()
    }

    pub async fn list(&self) -> Vec<Arc<Supervisor>> {
        self.supervisors.read().await.values().cloned().collect()
    }

    pub async fn contains(&self, key: &SessionKey) -> bool {
        self.supervisors.read().await.contains_key(key)
    }

    /// Build, connect, and start supervising a new session. No-op (returns
    /// the existing one) if already registered.
    pub async fn spawn(
        self: &Arc<Self>,
        key: SessionKey,
        shutdown: CancellationToken,
    ) -> Result<Arc<Supervisor>, crate::error::AppError> {
        if let Some(existing) = self.get(&key).await {
            return Ok(existing);
        }

        let mut capture = crate::capture::PaneCaptureSession::new(
            key.as_str(),
            Arc::clone(&self.mux),
            self.params.poll_interval,
            self.params.capture_lines,
            self.params.capture_timeout,
        );
        capture.connect().await?;

        let supervisor = Arc::new(Supervisor::new(
            key.clone(),
            Arc::clone(&self.mux),
            Arc::clone(&self.classifier),
            Arc::clone(&self.progress),
            Arc::clone(&self.store),
            self.events.clone(),
            self.params.capture_timeout,
            self.stuck_threshold(),
        ));

        let (capture_tx, capture_rx) = mpsc::channel(256);
        let inner = Arc::clone(&supervisor);
        let registry = Arc::clone(self);
        let drive_key = key.clone();
        let drive_shutdown = shutdown.clone();
        tokio::spawn(async move {
            inner.drive(capture_rx, drive_shutdown).await;
            registry.unregister(&drive_key).await;
        });
        tokio::spawn(capture.run(capture_tx, shutdown));

        self.supervisors.write().await.insert(key.clone(), Arc::clone(&supervisor));
        info!(session = %key, "session registered");
        Ok(supervisor)
    }

    pub async fn unregister(&self, key: &SessionKey) {
        if self.supervisors.write().await.shift_remove(key).is_some() {
            info!(session = %key, "session unregistered");
        }
    }

    /// Run the shared stuck-check timer: every `interval`, call
    /// `check_stuck` on every registered supervisor.
    pub async fn run_stuck_check_timer(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    for supervisor in self.list().await {
                        supervisor.check_stuck().await;
                    }
                }
            }
        }
    }
}
