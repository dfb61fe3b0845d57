// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session Supervisor: owns one session's supervised lifecycle — a Capture
//! Session plus the classifier/parser run on each delta.

pub mod registry;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::capture::{CaptureEvent, Multiplexer, OutputDelta};
use crate::classifier::Classifier;
use crate::error::AppError;
use crate::model::{self, EventKind, SessionKey, SessionState};
use crate::progress::SharedProgressParser;
use crate::store::AuditStore;

const OUTPUT_TAIL_CHARS: usize = 2000;

/// Owns one session's supervised lifecycle. Exclusively mutates the
/// `Session` aggregate; external readers (Control Surface) go through
/// `snapshot()`.
pub struct Supervisor {
    key: SessionKey,
    session: RwLock<model::Session>,
    mux: Arc<dyn Multiplexer>,
    capture_timeout: Duration,
    classifier: Arc<dyn Classifier>,
    progress: SharedProgressParser,
    store: Arc<AuditStore>,
    events: mpsc::Sender<model::Event>,
    stuck_threshold_secs: AtomicU64,
    disconnected: AtomicBool,
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        key: SessionKey,
        mux: Arc<dyn Multiplexer>,
        classifier: Arc<dyn Classifier>,
        progress: SharedProgressParser,
        store: Arc<AuditStore>,
        events: mpsc::Sender<model::Event>,
        capture_timeout: Duration,
        stuck_threshold: Duration,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            session: RwLock::new(model::Session::new(key.clone(), now)),
            key,
            mux,
            capture_timeout,
            classifier,
            progress,
            store,
            events,
            stuck_threshold_secs: AtomicU64::new(stuck_threshold.as_secs()),
            disconnected: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Current stuck-idle threshold, read live on every classification.
    pub fn stuck_threshold(&self) -> Duration {
        Duration::from_secs(self.stuck_threshold_secs.load(Ordering::Relaxed))
    }

    /// Swap the stuck-idle threshold live, for `POST /api/config/reload`.
    pub fn set_stuck_threshold(&self, threshold: Duration) {
        self.stuck_threshold_secs.store(threshold.as_secs(), Ordering::Relaxed);
    }

    /// Read-only snapshot of the current aggregate.
    pub async fn snapshot(&self) -> model::Session {
        self.session.read().await.clone()
    }

    /// On-demand pane read, independent of the polling loop. Times out after
    /// `capture_timeout`.
    pub async fn capture(&self, lines: u32) -> Result<String, AppError> {
        tokio::time::timeout(self.capture_timeout, self.mux.capture_pane(self.key.as_str(), lines))
            .await
            .map_err(|_| AppError::CaptureTimeout(self.capture_timeout))?
    }

    pub async fn send_keys(&self, text: &str, press_enter: bool) -> Result<(), AppError> {
        if self.disconnected.load(Ordering::Acquire) {
            return Err(AppError::NotConnected);
        }
        self.mux
            .send_keys(self.key.as_str(), text, press_enter)
            .await
            .map_err(|e| AppError::SendFailed(e.to_string()))
    }

    /// Terminate the underlying multiplexer session, then mark disconnected.
    pub async fn kill(&self) -> Result<(), AppError> {
        self.mux.kill_session(self.key.as_str()).await?;
        self.disconnected.store(true, Ordering::Release);
        Ok(())
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
    }

    /// Consume capture events for the session's lifetime. Runs until the
    /// capture loop disconnects or `shutdown` fires.
    pub async fn drive(&self, mut rx: mpsc::Receiver<CaptureEvent>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                event = rx.recv() => match event {
                    Some(CaptureEvent::Delta(delta)) => self.on_delta(delta).await,
                    Some(CaptureEvent::Disconnected) => {
                        self.on_disconnected().await;
                        return;
                    }
                    None => return,
                }
            }
        }
    }

    async fn on_delta(&self, delta: OutputDelta) {
        let now = chrono::Utc::now();
        let prior_state = self.session.read().await.state;

        // Stuck is only reachable via check_stuck()'s timer; a delta never
        // carries enough idle time on its own to cross the threshold.
        let new_state = self.classifier.classify(
            &delta.snapshot.text,
            Some(prior_state),
            Duration::ZERO,
            self.stuck_threshold(),
        );
        let new_progress = self.progress.compute(&self.key, &delta.snapshot.text).await;

        let chars: Vec<char> = delta.snapshot.text.chars().collect();
        let tail_start = chars.len().saturating_sub(OUTPUT_TAIL_CHARS);
        let tail: String = chars[tail_start..].iter().collect();

        let (state_changed, progress_changed) = {
            let mut session = self.session.write().await;
            let state_changed = new_state != session.state;
            let progress_changed = new_progress.percent != session.progress.percent;
            session.last_activity = now;
            session.state = new_state;
            session.progress = new_progress;
            session.last_output_tail = tail.clone();
            (state_changed, progress_changed)
        };

        if state_changed {
            self.persist_state().await;
            self.emit(EventKind::StateChange, serde_json::json!({"prev": prior_state, "next": new_state}))
                .await;
            if new_state == SessionState::Error {
                self.emit(EventKind::AgentError, serde_json::json!({"tail": tail})).await;
            }
            if new_state == SessionState::Complete {
                self.emit(EventKind::AgentComplete, serde_json::json!({"reason": "task complete"}))
                    .await;
            }
        }
        if progress_changed {
            self.persist_state().await;
            let percent = self.session.read().await.progress.percent;
            self.emit(EventKind::Progress, serde_json::json!({"percent": percent})).await;
        }
    }

    async fn on_disconnected(&self) {
        self.disconnected.store(true, Ordering::Release);
        let mut session = self.session.write().await;
        if !session.state.is_terminal() {
            session.state = SessionState::Complete;
            drop(session);
            self.persist_state().await;
            self.emit(EventKind::AgentComplete, serde_json::json!({"reason": "session ended"})).await;
        }
    }

    /// Run by the shared stuck-check timer across all registered supervisors.
    pub async fn check_stuck(&self) {
        let now = chrono::Utc::now();
        let should_transition = {
            let session = self.session.read().await;
            if matches!(session.state, SessionState::Stuck | SessionState::Complete) {
                false
            } else {
                let idle = (now - session.last_activity).to_std().unwrap_or(Duration::ZERO);
                idle > self.stuck_threshold()
            }
        };
        if !should_transition {
            return;
        }

        let idle_seconds = {
            let mut session = self.session.write().await;
            let idle = (now - session.last_activity).to_std().unwrap_or(Duration::ZERO);
            session.state = SessionState::Stuck;
            idle.as_secs()
        };
        self.persist_state().await;
        let tail = self.session.read().await.last_output_tail.clone();
        self.emit(EventKind::AgentStuck, serde_json::json!({"idleSeconds": idle_seconds, "tail": tail}))
            .await;
    }

    async fn persist_state(&self) {
        let session = self.session.read().await.clone();
        if let Err(e) = self.store.upsert_session_state(&session).await {
            warn!(session = %self.key, error = %e, "failed to persist session state");
        }
    }

    async fn emit(&self, kind: EventKind, payload: serde_json::Value) {
        let event = model::Event::new(kind, self.key.clone(), payload);
        if self.events.send(event).await.is_err() {
            info!(session = %self.key, "event pipe closed, dropping event");
        }
    }
}
