// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Alert Gate: decides whether a published event becomes an outbound
//! notification, with spam-control policies and per-session suppression.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bus::EventBus;
use crate::config::AlertPolicyKind;
use crate::model::{AlertRecord, Event, EventKind, SessionKey};
use crate::notifier::Notifier;
use crate::store::AuditStore;

#[derive(Debug, Clone, Copy)]
pub struct AlertGateConfig {
    pub policy: AlertPolicyKind,
    pub rate_limit_window: Duration,
    pub batch_window: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub backoff_multiplier: u32,
}

#[derive(Debug, Clone, Default)]
struct RecordState {
    last_alerted_at: Option<chrono::DateTime<chrono::Utc>>,
    alert_count: u32,
    backoff_deadline: Option<chrono::DateTime<chrono::Utc>>,
}

type RecordKey = (SessionKey, EventKind);

/// Policy-driven filter between published events and the external notifier.
pub struct AlertGate {
    config: RwLock<AlertGateConfig>,
    records: RwLock<HashMap<RecordKey, RecordState>>,
    suppressions: RwLock<HashMap<SessionKey, chrono::DateTime<chrono::Utc>>>,
    batch: Mutex<HashMap<RecordKey, Event>>,
    notifier: Arc<dyn Notifier>,
    store: Arc<AuditStore>,
}

impl AlertGate {
    pub fn new(config: AlertGateConfig, notifier: Arc<dyn Notifier>, store: Arc<AuditStore>) -> Self {
        Self {
            config: RwLock::new(config),
            records: RwLock::new(HashMap::new()),
            suppressions: RwLock::new(HashMap::new()),
            batch: Mutex::new(HashMap::new()),
            notifier,
            store,
        }
    }

    pub async fn set_policy(&self, config: AlertGateConfig) {
        *self.config.write().await = config;
    }

    /// Apply the runtime-reloadable subset (policy + rate-limit window)
    /// without disturbing the other tunables.
    pub async fn patch_reloadable(&self, policy: AlertPolicyKind, rate_limit_window: Duration) {
        let mut config = self.config.write().await;
        config.policy = policy;
        config.rate_limit_window = rate_limit_window;
    }

    /// Swap the notifier's delivery mode live.
    pub fn set_notifier_mode(&self, mode: crate::config::NotifierDeliveryMode) {
        self.notifier.set_mode(mode);
    }

    pub async fn suppress(&self, key: SessionKey, duration: Duration) {
        let until = chrono::Utc::now()
            + chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero());
        self.suppressions.write().await.insert(key, until);
    }

    pub async fn unsuppress(&self, key: &SessionKey) {
        self.suppressions.write().await.remove(key);
    }

    pub async fn is_suppressed(&self, key: &SessionKey) -> bool {
        let suppressions = self.suppressions.read().await;
        match suppressions.get(key) {
            Some(until) => chrono::Utc::now() < *until,
            None => false,
        }
    }

    /// Snapshot of all known alert records, for `GET /api/alerts/states`.
    pub async fn states(&self) -> Vec<AlertRecord> {
        let suppressions = self.suppressions.read().await;
        self.records
            .read()
            .await
            .iter()
            .map(|((key, kind), state)| AlertRecord {
                session_key: key.as_str().to_owned(),
                event_kind: kind.as_str().to_owned(),
                last_alerted_at: state.last_alerted_at,
                alert_count: state.alert_count,
                suppression_until: suppressions.get(key).copied(),
                backoff_deadline: state.backoff_deadline,
            })
            .collect()
    }

    /// Drive the gate from the Event Bus: subscribe, and for each event
    /// apply suppression, the activity-reset rule, then the active policy.
    pub async fn run(self: Arc<Self>, bus: Arc<EventBus>, shutdown: CancellationToken) {
        let mut rx = bus.subscribe();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                event = rx.recv() => match event {
                    Ok(event) => self.on_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "alert gate lagged behind event bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        }
    }

    async fn on_event(&self, event: Event) {
        if event.kind == EventKind::StateChange {
            if let Some(prev) = event.payload.get("prev").and_then(|v| v.as_str()) {
                if prev == "stuck" {
                    let key = (event.session_key.clone(), EventKind::AgentStuck);
                    self.records.write().await.remove(&key);
                }
            }
        }

        if !matches!(
            event.kind,
            EventKind::AgentStuck
                | EventKind::AgentError
                | EventKind::AgentComplete
                | EventKind::NudgeRequested
        ) {
            return;
        }

        if self.is_suppressed(&event.session_key).await {
            return;
        }

        if self.eligible(&event).await {
            self.forward(event).await;
        }
    }

    async fn eligible(&self, event: &Event) -> bool {
        let config = *self.config.read().await;
        let key = (event.session_key.clone(), event.kind);
        let now = chrono::Utc::now();

        match config.policy {
            AlertPolicyKind::None => true,
            AlertPolicyKind::RateLimit => {
                let records = self.records.read().await;
                match records.get(&key).and_then(|r| r.last_alerted_at) {
                    Some(last) => {
                        (now - last).to_std().unwrap_or(Duration::ZERO) >= config.rate_limit_window
                    }
                    None => true,
                }
            }
            AlertPolicyKind::ExponentialBackoff => {
                let records = self.records.read().await;
                match records.get(&key).and_then(|r| r.backoff_deadline) {
                    Some(deadline) => now >= deadline,
                    None => true,
                }
            }
            AlertPolicyKind::Batch => {
                self.batch.lock().await.insert(key, event.clone());
                false
            }
        }
    }

    async fn forward(&self, event: Event) {
        let config = *self.config.read().await;
        let key = (event.session_key.clone(), event.kind);
        let now = chrono::Utc::now();

        {
            let mut records = self.records.write().await;
            let record = records.entry(key).or_default();
            record.alert_count += 1;
            record.last_alerted_at = Some(now);
            if config.policy == AlertPolicyKind::ExponentialBackoff {
                let exponent = record.alert_count.saturating_sub(1);
                let delay = config
                    .backoff_base
                    .saturating_mul(config.backoff_multiplier.saturating_pow(exponent))
                    .min(config.backoff_cap);
                record.backoff_deadline =
                    Some(now + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero()));
            }
        }

        if let Err(e) = self.notifier.notify(&event).await {
            warn!(error = %e, "notifier delivery failed, not retried");
        }
        if let Err(e) = self.store.insert_alert_log(&event).await {
            warn!(error = %e, "failed to persist alert log row");
        }
    }

    /// Periodic flusher for the `batch` policy: dedup by `(session, kind)`
    /// keeping the latest payload, then forward each survivor.
    pub async fn run_batch_flusher(self: Arc<Self>, shutdown: CancellationToken) {
        loop {
            let window = self.config.read().await.batch_window;
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(window) => {}
            }
            let due: Vec<Event> = {
                let mut batch = self.batch.lock().await;
                batch.drain().map(|(_, v)| v).collect()
            };
            if due.is_empty() {
                continue;
            }
            info!(count = due.len(), "flushing batched alerts");
            for event in due {
                self.forward(event).await;
            }
        }
    }
}
