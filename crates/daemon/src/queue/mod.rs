// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command Queue: durable at-least-once delivery of operator-issued
//! commands, with bounded worker concurrency, a global rate cap, and
//! exponential backoff retry.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::AppError;
use crate::model::{Command, CommandStatus, Event, EventKind, SessionKey};
use crate::store::AuditStore;
use crate::supervisor::registry::SupervisorRegistry;

/// Tunables governing worker concurrency, the global rate cap, and retry
/// backoff. Mirrors the §6 configuration surface's command-queue fields.
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    pub concurrency: usize,
    pub rate_per_sec: u32,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_multiplier: u32,
}

/// Durable at-least-once queue of `send-to-session` commands.
pub struct CommandQueue {
    store: Arc<AuditStore>,
    sessions: Arc<SupervisorRegistry>,
    event_tx: mpsc::Sender<Event>,
    job_tx: mpsc::Sender<String>,
    job_rx: Mutex<Option<mpsc::Receiver<String>>>,
    rate: Arc<Semaphore>,
    config: QueueConfig,
}

impl CommandQueue {
    pub fn new(
        store: Arc<AuditStore>,
        sessions: Arc<SupervisorRegistry>,
        event_tx: mpsc::Sender<Event>,
        config: QueueConfig,
    ) -> Self {
        let (job_tx, job_rx) = mpsc::channel(1024);
        Self {
            store,
            sessions,
            event_tx,
            job_tx,
            job_rx: Mutex::new(Some(job_rx)),
            rate: Arc::new(Semaphore::new(config.rate_per_sec.max(1) as usize)),
            config,
        }
    }

    /// Append a `pending` row and wake a worker. Not idempotent: each call
    /// generates a new job id, per spec.md's §4.9 command-side contract.
    pub async fn enqueue(
        &self,
        session_key: SessionKey,
        payload: String,
        source: String,
    ) -> Result<String, AppError> {
        if payload.trim().is_empty() {
            return Err(AppError::InvalidRequest("command payload cannot be empty".into()));
        }
        let job_id = uuid::Uuid::new_v4().to_string();
        let command = Command {
            id: job_id.clone(),
            session_key,
            payload,
            source,
            status: CommandStatus::Pending,
            created_at: chrono::Utc::now(),
            sent_at: None,
            retry_count: 0,
            last_error: None,
        };
        self.store.upsert_command(&command).await?;
        let _ = self.job_tx.send(job_id.clone()).await;
        Ok(job_id)
    }

    /// Recovery: move any `processing` rows left over from a prior run back
    /// to `pending`, then re-enqueue them. Call once at startup.
    pub async fn recover(&self) -> Result<(), AppError> {
        let recovered = self.store.recover_processing_to_pending().await?;
        for job_id in recovered {
            let _ = self.job_tx.send(job_id).await;
        }
        Ok(())
    }

    /// Spawn the worker pool. Each worker pulls job ids from the shared
    /// receiver, rate-limits itself against the global cap, then processes.
    pub fn spawn_workers(self: &Arc<Self>, shutdown: CancellationToken) {
        let rx = self
            .job_rx
            .try_lock()
            .ok()
            .and_then(|mut guard| guard.take())
            .expect("spawn_workers called once");
        let shared_rx = Arc::new(Mutex::new(rx));

        for worker_id in 0..self.config.concurrency {
            let queue = Arc::clone(self);
            let shared_rx = Arc::clone(&shared_rx);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    let job_id = tokio::select! {
                        _ = shutdown.cancelled() => return,
                        job = async { shared_rx.lock().await.recv().await } => match job {
                            Some(id) => id,
                            None => return,
                        },
                    };

                    let Ok(permit) = queue.rate.clone().acquire_owned().await else {
                        return;
                    };
                    queue.process_job(&job_id, worker_id).await;
                    drop(permit);
                }
            });
        }

        let rate = Arc::clone(&self.rate);
        let rate_per_sec = self.config.rate_per_sec;
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = interval.tick() => {
                        let available = rate.available_permits();
                        let top_up = (rate_per_sec as usize).saturating_sub(available);
                        if top_up > 0 {
                            rate.add_permits(top_up);
                        }
                    }
                }
            }
        });
    }

    async fn process_job(&self, job_id: &str, worker_id: usize) {
        let Some(mut command) = self.store.get_command(job_id).await.ok().flatten() else {
            warn!(job_id, "job id had no backing row, dropping");
            return;
        };
        if command.status != CommandStatus::Pending {
            return;
        }

        command.status = CommandStatus::Processing;
        command.retry_count += 1;
        if let Err(e) = self.store.upsert_command(&command).await {
            warn!(job_id, error = %e, "failed to mark command processing");
        }

        let Some(supervisor) = self.sessions.get(&command.session_key).await else {
            self.fail_terminally(command, "session not registered".into()).await;
            return;
        };

        match supervisor.send_keys(&command.payload, true).await {
            Ok(()) => {
                command.status = CommandStatus::Sent;
                command.sent_at = Some(chrono::Utc::now());
                let _ = self.store.upsert_command(&command).await;
                let _ = self
                    .event_tx
                    .send(Event::new(
                        EventKind::CommandSent,
                        command.session_key.clone(),
                        serde_json::json!({"jobId": command.id}),
                    ))
                    .await;
                info!(worker_id, job_id, "command sent");
            }
            Err(e) => {
                command.last_error = Some(e.to_string());
                if command.retry_count < self.config.max_attempts {
                    let _ = self.store.upsert_command(&command).await;
                    self.schedule_retry(job_id.to_owned(), command.retry_count);
                } else {
                    self.fail_terminally(command, e.to_string()).await;
                }
            }
        }
    }

    fn schedule_retry(&self, job_id: String, retry_count: u32) {
        let delay = self.config.backoff_base
            * self.config.backoff_multiplier.saturating_pow(retry_count.saturating_sub(1));
        let job_tx = self.job_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = job_tx.send(job_id).await;
        });
    }

    async fn fail_terminally(&self, mut command: Command, reason: String) {
        command.status = CommandStatus::Failed;
        command.last_error = Some(reason);
        let _ = self.store.upsert_command(&command).await;
        let _ = self
            .event_tx
            .send(Event::new(
                EventKind::CommandFailed,
                command.session_key.clone(),
                serde_json::json!({"jobId": command.id, "lastError": command.last_error}),
            ))
            .await;
    }
}
