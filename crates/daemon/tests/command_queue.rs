// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::FakeMultiplexer;
use paneward::classifier::GlyphClassifier;
use paneward::model::{CommandStatus, EventKind, SessionKey};
use paneward::progress::{ProgressParser, TaskSpecLookupPolicy};
use paneward::queue::{CommandQueue, QueueConfig};
use paneward::store::AuditStore;
use paneward::supervisor::registry::{SupervisorParams, SupervisorRegistry};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn command_retries_then_fails_terminally() {
    let mux = Arc::new(FakeMultiplexer::new());
    mux.add_session("demo-b", "❯ ").await;
    mux.fail_send_keys("demo-b").await;
    let mux_dyn: Arc<dyn paneward::capture::Multiplexer> = mux.clone();

    let store = Arc::new(AuditStore::open_in_memory().unwrap());
    let progress = Arc::new(ProgressParser::new(
        TaskSpecLookupPolicy { root_candidates: vec![], filenames: vec!["TASKS.md".to_string()] },
        Duration::from_secs(30),
        10,
    ));
    let (events_tx, mut events_rx) = mpsc::channel(32);

    let params = SupervisorParams {
        poll_interval: Duration::from_secs(60),
        capture_lines: 200,
        capture_timeout: Duration::from_secs(5),
        stuck_threshold: Duration::from_secs(300),
    };
    let registry = Arc::new(SupervisorRegistry::new(
        mux_dyn,
        Arc::new(GlyphClassifier),
        progress,
        Arc::clone(&store),
        events_tx.clone(),
        params,
    ));
    let shutdown = CancellationToken::new();
    let key = SessionKey::new("demo-b").unwrap();
    registry.spawn(key.clone(), shutdown.clone()).await.unwrap();

    let queue_config = QueueConfig {
        concurrency: 1,
        rate_per_sec: 100,
        max_attempts: 3,
        backoff_base: Duration::from_millis(20),
        backoff_multiplier: 2,
    };
    let queue =
        Arc::new(CommandQueue::new(Arc::clone(&store), Arc::clone(&registry), events_tx, queue_config));
    queue.spawn_workers(shutdown.clone());

    let job_id = queue.enqueue(key, "continue".into(), "api".into()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;

    let command = store.get_command(&job_id).await.unwrap().unwrap();
    assert_eq!(command.status, CommandStatus::Failed);
    assert_eq!(command.retry_count, 3);
    assert!(command.last_error.is_some());

    let mut saw_failed = false;
    while let Ok(event) = events_rx.try_recv() {
        if event.kind == EventKind::CommandFailed {
            saw_failed = true;
        }
    }
    assert!(saw_failed, "expected a command_failed event after exhausting retries");

    shutdown.cancel();
}

#[tokio::test]
async fn command_queue_rejects_empty_payload() {
    let mux = Arc::new(FakeMultiplexer::new());
    mux.add_session("demo-c", "❯ ").await;
    let mux_dyn: Arc<dyn paneward::capture::Multiplexer> = mux.clone();

    let store = Arc::new(AuditStore::open_in_memory().unwrap());
    let progress = Arc::new(ProgressParser::new(
        TaskSpecLookupPolicy { root_candidates: vec![], filenames: vec!["TASKS.md".to_string()] },
        Duration::from_secs(30),
        10,
    ));
    let (events_tx, _events_rx) = mpsc::channel(32);
    let params = SupervisorParams {
        poll_interval: Duration::from_secs(60),
        capture_lines: 200,
        capture_timeout: Duration::from_secs(5),
        stuck_threshold: Duration::from_secs(300),
    };
    let registry = Arc::new(SupervisorRegistry::new(
        mux_dyn,
        Arc::new(GlyphClassifier),
        progress,
        store.clone(),
        events_tx.clone(),
        params,
    ));
    let queue_config =
        QueueConfig { concurrency: 1, rate_per_sec: 100, max_attempts: 3, backoff_base: Duration::from_millis(20), backoff_multiplier: 2 };
    let queue = CommandQueue::new(store, registry, events_tx, queue_config);

    let key = SessionKey::new("demo-c").unwrap();
    let result = queue.enqueue(key, "   ".into(), "api".into()).await;
    assert!(result.is_err());
}
