// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::delta;
use paneward::classifier::GlyphClassifier;
use paneward::model::{EventKind, SessionKey, SessionState};
use paneward::progress::{ProgressParser, TaskSpecLookupPolicy};
use paneward::store::AuditStore;
use paneward::supervisor::Supervisor;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn test_progress() -> Arc<ProgressParser> {
    Arc::new(ProgressParser::new(
        TaskSpecLookupPolicy { root_candidates: vec![], filenames: vec!["TASKS.md".to_string()] },
        Duration::from_secs(30),
        10,
    ))
}

#[tokio::test]
async fn session_disappearing_marks_complete_and_emits_agent_complete() {
    let mux = Arc::new(common::FakeMultiplexer::new());
    mux.add_session("demo-a", "❯ ").await;
    let mux_dyn: Arc<dyn paneward::capture::Multiplexer> = mux.clone();

    let store = Arc::new(AuditStore::open_in_memory().unwrap());
    let key = SessionKey::new("demo-a").unwrap();
    let (events_tx, mut events_rx) = mpsc::channel(32);

    let supervisor = Arc::new(Supervisor::new(
        key.clone(),
        mux_dyn,
        Arc::new(GlyphClassifier),
        test_progress(),
        Arc::clone(&store),
        events_tx,
        Duration::from_secs(5),
        Duration::from_secs(300),
    ));

    let (capture_tx, capture_rx) = mpsc::channel(8);
    let shutdown = CancellationToken::new();
    let drive = tokio::spawn({
        let supervisor = Arc::clone(&supervisor);
        let shutdown = shutdown.clone();
        async move { supervisor.drive(capture_rx, shutdown).await }
    });

    capture_tx.send(delta("some output\n❯ ")).await.unwrap();
    capture_tx.send(paneward::capture::CaptureEvent::Disconnected).await.unwrap();

    drive.await.unwrap();

    let snapshot = supervisor.snapshot().await;
    assert_eq!(snapshot.state, SessionState::Complete);
    assert!(supervisor.is_disconnected());

    let persisted = store.get_session_state(&key).await.unwrap().unwrap();
    assert_eq!(persisted.state, SessionState::Complete);

    let mut saw_complete = false;
    while let Ok(event) = events_rx.try_recv() {
        if event.kind == EventKind::AgentComplete && event.payload["reason"] == "session ended" {
            saw_complete = true;
        }
    }
    assert!(saw_complete, "expected an agent_complete event with reason=session ended");
}

#[tokio::test]
async fn disconnected_session_rejects_further_commands() {
    let mux = Arc::new(common::FakeMultiplexer::new());
    mux.add_session("demo-b", "❯ ").await;
    let mux_dyn: Arc<dyn paneward::capture::Multiplexer> = mux.clone();

    let store = Arc::new(AuditStore::open_in_memory().unwrap());
    let key = SessionKey::new("demo-b").unwrap();
    let (events_tx, _events_rx) = mpsc::channel(32);

    let supervisor = Supervisor::new(
        key,
        mux_dyn,
        Arc::new(GlyphClassifier),
        test_progress(),
        store,
        events_tx,
        Duration::from_secs(5),
        Duration::from_secs(300),
    );

    mux.remove_session("demo-b").await;
    let err = supervisor.kill().await;
    assert!(err.is_ok());
    assert!(supervisor.is_disconnected());
    assert!(matches!(supervisor.send_keys("continue", true).await, Err(paneward::error::AppError::NotConnected)));
}
