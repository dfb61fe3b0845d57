// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum_test::TestServer;
use clap::Parser;
use common::{FakeMultiplexer, RecordingNotifier};
use paneward::alert::{AlertGate, AlertGateConfig};
use paneward::bus::{EventBus, EventLog};
use paneward::classifier::GlyphClassifier;
use paneward::config::{AlertPolicyKind, Config};
use paneward::model::SessionKey;
use paneward::notifier::Notifier;
use paneward::progress::{ProgressParser, TaskSpecLookupPolicy};
use paneward::queue::{CommandQueue, QueueConfig};
use paneward::store::AuditStore;
use paneward::supervisor::registry::{SupervisorParams, SupervisorRegistry};
use paneward::transport::{self, AppState};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

async fn build_server(session: &str, poll_interval: Duration) -> (TestServer, CancellationToken) {
    let mux = Arc::new(FakeMultiplexer::new());
    mux.add_session(session, "❯ ").await;
    let mux_dyn: Arc<dyn paneward::capture::Multiplexer> = mux.clone();

    let store = Arc::new(AuditStore::open_in_memory().unwrap());
    let progress = Arc::new(ProgressParser::new(
        TaskSpecLookupPolicy { root_candidates: vec![], filenames: vec!["TASKS.md".to_string()] },
        Duration::from_secs(30),
        10,
    ));
    let (events_tx, mut events_rx) = mpsc::channel(64);

    let params = SupervisorParams {
        poll_interval,
        capture_lines: 200,
        capture_timeout: Duration::from_secs(5),
        stuck_threshold: Duration::from_secs(300),
    };
    let registry = Arc::new(SupervisorRegistry::new(
        Arc::clone(&mux_dyn),
        Arc::new(GlyphClassifier),
        progress,
        Arc::clone(&store),
        events_tx.clone(),
        params,
    ));
    let shutdown = CancellationToken::new();
    let key = SessionKey::new(session).unwrap();
    registry.spawn(key, shutdown.clone()).await.unwrap();

    let queue_config = QueueConfig {
        concurrency: 2,
        rate_per_sec: 50,
        max_attempts: 3,
        backoff_base: Duration::from_millis(20),
        backoff_multiplier: 2,
    };
    let queue =
        Arc::new(CommandQueue::new(Arc::clone(&store), Arc::clone(&registry), events_tx, queue_config));
    queue.spawn_workers(shutdown.clone());

    let bus = Arc::new(EventBus::new(Arc::new(EventLog::new(None, 100))).with_command_queue(Arc::clone(&queue)));
    {
        let bus = Arc::clone(&bus);
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                bus.publish(event).await;
            }
        });
    }

    let notifier: Arc<dyn Notifier> = Arc::new(RecordingNotifier::default());
    let alert_config = AlertGateConfig {
        policy: AlertPolicyKind::RateLimit,
        rate_limit_window: Duration::from_secs(300),
        batch_window: Duration::from_secs(30),
        backoff_base: Duration::from_secs(60),
        backoff_cap: Duration::from_secs(3600),
        backoff_multiplier: 2,
    };
    let alert_gate = Arc::new(AlertGate::new(alert_config, notifier, Arc::clone(&store)));
    tokio::spawn(Arc::clone(&alert_gate).run(Arc::clone(&bus), shutdown.clone()));

    let config = Config::parse_from(["paneward", "--session", session]);
    let state = Arc::new(AppState::new(
        registry, queue, bus, alert_gate, store, mux_dyn, &config, shutdown.clone(),
    ));
    let router = transport::build_router(state);
    (TestServer::new(router).expect("test server"), shutdown)
}

#[tokio::test]
async fn unknown_session_returns_404() {
    let (server, _shutdown) = build_server("demo-x", Duration::from_secs(60)).await;
    let response = server.get("/api/agents/never-registered").await;
    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn kill_is_idempotent_and_session_vanishes_from_listing() {
    let (server, _shutdown) = build_server("demo-y", Duration::from_millis(15)).await;

    let ok = server.get("/api/agents/demo-y").await;
    ok.assert_status_ok();

    let killed = server.post("/api/agents/demo-y/kill").await;
    killed.assert_status_ok();

    // The capture loop needs a couple of ticks to notice the session is gone
    // and unregister it.
    tokio::time::sleep(Duration::from_millis(150)).await;

    let gone = server.get("/api/agents/demo-y").await;
    gone.assert_status(StatusCode::NOT_FOUND);

    let second_kill = server.post("/api/agents/demo-y/kill").await;
    second_kill.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn suppress_then_unsuppress_round_trips_through_alert_states() {
    let (server, _shutdown) = build_server("demo-z", Duration::from_secs(60)).await;

    let resp = server
        .post("/api/alerts/demo-z/suppress")
        .json(&serde_json::json!({"duration": 10}))
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["success"], serde_json::json!(true));
    assert_eq!(body["suppressedForMinutes"], serde_json::json!(10));

    let resp = server.post("/api/alerts/demo-z/unsuppress").await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["success"], serde_json::json!(true));
}

#[tokio::test]
async fn nudge_flows_through_the_bus_into_a_queued_command() {
    let (server, _shutdown) = build_server("demo-w", Duration::from_secs(60)).await;

    let resp = server
        .post("/api/agents/demo-w/nudge")
        .json(&serde_json::json!({"message": "keep going"}))
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"], serde_json::json!("queued"));
    assert!(body["jobId"].as_str().is_some());

    let commands = server.get("/api/agents/demo-w/commands").await;
    commands.assert_status_ok();
    let body: serde_json::Value = commands.json();
    assert_eq!(body["commands"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn health_reports_push_clients_and_timestamp() {
    let (server, _shutdown) = build_server("demo-v", Duration::from_secs(60)).await;
    let resp = server.get("/health").await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"], serde_json::json!("ok"));
    assert_eq!(body["pushClients"], serde_json::json!(0));
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn stats_reports_agents_commands_and_uptime() {
    let (server, _shutdown) = build_server("demo-u", Duration::from_secs(60)).await;
    let resp = server.get("/api/stats").await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["agents"]["total"], serde_json::json!(1));
    assert!(body["commands"]["pending"].is_u64());
    assert!(body["uptime"].is_u64());
}
