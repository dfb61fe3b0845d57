// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use paneward::alert::{AlertGate, AlertGateConfig};
use paneward::bus::{EventBus, EventLog};
use paneward::capture::tmux::TmuxMultiplexer;
use paneward::capture::Multiplexer;
use paneward::classifier::GlyphClassifier;
use paneward::config::Config;
use paneward::model::SessionKey;
use paneward::notifier::{NatsMirror, ProcessNotifier};
use paneward::progress::{ProgressParser, TaskSpecLookupPolicy};
use paneward::queue::{CommandQueue, QueueConfig};
use paneward::store::AuditStore;
use paneward::supervisor::registry::{SupervisorParams, SupervisorRegistry};
use paneward::transport::{self, AppState};

fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;

    let filter = if std::env::var("RUST_LOG").is_err() && config.log_level == "info" {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    } else {
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }
    init_tracing(&config);

    if let Err(e) = run(config).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run(config: Config) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();

    std::fs::create_dir_all(&config.data_dir)?;
    let store = Arc::new(AuditStore::open(&config.data_dir.join("audit.db"))?);

    let mux: Arc<dyn Multiplexer> =
        Arc::new(TmuxMultiplexer::new(config.tmux_socket.clone()));

    let classifier = Arc::new(GlyphClassifier);

    let lookup_policy = TaskSpecLookupPolicy {
        root_candidates: config.task_spec_root_candidates.clone(),
        filenames: config.task_spec_filenames.clone(),
    };
    let progress = Arc::new(ProgressParser::new(
        lookup_policy,
        Duration::from_secs(config.task_spec_ttl_secs),
        config.output_mode_estimate,
    ));

    let (event_tx, mut event_rx) = mpsc::channel(1024);

    let supervisor_params = SupervisorParams {
        poll_interval: Duration::from_secs(config.poll_interval_secs),
        capture_lines: config.capture_lines,
        capture_timeout: Duration::from_secs(config.capture_timeout_secs),
        stuck_threshold: Duration::from_secs(config.stuck_threshold_secs),
    };
    let registry = Arc::new(SupervisorRegistry::new(
        Arc::clone(&mux),
        classifier,
        progress,
        Arc::clone(&store),
        event_tx.clone(),
        supervisor_params,
    ));

    let queue_config = QueueConfig {
        concurrency: config.command_concurrency,
        rate_per_sec: config.command_rate_per_sec,
        max_attempts: config.command_max_attempts,
        backoff_base: Duration::from_secs(config.command_backoff_base_secs),
        backoff_multiplier: config.command_backoff_multiplier,
    };
    let queue = Arc::new(CommandQueue::new(
        Arc::clone(&store),
        Arc::clone(&registry),
        event_tx.clone(),
        queue_config,
    ));
    queue.spawn_workers(shutdown.clone());
    queue.recover().await?;

    let event_log = Arc::new(EventLog::new(Some(&config.data_dir), 10_000));
    let bus = Arc::new(EventBus::new(event_log).with_command_queue(Arc::clone(&queue)));

    // Pipe events emitted by Supervisors and the Command Queue into the bus.
    {
        let bus = Arc::clone(&bus);
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                bus.publish(event).await;
            }
        });
    }

    let notifier: Arc<dyn paneward::notifier::Notifier> = Arc::new(ProcessNotifier::new(
        config.notifier_bin.clone().unwrap_or_else(|| "paneward-notify".into()),
        config.notifier_delivery_mode,
    ));
    let alert_config = AlertGateConfig {
        policy: config.alert_policy,
        rate_limit_window: Duration::from_secs(config.rate_limit_window_secs),
        batch_window: Duration::from_secs(config.batch_window_secs),
        backoff_base: Duration::from_secs(config.backoff_base_secs),
        backoff_cap: Duration::from_secs(config.backoff_cap_secs),
        backoff_multiplier: config.backoff_multiplier,
    };
    let alert_gate = Arc::new(AlertGate::new(alert_config, notifier, Arc::clone(&store)));

    tokio::spawn(Arc::clone(&alert_gate).run(Arc::clone(&bus), shutdown.clone()));
    tokio::spawn(Arc::clone(&alert_gate).run_batch_flusher(shutdown.clone()));

    if let Ok(nats_url) = std::env::var("PANEWARD_NATS_URL") {
        match NatsMirror::connect(&nats_url, "paneward").await {
            Ok(mirror) => {
                let mut events = bus.subscribe();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            _ = shutdown.cancelled() => return,
                            event = events.recv() => match event {
                                Ok(event) => mirror.mirror(&event).await,
                                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                            }
                        }
                    }
                });
            }
            Err(e) => warn!(error = %e, "failed to connect NATS alert mirror, continuing without it"),
        }
    }

    tokio::spawn(Arc::clone(&registry).run_stuck_check_timer(
        Duration::from_secs(config.stuck_check_interval_secs),
        shutdown.clone(),
    ));

    if config.auto_detect {
        spawn_auto_detect(Arc::clone(&registry), Arc::clone(&mux), shutdown.clone());
    } else {
        for name in &config.sessions_to_monitor {
            let key = SessionKey::new(name.clone())?;
            if let Err(e) = registry.spawn(key, shutdown.clone()).await {
                warn!(session = %name, error = %e, "failed to register session at startup");
            }
        }
    }

    let state = Arc::new(AppState::new(
        Arc::clone(&registry),
        Arc::clone(&queue),
        Arc::clone(&bus),
        Arc::clone(&alert_gate),
        Arc::clone(&store),
        Arc::clone(&mux),
        &config,
        shutdown.clone(),
    ));
    let router = transport::build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("paneward listening on {}", listener.local_addr()?);

    let sd = shutdown.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).with_graceful_shutdown(sd.cancelled_owned()).await
        {
            error!("HTTP server error: {e}");
        }
    });

    wait_for_signal(shutdown.clone()).await;

    const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
    match tokio::time::timeout(DRAIN_TIMEOUT, server).await {
        Ok(_) => info!("HTTP server drained cleanly"),
        Err(_) => warn!("HTTP server did not drain within {DRAIN_TIMEOUT:?}, exiting anyway"),
    }
    Ok(())
}

/// Periodically reconciles the registered session set against the
/// multiplexer's live session list when `--auto-detect` is set.
fn spawn_auto_detect(
    registry: Arc<SupervisorRegistry>,
    mux: Arc<dyn Multiplexer>,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(10));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    let Ok(sessions) = mux.list_sessions().await else { continue };
                    for (name, _) in sessions {
                        let Ok(key) = SessionKey::new(name.clone()) else { continue };
                        if !registry.contains(&key).await {
                            if let Err(e) = registry.spawn(key, shutdown.clone()).await {
                                warn!(session = %name, error = %e, "auto-detect failed to register session");
                            }
                        }
                    }
                }
            }
        }
    });
}

/// First SIGTERM/SIGINT triggers graceful shutdown; a second forces exit.
async fn wait_for_signal(shutdown: CancellationToken) {
    let mut sigterm =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

    tokio::select! {
        _ = async {
            if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
        } => info!("received SIGTERM"),
        _ = async {
            if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
        } => info!("received SIGINT"),
    }
    shutdown.cancel();

    tokio::select! {
        _ = async {
            if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
        } => info!("received SIGTERM again, forcing exit"),
        _ = async {
            if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
        } => info!("received SIGINT again, forcing exit"),
        _ = tokio::time::sleep(Duration::from_secs(10)) => return,
    }
    std::process::exit(130);
}
