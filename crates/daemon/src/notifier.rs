// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Notifier: the opaque outbound sink an eligible alert is handed to. The
//! core never interprets a notifier's response beyond success/failure.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};

use tracing::warn;

use crate::config::NotifierDeliveryMode;
use crate::error::AppError;
use crate::model::{Event, EventKind};

/// Formats an event into the message a notifier delivers.
pub fn format_message(event: &Event) -> String {
    match event.kind {
        EventKind::AgentStuck => {
            let idle = event.payload.get("idleSeconds").and_then(|v| v.as_u64()).unwrap_or(0);
            format!("{} is stuck (idle {idle}s)", event.session_key)
        }
        EventKind::AgentError => format!("{} hit an error", event.session_key),
        EventKind::AgentComplete => format!("{} finished", event.session_key),
        other => format!("{} — {}", event.session_key, other.as_str()),
    }
}

/// An outbound alert sink, invoked once per eligible event. Failures are
/// logged by the caller and never retried.
pub trait Notifier: Send + Sync {
    fn notify<'a>(&'a self, event: &'a Event) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>>;

    /// Swap the delivery mode live, for `POST /api/config/reload`. A no-op
    /// for notifiers with no such knob.
    fn set_mode(&self, _mode: NotifierDeliveryMode) {}
}

/// Invokes an external notifier binary as an opaque subprocess, the way
/// `heartbeat_reconcile` shells out to the `bd` CLI: fire, collect the exit
/// status, log stderr on failure.
pub struct ProcessNotifier {
    bin: PathBuf,
    mode: AtomicU8,
}

impl ProcessNotifier {
    pub fn new(bin: PathBuf, mode: NotifierDeliveryMode) -> Self {
        Self { bin, mode: AtomicU8::new(mode as u8) }
    }

    pub fn mode(&self) -> NotifierDeliveryMode {
        match self.mode.load(Ordering::Relaxed) {
            0 => NotifierDeliveryMode::System,
            _ => NotifierDeliveryMode::Direct,
        }
    }
}

impl Notifier for ProcessNotifier {
    fn notify<'a>(&'a self, event: &'a Event) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        Box::pin(async move {
            let message = format_message(event);
            let mode_arg = match self.mode() {
                NotifierDeliveryMode::System => "system",
                NotifierDeliveryMode::Direct => "direct",
            };

            let output = tokio::process::Command::new(&self.bin)
                .arg(mode_arg)
                .arg(&message)
                .output()
                .await
                .map_err(|e| AppError::NotifierError(e.to_string()))?;

            if output.status.success() {
                Ok(())
            } else {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(AppError::NotifierError(stderr.trim().to_owned()))
            }
        })
    }

    fn set_mode(&self, mode: NotifierDeliveryMode) {
        self.mode.store(mode as u8, Ordering::Relaxed);
    }
}

/// Publish-only mirror to NATS, grounded on `NatsPublisher`: every alert is
/// also broadcast to `{prefix}.alerts` for external subscribers. Delivery
/// failures are logged, never retried, and never block the primary notifier.
pub struct NatsMirror {
    client: async_nats::Client,
    subject: String,
}

impl NatsMirror {
    pub fn new(client: async_nats::Client, prefix: &str) -> Self {
        Self { client, subject: format!("{prefix}.alerts") }
    }

    pub async fn connect(url: &str, prefix: &str) -> anyhow::Result<Self> {
        let client = async_nats::ConnectOptions::new().retry_on_initial_connect().connect(url).await?;
        Ok(Self::new(client, prefix))
    }

    pub async fn mirror(&self, event: &Event) {
        match serde_json::to_vec(event) {
            Ok(bytes) => {
                if let Err(e) = self.client.publish(self.subject.clone(), bytes.into()).await {
                    warn!(error = %e, "NATS alert mirror publish failed");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize event for NATS mirror"),
        }
    }
}

#[cfg(test)]
pub mod tests_support {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    pub struct RecordingNotifier {
        pub calls: AtomicU32,
    }

    impl Notifier for RecordingNotifier {
        fn notify<'a>(
            &'a self,
            _event: &'a Event,
        ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Box::pin(async move { Ok(()) })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SessionKey;

    #[test]
    fn formats_stuck_message_with_idle_seconds() {
        let key = SessionKey::new("demo-a").unwrap();
        let event = Event::new(EventKind::AgentStuck, key, serde_json::json!({"idleSeconds": 42}));
        assert_eq!(format_message(&event), "demo-a is stuck (idle 42s)");
    }
}
