// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test doubles for the supervision engine's integration tests.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use paneward::capture::{CaptureEvent, Multiplexer, OutputDelta};
use paneward::error::AppError;
use paneward::model::{Event, PaneSnapshot};
use paneward::notifier::Notifier;
use tokio::sync::Mutex;

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, String>,
    fail_send_keys: HashSet<String>,
    sent: Vec<(String, String, bool)>,
}

/// An in-memory multiplexer: sessions are just `name -> pane text` entries,
/// with no subprocess involved. Lets tests drive capture deltas by editing
/// the map directly instead of shelling out to a real `tmux`.
#[derive(Clone, Default)]
pub struct FakeMultiplexer {
    inner: Arc<Mutex<Inner>>,
}

impl FakeMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_session(&self, name: &str, text: &str) {
        self.inner.lock().await.sessions.insert(name.to_string(), text.to_string());
    }

    pub async fn set_text(&self, name: &str, text: &str) {
        self.inner.lock().await.sessions.insert(name.to_string(), text.to_string());
    }

    pub async fn remove_session(&self, name: &str) {
        self.inner.lock().await.sessions.remove(name);
    }

    pub async fn fail_send_keys(&self, name: &str) {
        self.inner.lock().await.fail_send_keys.insert(name.to_string());
    }

    #[allow(dead_code)]
    pub async fn sent_commands(&self) -> Vec<(String, String, bool)> {
        self.inner.lock().await.sent.clone()
    }
}

impl Multiplexer for FakeMultiplexer {
    fn has_session<'a>(&'a self, session: &'a str) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move { self.inner.lock().await.sessions.contains_key(session) })
    }

    fn capture_pane<'a>(
        &'a self,
        session: &'a str,
        _lines: u32,
    ) -> Pin<Box<dyn Future<Output = Result<String, AppError>> + Send + 'a>> {
        Box::pin(async move {
            self.inner
                .lock()
                .await
                .sessions
                .get(session)
                .cloned()
                .ok_or_else(|| AppError::SessionNotFound(session.to_string()))
        })
    }

    fn send_keys<'a>(
        &'a self,
        session: &'a str,
        text: &'a str,
        press_enter: bool,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            if inner.fail_send_keys.contains(session) {
                return Err(AppError::NotConnected);
            }
            inner.sent.push((session.to_string(), text.to_string(), press_enter));
            Ok(())
        })
    }

    fn kill_session<'a>(
        &'a self,
        session: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        Box::pin(async move {
            self.inner.lock().await.sessions.remove(session);
            Ok(())
        })
    }

    fn list_sessions(&self) -> Pin<Box<dyn Future<Output = Result<Vec<(String, i64)>, AppError>> + Send + '_>> {
        Box::pin(async move { Ok(self.inner.lock().await.sessions.keys().map(|k| (k.clone(), 0)).collect()) })
    }
}

/// Records every event handed to it instead of delivering anywhere.
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

/// Build an `OutputDelta` carrying `text` as both the new suffix and the
/// full snapshot, the shape a capture loop produces for a short pane.
pub fn delta(text: &str) -> CaptureEvent {
    CaptureEvent::Delta(OutputDelta {
        suffix: text.lines().map(str::to_owned).collect(),
        snapshot: PaneSnapshot { text: text.to_string(), hash: 0, captured_at: chrono::Utc::now() },
    })
}
