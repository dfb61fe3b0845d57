// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pane Capture Session: per-session polling loop that converts raw
//! multiplexer pane content into `output-delta` events.

pub mod tmux;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::model::PaneSnapshot;

/// Opaque handle to the terminal multiplexer, invoked as a subprocess.
///
/// Object-safe: callers hold `Box<dyn Multiplexer>` / `Arc<dyn Multiplexer>`.
pub trait Multiplexer: Send + Sync + 'static {
    /// Whether a named session currently exists.
    fn has_session<'a>(
        &'a self,
        session: &'a str,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

    /// Read the last `lines` rows of the named session's visible pane.
    fn capture_pane<'a>(
        &'a self,
        session: &'a str,
        lines: u32,
    ) -> Pin<Box<dyn Future<Output = Result<String, AppError>> + Send + 'a>>;

    /// Write a text payload to the session, optionally followed by Enter.
    fn send_keys<'a>(
        &'a self,
        session: &'a str,
        text: &'a str,
        press_enter: bool,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>>;

    /// Terminate the named session.
    fn kill_session<'a>(
        &'a self,
        session: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>>;

    /// List known sessions as `(name, lastActivityEpochSecs)` pairs.
    fn list_sessions(&self) -> Pin<Box<dyn Future<Output = Result<Vec<(String, i64)>, AppError>> + Send + '_>>;
}

/// An `output-delta`: the suffix of lines new in the current snapshot
/// relative to the prior one, alongside the full refreshed snapshot.
#[derive(Debug, Clone)]
pub struct OutputDelta {
    pub suffix: Vec<String>,
    pub snapshot: PaneSnapshot,
}

/// Events a [`PaneCaptureSession`] emits to its owning Supervisor.
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    Delta(OutputDelta),
    Disconnected,
}

fn fnv1a32(data: &str) -> u32 {
    let mut hash: u32 = 0x811c9dc5;
    for byte in data.as_bytes() {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(0x01000193);
    }
    hash
}

/// Per-session polling loop: periodically snapshots the pane, diffs against
/// the previous snapshot, and emits `output-delta` events on change.
pub struct PaneCaptureSession {
    session: String,
    mux: std::sync::Arc<dyn Multiplexer>,
    poll_interval: Duration,
    capture_lines: u32,
    capture_timeout: Duration,
    prev_hash: Option<u32>,
    prev_lines: Vec<String>,
}

impl PaneCaptureSession {
    pub fn new(
        session: impl Into<String>,
        mux: std::sync::Arc<dyn Multiplexer>,
        poll_interval: Duration,
        capture_lines: u32,
        capture_timeout: Duration,
    ) -> Self {
        Self {
            session: session.into(),
            mux,
            poll_interval,
            capture_lines,
            capture_timeout,
            prev_hash: None,
            prev_lines: Vec::new(),
        }
    }

    /// Verify the session exists and capture an initial snapshot. Idempotent.
    pub async fn connect(&mut self) -> Result<(), AppError> {
        if !self.mux.has_session(&self.session).await {
            return Err(AppError::SessionNotFound(self.session.clone()));
        }
        if let Ok(text) = self.mux.capture_pane(&self.session, self.capture_lines).await {
            self.prev_hash = Some(fnv1a32(&text));
            self.prev_lines = text.lines().map(str::to_owned).collect();
        }
        Ok(())
    }

    /// On-demand read of the last `lines` rows. Times out after `capture_timeout`.
    pub async fn capture(&self, lines: u32) -> Result<String, AppError> {
        tokio::time::timeout(self.capture_timeout, self.mux.capture_pane(&self.session, lines))
            .await
            .map_err(|_| AppError::CaptureTimeout(self.capture_timeout))?
    }

    /// Write to the session input.
    pub async fn send_keys(&self, text: &str, press_enter: bool) -> Result<(), AppError> {
        self.mux
            .send_keys(&self.session, text, press_enter)
            .await
            .map_err(|e| AppError::SendFailed(e.to_string()))
    }

    /// Terminate the multiplexer session.
    pub async fn kill(&self) -> Result<(), AppError> {
        self.mux.kill_session(&self.session).await
    }

    /// Run the polling loop until `shutdown` fires or the session disappears.
    /// Emits `CaptureEvent`s to `tx`; returns when polling stops.
    pub async fn run(mut self, tx: mpsc::Sender<CaptureEvent>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(session = %self.session, "capture loop cancelled");
                    return;
                }
                _ = interval.tick() => {
                    match self.poll_once().await {
                        Ok(Some(delta)) => {
                            if tx.send(CaptureEvent::Delta(delta)).await.is_err() {
                                return;
                            }
                        }
                        Ok(None) => {}
                        Err(AppError::CaptureTimeout(_)) => {
                            debug!(session = %self.session, "capture timed out, retrying next tick");
                        }
                        Err(_) => {
                            if !self.mux.has_session(&self.session).await {
                                warn!(session = %self.session, "session gone, disconnecting");
                                let _ = tx.send(CaptureEvent::Disconnected).await;
                                return;
                            }
                            debug!(session = %self.session, "capture error, retrying next tick");
                        }
                    }
                }
            }
        }
    }

    /// Capture once, diff against the previous snapshot, and produce a delta
    /// if the content changed and the diff yields a non-empty suffix.
    async fn poll_once(&mut self) -> Result<Option<OutputDelta>, AppError> {
        let text = self.capture(self.capture_lines).await?;
        let hash = fnv1a32(&text);
        if Some(hash) == self.prev_hash {
            return Ok(None);
        }

        let lines: Vec<String> = text.lines().map(str::to_owned).collect();
        let common = self
            .prev_lines
            .iter()
            .zip(lines.iter())
            .take_while(|(a, b)| a == b)
            .count();
        let suffix: Vec<String> = lines[common..].to_vec();

        self.prev_hash = Some(hash);
        self.prev_lines = lines.clone();

        // Prefix comparison consumed the whole current line count: the
        // change was confined to rows scrolling off the top of the buffer.
        // Suppress the delta (rare, documented edge case).
        if common == lines.len() && !lines.is_empty() {
            return Ok(None);
        }

        let snapshot = PaneSnapshot { text, hash: hash as u64, captured_at: chrono::Utc::now() };
        Ok(Some(OutputDelta { suffix, snapshot }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_for_identical_text() {
        assert_eq!(fnv1a32("hello"), fnv1a32("hello"));
        assert_ne!(fnv1a32("hello"), fnv1a32("world"));
    }
}
