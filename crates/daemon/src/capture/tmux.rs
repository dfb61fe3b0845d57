// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use crate::capture::Multiplexer;
use crate::error::AppError;

/// Invokes `tmux` as an opaque, non-interactive subprocess.
///
/// Every invocation is subject to the caller's own timeout (applied at the
/// [`crate::capture::PaneCaptureSession`] layer via `capture_timeout`, and
/// here for the remaining one-shot calls via `TMUX_CALL_TIMEOUT`).
pub struct TmuxMultiplexer {
    socket: Option<PathBuf>,
}

const TMUX_CALL_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

impl TmuxMultiplexer {
    pub fn new(socket: Option<PathBuf>) -> Self {
        Self { socket }
    }

    fn cmd(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new("tmux");
        if let Some(ref s) = self.socket {
            cmd.arg("-S").arg(s);
        }
        cmd
    }

    async fn run_with_timeout(
        mut cmd: tokio::process::Command,
    ) -> Result<std::process::Output, AppError> {
        tokio::time::timeout(TMUX_CALL_TIMEOUT, cmd.output())
            .await
            .map_err(|_| AppError::CaptureTimeout(TMUX_CALL_TIMEOUT))?
            .map_err(|e| AppError::CaptureFailed(e.to_string()))
    }
}

impl Multiplexer for TmuxMultiplexer {
    fn has_session<'a>(
        &'a self,
        session: &'a str,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move {
            let mut cmd = self.cmd();
            cmd.args(["has-session", "-t", session])
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null());
            matches!(Self::run_with_timeout(cmd).await, Ok(out) if out.status.success())
        })
    }

    fn capture_pane<'a>(
        &'a self,
        session: &'a str,
        lines: u32,
    ) -> Pin<Box<dyn Future<Output = Result<String, AppError>> + Send + 'a>> {
        Box::pin(async move {
            let mut cmd = self.cmd();
            cmd.args(["capture-pane", "-p", "-e", "-t", session, "-S", &format!("-{lines}")]);
            let out = Self::run_with_timeout(cmd).await?;
            if !out.status.success() {
                return Err(AppError::CaptureFailed(format!(
                    "tmux capture-pane exited with {:?}",
                    out.status.code()
                )));
            }
            Ok(String::from_utf8_lossy(&out.stdout).into_owned())
        })
    }

    fn send_keys<'a>(
        &'a self,
        session: &'a str,
        text: &'a str,
        press_enter: bool,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        Box::pin(async move {
            let mut cmd = self.cmd();
            cmd.args(["send-keys", "-l", "-t", session, text])
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null());
            let out = Self::run_with_timeout(cmd).await?;
            if !out.status.success() {
                return Err(AppError::SendFailed("tmux send-keys failed".into()));
            }
            if press_enter {
                let mut enter_cmd = self.cmd();
                enter_cmd
                    .args(["send-keys", "-t", session, "Enter"])
                    .stdout(std::process::Stdio::null())
                    .stderr(std::process::Stdio::null());
                let out = Self::run_with_timeout(enter_cmd).await?;
                if !out.status.success() {
                    return Err(AppError::SendFailed("tmux send-keys (Enter) failed".into()));
                }
            }
            Ok(())
        })
    }

    fn kill_session<'a>(
        &'a self,
        session: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        Box::pin(async move {
            let mut cmd = self.cmd();
            cmd.args(["kill-session", "-t", session])
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null());
            let out = Self::run_with_timeout(cmd).await?;
            if !out.status.success() {
                return Err(AppError::SendFailed("tmux kill-session failed".into()));
            }
            Ok(())
        })
    }

    fn list_sessions(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<(String, i64)>, AppError>> + Send + '_>> {
        Box::pin(async move {
            let mut cmd = self.cmd();
            cmd.args(["list-sessions", "-F", "#{session_name} #{session_activity}"]);
            let out = Self::run_with_timeout(cmd).await?;
            if !out.status.success() {
                // No sessions at all is not an error; tmux exits non-zero
                // with "no server running" in that case.
                return Ok(Vec::new());
            }
            let text = String::from_utf8_lossy(&out.stdout);
            let mut sessions = Vec::new();
            for line in text.lines() {
                if let Some((name, ts)) = line.rsplit_once(' ') {
                    if let Ok(ts) = ts.parse::<i64>() {
                        sessions.push((name.to_owned(), ts));
                    }
                }
            }
            Ok(sessions)
        })
    }
}
