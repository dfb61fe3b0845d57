// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::Parser;

/// Real-time supervision service for interactive agent processes.
#[derive(Debug, Clone, Parser)]
#[command(name = "paneward", version, about)]
pub struct Config {
    /// HTTP port to listen on.
    #[arg(long, env = "PANEWARD_PORT", default_value = "7700")]
    pub port: u16,

    /// Host address to bind to.
    #[arg(long, env = "PANEWARD_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Bearer token for API authentication. Auth is disabled if unset.
    #[arg(long, env = "PANEWARD_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Session names to monitor (repeatable). Ignored if --auto-detect is set.
    #[arg(long = "session", env = "PANEWARD_SESSIONS", value_delimiter = ',')]
    pub sessions_to_monitor: Vec<String>,

    /// Auto-detect sessions from the multiplexer's session list instead of a
    /// fixed --session list.
    #[arg(long, env = "PANEWARD_AUTO_DETECT", default_value = "false")]
    pub auto_detect: bool,

    /// tmux socket path, for isolated/test servers. Default socket if unset.
    #[arg(long, env = "PANEWARD_TMUX_SOCKET")]
    pub tmux_socket: Option<PathBuf>,

    /// Capture poll interval in seconds.
    #[arg(long, env = "PANEWARD_POLL_INTERVAL", default_value = "2")]
    pub poll_interval_secs: u64,

    /// Stuck-check timer period in seconds.
    #[arg(long, env = "PANEWARD_STUCK_CHECK_INTERVAL", default_value = "30")]
    pub stuck_check_interval_secs: u64,

    /// Idle duration before a session is marked Stuck, in seconds. ♻ reloadable.
    #[arg(long, env = "PANEWARD_STUCK_THRESHOLD", default_value = "300")]
    pub stuck_threshold_secs: u64,

    /// Lines of pane buffer to capture per snapshot.
    #[arg(long, env = "PANEWARD_CAPTURE_LINES", default_value = "200")]
    pub capture_lines: u32,

    /// Per-call capture timeout in seconds.
    #[arg(long, env = "PANEWARD_CAPTURE_TIMEOUT", default_value = "5")]
    pub capture_timeout_secs: u64,

    /// Command Queue worker pool size.
    #[arg(long, env = "PANEWARD_COMMAND_CONCURRENCY", default_value = "5")]
    pub command_concurrency: usize,

    /// Command Queue global rate cap, jobs per second.
    #[arg(long, env = "PANEWARD_COMMAND_RATE", default_value = "10")]
    pub command_rate_per_sec: u32,

    /// Maximum delivery attempts before a command is marked failed.
    #[arg(long, env = "PANEWARD_COMMAND_MAX_ATTEMPTS", default_value = "3")]
    pub command_max_attempts: u32,

    /// Base backoff delay in seconds for command retries.
    #[arg(long, env = "PANEWARD_COMMAND_BACKOFF_BASE", default_value = "2")]
    pub command_backoff_base_secs: u64,

    /// Backoff multiplier for command retries.
    #[arg(long, env = "PANEWARD_COMMAND_BACKOFF_MULTIPLIER", default_value = "2")]
    pub command_backoff_multiplier: u32,

    /// Alert Gate policy. ♻ reloadable.
    #[arg(long, env = "PANEWARD_ALERT_POLICY", default_value = "rate-limit")]
    pub alert_policy: AlertPolicyKind,

    /// rate-limit policy window in seconds. ♻ reloadable.
    #[arg(long, env = "PANEWARD_RATE_LIMIT_WINDOW", default_value = "300")]
    pub rate_limit_window_secs: u64,

    /// batch policy flush window in seconds.
    #[arg(long, env = "PANEWARD_BATCH_WINDOW", default_value = "30")]
    pub batch_window_secs: u64,

    /// exponential-backoff policy base delay in seconds.
    #[arg(long, env = "PANEWARD_BACKOFF_BASE", default_value = "60")]
    pub backoff_base_secs: u64,

    /// exponential-backoff policy cap in seconds.
    #[arg(long, env = "PANEWARD_BACKOFF_CAP", default_value = "3600")]
    pub backoff_cap_secs: u64,

    /// exponential-backoff policy multiplier.
    #[arg(long, env = "PANEWARD_BACKOFF_MULTIPLIER", default_value = "2")]
    pub backoff_multiplier: u32,

    /// Notifier delivery mode. ♻ reloadable.
    #[arg(long, env = "PANEWARD_NOTIFIER_DELIVERY_MODE", default_value = "system")]
    pub notifier_delivery_mode: NotifierDeliveryMode,

    /// Path to the notifier binary invoked for outbound alerts.
    #[arg(long, env = "PANEWARD_NOTIFIER_BIN")]
    pub notifier_bin: Option<PathBuf>,

    /// Task-spec cache TTL in seconds.
    #[arg(long, env = "PANEWARD_TASKSPEC_TTL", default_value = "30")]
    pub task_spec_ttl_secs: u64,

    /// Candidate task-spec filenames, tried in order.
    #[arg(
        long = "taskspec-filename",
        env = "PANEWARD_TASKSPEC_FILENAMES",
        value_delimiter = ',',
        default_value = "TASKS.md,TODO.md,PLAN.md,README.md"
    )]
    pub task_spec_filenames: Vec<String>,

    /// Candidate task-spec root directories, tried in order.
    #[arg(long = "taskspec-root", env = "PANEWARD_TASKSPEC_ROOTS", value_delimiter = ',')]
    pub task_spec_root_candidates: Vec<PathBuf>,

    /// Output-mode estimated action count used to compute percent when no
    /// task spec is available.
    #[arg(long, env = "PANEWARD_OUTPUT_MODE_ESTIMATE", default_value = "10")]
    pub output_mode_estimate: u32,

    /// Directory holding the audit database, event log, and command store.
    #[arg(long, env = "PANEWARD_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Log format (json or text).
    #[arg(long, env = "PANEWARD_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "PANEWARD_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Alert Gate policy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AlertPolicyKind {
    None,
    Batch,
    #[value(name = "rate-limit")]
    #[serde(rename = "rateLimit")]
    RateLimit,
    #[value(name = "exponential-backoff")]
    #[serde(rename = "exponentialBackoff")]
    ExponentialBackoff,
}

/// Notifier invocation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifierDeliveryMode {
    System,
    Direct,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.auto_detect && self.sessions_to_monitor.is_empty() {
            anyhow::bail!("either --session (one or more) or --auto-detect must be specified");
        }
        if self.command_concurrency == 0 {
            anyhow::bail!("--command-concurrency must be at least 1");
        }
        if self.task_spec_filenames.is_empty() {
            anyhow::bail!("--taskspec-filename must name at least one candidate");
        }
        Ok(())
    }

    /// The subset of fields the reload endpoint is allowed to change at runtime.
    pub fn reloadable(&self) -> ReloadableConfig {
        ReloadableConfig {
            stuck_threshold_secs: self.stuck_threshold_secs,
            alert_policy: self.alert_policy,
            rate_limit_window_secs: self.rate_limit_window_secs,
            notifier_delivery_mode: self.notifier_delivery_mode,
        }
    }
}

/// Runtime-reloadable configuration knobs, swapped behind a `RwLock` when
/// `SIGHUP` or `POST /api/config/reload` fires.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct ReloadableConfig {
    pub stuck_threshold_secs: u64,
    pub alert_policy: AlertPolicyKind,
    pub rate_limit_window_secs: u64,
    pub notifier_delivery_mode: NotifierDeliveryMode,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn requires_session_or_auto_detect() {
        let cfg = Config::parse_from(["paneward"]);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn auto_detect_satisfies_session_requirement() {
        let cfg = Config::parse_from(["paneward", "--auto-detect"]);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn explicit_sessions_satisfy_requirement() {
        let cfg = Config::parse_from(["paneward", "--session", "demo-a"]);
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.sessions_to_monitor, vec!["demo-a".to_string()]);
    }
}
