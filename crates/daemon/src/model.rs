// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Core data model shared across the supervision engine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Names a multiplexer session. Stable for the lifetime of the session and
/// used as the primary key everywhere a session is referenced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    /// Build a `SessionKey`, rejecting empty names.
    pub fn new(name: impl Into<String>) -> Result<Self, crate::error::AppError> {
        let name = name.into();
        if name.is_empty() {
            return Err(crate::error::AppError::InvalidRequest("session key cannot be empty".into()));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The last N lines of a pane's visible buffer, captured atomically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaneSnapshot {
    pub text: String,
    pub hash: u64,
    pub captured_at: chrono::DateTime<chrono::Utc>,
}

impl PaneSnapshot {
    pub fn lines(&self) -> Vec<&str> {
        self.text.lines().collect()
    }
}

/// Closed nine-element set of semantic agent states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Initializing,
    Reading,
    Thinking,
    Working,
    Testing,
    Idle,
    Stuck,
    Error,
    Complete,
}

impl SessionState {
    pub fn is_sticky(self) -> bool {
        matches!(self, Self::Stuck | Self::Complete)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Reading => "reading",
            Self::Thinking => "thinking",
            Self::Working => "working",
            Self::Testing => "testing",
            Self::Idle => "idle",
            Self::Stuck => "stuck",
            Self::Error => "error",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a progress sample's percent came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProgressSource {
    Taskspec,
    #[default]
    Output,
}

/// Action counters extracted from a pane snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressIndicators {
    pub files_read: u32,
    pub files_written: u32,
    pub files_edited: u32,
    pub bash_commands: u32,
    pub contemplations: u32,
    pub thinking_time_seconds: u64,
    pub error_count: u32,
    pub source: ProgressSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_spec_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_spec_total: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_spec_completed: Option<u32>,
}

/// Task-completion progress, `percent` monotonically non-decreasing within a
/// single task-spec run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub percent: u8,
    pub indicators: ProgressIndicators,
}

/// One checkbox item parsed from a task-spec file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskItem {
    pub text: String,
    pub done: bool,
}

/// A parsed, TTL-cached checkbox task list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub path: String,
    pub total_tasks: u32,
    pub completed_tasks: u32,
    pub items: Vec<TaskItem>,
    pub cached_at: chrono::DateTime<chrono::Utc>,
}

/// The supervised aggregate. Exclusively mutated by its Session Supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub key: SessionKey,
    pub state: SessionState,
    pub progress: ProgressSnapshot,
    pub last_activity: chrono::DateTime<chrono::Utc>,
    pub last_output_tail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_spec: Option<TaskSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suppression_until: Option<chrono::DateTime<chrono::Utc>>,
}

impl Session {
    pub fn new(key: SessionKey, now: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            key,
            state: SessionState::Initializing,
            progress: ProgressSnapshot::default(),
            last_activity: now,
            last_output_tail: String::new(),
            task_spec: None,
            suppression_until: None,
        }
    }
}

/// Who performed an action recorded in the interaction log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    User,
    System,
    Zoid,
    Api,
}

/// What action an interaction-log entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Nudge,
    SendCommand,
    Kill,
    StateChange,
    SuppressAlerts,
    UnsuppressAlerts,
}

/// An append-only interaction log row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionLogEntry {
    pub id: String,
    pub session_key: SessionKey,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub actor: Actor,
    pub action: Action,
    pub content: String,
    pub metadata_json: serde_json::Value,
}

/// Lifecycle status of a queued command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Processing,
    Sent,
    Failed,
}

/// One row in the durable command queue / audit table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: String,
    pub session_key: SessionKey,
    pub payload: String,
    pub source: String,
    pub status: CommandStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<chrono::DateTime<chrono::Utc>>,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Tagged kinds of events flowing through the Event Bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    StateChange,
    Progress,
    AgentStuck,
    AgentError,
    AgentComplete,
    CommandSent,
    CommandFailed,
    SessionKilled,
    NudgeRequested,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StateChange => "state_change",
            Self::Progress => "progress",
            Self::AgentStuck => "agent_stuck",
            Self::AgentError => "agent_error",
            Self::AgentComplete => "agent_complete",
            Self::CommandSent => "command_sent",
            Self::CommandFailed => "command_failed",
            Self::SessionKilled => "session_killed",
            Self::NudgeRequested => "nudge_requested",
        }
    }
}

/// An immutable event value, published once and passed downstream by value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub session_key: SessionKey,
    pub payload: serde_json::Value,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl Event {
    pub fn new(kind: EventKind, session_key: SessionKey, payload: serde_json::Value) -> Self {
        Self { kind, session_key, payload, timestamp: chrono::Utc::now() }
    }
}

/// Alert Gate bookkeeping for one `(sessionKey, eventKind)` pair.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertRecord {
    pub session_key: String,
    pub event_kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_alerted_at: Option<chrono::DateTime<chrono::Utc>>,
    pub alert_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suppression_until: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_deadline: Option<chrono::DateTime<chrono::Utc>>,
}
