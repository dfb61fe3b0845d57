// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Audit Store: the durable system of record for session state, the
//! interaction log, commands, cached task specs, and delivered alerts.
//! Single-writer SQLite behind a `tokio::sync::Mutex`; schema is
//! `CREATE TABLE IF NOT EXISTS`, no migrations.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

use crate::error::AppError;
use crate::model::{
    Action, Actor, Command, CommandStatus, Event, InteractionLogEntry, Session, SessionKey,
    SessionState,
};

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::StoreError(e.to_string())
    }
}

pub struct AuditStore {
    conn: Mutex<Connection>,
}

impl AuditStore {
    pub fn open(path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::StoreError(e.to_string()))?;
        }
        let conn = Connection::open(path)?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_schema_sync()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, AppError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_schema_sync()?;
        Ok(store)
    }

    fn init_schema_sync(&self) -> Result<(), AppError> {
        let guard = self.conn.try_lock().expect("no concurrent access during init");
        guard.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS session_state (
                session_key TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                progress_percent INTEGER NOT NULL,
                indicators_json TEXT NOT NULL,
                last_activity TEXT NOT NULL,
                last_output_tail TEXT NOT NULL,
                task_spec_json TEXT,
                suppression_until TEXT
            );

            CREATE TABLE IF NOT EXISTS interaction_log (
                id TEXT PRIMARY KEY,
                session_key TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                actor TEXT NOT NULL,
                action TEXT NOT NULL,
                content TEXT NOT NULL,
                metadata_json TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_interaction_session ON interaction_log(session_key, timestamp);

            CREATE TABLE IF NOT EXISTS commands (
                id TEXT PRIMARY KEY,
                session_key TEXT NOT NULL,
                payload TEXT NOT NULL,
                source TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                sent_at TEXT,
                retry_count INTEGER NOT NULL,
                last_error TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_commands_session ON commands(session_key, created_at);

            CREATE TABLE IF NOT EXISTS task_specs (
                session_key TEXT PRIMARY KEY,
                path TEXT NOT NULL,
                total_tasks INTEGER NOT NULL,
                completed_tasks INTEGER NOT NULL,
                items_json TEXT NOT NULL,
                cached_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS alerts_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_key TEXT NOT NULL,
                event_kind TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                delivered_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_alerts_session ON alerts_log(session_key, delivered_at);
            "#,
        )?;
        Ok(())
    }

    pub async fn upsert_session_state(&self, session: &Session) -> Result<(), AppError> {
        let conn = self.conn.lock().await;
        let indicators_json = serde_json::to_string(&session.progress.indicators)?;
        let task_spec_json = session.task_spec.as_ref().map(serde_json::to_string).transpose()?;
        conn.execute(
            r#"
            INSERT INTO session_state
                (session_key, state, progress_percent, indicators_json, last_activity,
                 last_output_tail, task_spec_json, suppression_until)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(session_key) DO UPDATE SET
                state = ?2, progress_percent = ?3, indicators_json = ?4, last_activity = ?5,
                last_output_tail = ?6, task_spec_json = ?7, suppression_until = ?8
            "#,
            params![
                session.key.as_str(),
                session.state.as_str(),
                session.progress.percent,
                indicators_json,
                session.last_activity.to_rfc3339(),
                session.last_output_tail,
                task_spec_json,
                session.suppression_until.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub async fn get_session_state(&self, key: &SessionKey) -> Result<Option<Session>, AppError> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                r#"SELECT state, progress_percent, indicators_json, last_activity,
                          last_output_tail, task_spec_json, suppression_until
                   FROM session_state WHERE session_key = ?1"#,
                params![key.as_str()],
                |row| {
                    let state: String = row.get(0)?;
                    let percent: u8 = row.get(1)?;
                    let indicators_json: String = row.get(2)?;
                    let last_activity: String = row.get(3)?;
                    let last_output_tail: String = row.get(4)?;
                    let task_spec_json: Option<String> = row.get(5)?;
                    let suppression_until: Option<String> = row.get(6)?;
                    Ok((state, percent, indicators_json, last_activity, last_output_tail, task_spec_json, suppression_until))
                },
            )
            .optional()?;

        let Some((state, percent, indicators_json, last_activity, tail, task_spec_json, suppression_until)) = row
        else {
            return Ok(None);
        };

        Ok(Some(Session {
            key: key.clone(),
            state: parse_state(&state),
            progress: crate::model::ProgressSnapshot {
                percent,
                indicators: serde_json::from_str(&indicators_json)?,
            },
            last_activity: chrono::DateTime::parse_from_rfc3339(&last_activity)
                .map_err(|e| AppError::StoreError(e.to_string()))?
                .with_timezone(&chrono::Utc),
            last_output_tail: tail,
            task_spec: task_spec_json.map(|j| serde_json::from_str(&j)).transpose()?,
            suppression_until: suppression_until
                .map(|t| {
                    chrono::DateTime::parse_from_rfc3339(&t)
                        .map(|d| d.with_timezone(&chrono::Utc))
                        .map_err(|e| AppError::StoreError(e.to_string()))
                })
                .transpose()?,
        }))
    }

    pub async fn list_session_states(&self) -> Result<Vec<Session>, AppError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT session_key FROM session_state")?;
        let keys: Vec<String> =
            stmt.query_map([], |row| row.get(0))?.collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);
        let mut sessions = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(s) = self.get_session_state(&SessionKey::new(key)?).await? {
                sessions.push(s);
            }
        }
        Ok(sessions)
    }

    pub async fn insert_interaction(&self, entry: &InteractionLogEntry) -> Result<(), AppError> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO interaction_log (id, session_key, timestamp, actor, action, content, metadata_json)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
            params![
                entry.id,
                entry.session_key.as_str(),
                entry.timestamp.to_rfc3339(),
                actor_str(entry.actor),
                action_str(entry.action),
                entry.content,
                entry.metadata_json.to_string(),
            ],
        )?;
        Ok(())
    }

    pub async fn list_interactions(
        &self,
        key: &SessionKey,
        limit: u32,
    ) -> Result<Vec<InteractionLogEntry>, AppError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"SELECT id, session_key, timestamp, actor, action, content, metadata_json
               FROM interaction_log WHERE session_key = ?1 ORDER BY timestamp DESC LIMIT ?2"#,
        )?;
        let rows = stmt
            .query_map(params![key.as_str(), limit], |row| {
                let id: String = row.get(0)?;
                let session_key: String = row.get(1)?;
                let timestamp: String = row.get(2)?;
                let actor: String = row.get(3)?;
                let action: String = row.get(4)?;
                let content: String = row.get(5)?;
                let metadata_json: String = row.get(6)?;
                Ok((id, session_key, timestamp, actor, action, content, metadata_json))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, session_key, timestamp, actor, action, content, metadata_json)| {
                Ok(InteractionLogEntry {
                    id,
                    session_key: SessionKey::new(session_key)?,
                    timestamp: chrono::DateTime::parse_from_rfc3339(&timestamp)
                        .map_err(|e| AppError::StoreError(e.to_string()))?
                        .with_timezone(&chrono::Utc),
                    actor: parse_actor(&actor),
                    action: parse_action(&action),
                    content,
                    metadata_json: serde_json::from_str(&metadata_json)?,
                })
            })
            .collect()
    }

    pub async fn upsert_command(&self, command: &Command) -> Result<(), AppError> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO commands (id, session_key, payload, source, status, created_at, sent_at, retry_count, last_error)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                status = ?5, sent_at = ?7, retry_count = ?8, last_error = ?9
            "#,
            params![
                command.id,
                command.session_key.as_str(),
                command.payload,
                command.source,
                status_str(command.status),
                command.created_at.to_rfc3339(),
                command.sent_at.map(|t| t.to_rfc3339()),
                command.retry_count,
                command.last_error,
            ],
        )?;
        Ok(())
    }

    pub async fn get_command(&self, id: &str) -> Result<Option<Command>, AppError> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                r#"SELECT id, session_key, payload, source, status, created_at, sent_at, retry_count, last_error
                   FROM commands WHERE id = ?1"#,
                params![id],
                row_to_command,
            )
            .optional()?;
        row.transpose()
    }

    pub async fn list_commands(&self, key: &SessionKey, limit: u32) -> Result<Vec<Command>, AppError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"SELECT id, session_key, payload, source, status, created_at, sent_at, retry_count, last_error
               FROM commands WHERE session_key = ?1 ORDER BY created_at DESC LIMIT ?2"#,
        )?;
        let rows = stmt.query_map(params![key.as_str(), limit], row_to_command)?.collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().collect()
    }

    /// Count commands still awaiting (or mid-) delivery, for `/api/stats`.
    pub async fn count_pending_commands(&self) -> Result<u64, AppError> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM commands WHERE status IN ('pending', 'processing')",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Move any leftover `processing` rows back to `pending`, returning their
    /// ids so the caller can wake workers for them. Called once at startup.
    pub async fn recover_processing_to_pending(&self) -> Result<Vec<String>, AppError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT id FROM commands WHERE status = 'processing'")?;
        let ids: Vec<String> = stmt.query_map([], |row| row.get(0))?.collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        conn.execute("UPDATE commands SET status = 'pending' WHERE status = 'processing'", [])?;
        Ok(ids)
    }

    pub async fn insert_alert_log(&self, event: &Event) -> Result<(), AppError> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO alerts_log (session_key, event_kind, payload_json, delivered_at)
               VALUES (?1, ?2, ?3, ?4)"#,
            params![
                event.session_key.as_str(),
                event.kind.as_str(),
                event.payload.to_string(),
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub async fn list_alerts(&self, key: &SessionKey, limit: u32) -> Result<Vec<Event>, AppError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"SELECT event_kind, payload_json, delivered_at FROM alerts_log
               WHERE session_key = ?1 ORDER BY delivered_at DESC LIMIT ?2"#,
        )?;
        let rows = stmt
            .query_map(params![key.as_str(), limit], |row| {
                let kind: String = row.get(0)?;
                let payload_json: String = row.get(1)?;
                let delivered_at: String = row.get(2)?;
                Ok((kind, payload_json, delivered_at))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(kind, payload_json, delivered_at)| {
                Ok(Event {
                    kind: parse_event_kind(&kind),
                    session_key: key.clone(),
                    payload: serde_json::from_str(&payload_json)?,
                    timestamp: chrono::DateTime::parse_from_rfc3339(&delivered_at)
                        .map_err(|e| AppError::StoreError(e.to_string()))?
                        .with_timezone(&chrono::Utc),
                })
            })
            .collect()
    }
}

fn row_to_command(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<Command, AppError>> {
    let id: String = row.get(0)?;
    let session_key: String = row.get(1)?;
    let payload: String = row.get(2)?;
    let source: String = row.get(3)?;
    let status: String = row.get(4)?;
    let created_at: String = row.get(5)?;
    let sent_at: Option<String> = row.get(6)?;
    let retry_count: u32 = row.get(7)?;
    let last_error: Option<String> = row.get(8)?;

    Ok((|| {
        Ok(Command {
            id,
            session_key: SessionKey::new(session_key)?,
            payload,
            source,
            status: parse_status(&status),
            created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
                .map_err(|e| AppError::StoreError(e.to_string()))?
                .with_timezone(&chrono::Utc),
            sent_at: sent_at
                .map(|t| {
                    chrono::DateTime::parse_from_rfc3339(&t)
                        .map(|d| d.with_timezone(&chrono::Utc))
                        .map_err(|e| AppError::StoreError(e.to_string()))
                })
                .transpose()?,
            retry_count,
            last_error,
        })
    })())
}

fn parse_state(s: &str) -> SessionState {
    match s {
        "reading" => SessionState::Reading,
        "thinking" => SessionState::Thinking,
        "working" => SessionState::Working,
        "testing" => SessionState::Testing,
        "idle" => SessionState::Idle,
        "stuck" => SessionState::Stuck,
        "error" => SessionState::Error,
        "complete" => SessionState::Complete,
        _ => SessionState::Initializing,
    }
}

fn status_str(status: CommandStatus) -> &'static str {
    match status {
        CommandStatus::Pending => "pending",
        CommandStatus::Processing => "processing",
        CommandStatus::Sent => "sent",
        CommandStatus::Failed => "failed",
    }
}

fn parse_status(s: &str) -> CommandStatus {
    match s {
        "processing" => CommandStatus::Processing,
        "sent" => CommandStatus::Sent,
        "failed" => CommandStatus::Failed,
        _ => CommandStatus::Pending,
    }
}

fn actor_str(actor: Actor) -> &'static str {
    match actor {
        Actor::User => "user",
        Actor::System => "system",
        Actor::Zoid => "zoid",
        Actor::Api => "api",
    }
}

fn parse_actor(s: &str) -> Actor {
    match s {
        "system" => Actor::System,
        "zoid" => Actor::Zoid,
        "api" => Actor::Api,
        _ => Actor::User,
    }
}

fn action_str(action: Action) -> &'static str {
    match action {
        Action::Nudge => "nudge",
        Action::SendCommand => "send_command",
        Action::Kill => "kill",
        Action::StateChange => "state_change",
        Action::SuppressAlerts => "suppress_alerts",
        Action::UnsuppressAlerts => "unsuppress_alerts",
    }
}

fn parse_action(s: &str) -> Action {
    match s {
        "send_command" => Action::SendCommand,
        "kill" => Action::Kill,
        "state_change" => Action::StateChange,
        "suppress_alerts" => Action::SuppressAlerts,
        "unsuppress_alerts" => Action::UnsuppressAlerts,
        _ => Action::Nudge,
    }
}

fn parse_event_kind(s: &str) -> crate::model::EventKind {
    use crate::model::EventKind::*;
    match s {
        "progress" => Progress,
        "agent_stuck" => AgentStuck,
        "agent_error" => AgentError,
        "agent_complete" => AgentComplete,
        "command_sent" => CommandSent,
        "command_failed" => CommandFailed,
        "session_killed" => SessionKilled,
        "nudge_requested" => NudgeRequested,
        _ => StateChange,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Session;

    #[tokio::test]
    async fn upsert_then_get_round_trips() {
        let store = AuditStore::open_in_memory().unwrap();
        let key = SessionKey::new("demo-a").unwrap();
        let session = Session::new(key.clone(), chrono::Utc::now());
        store.upsert_session_state(&session).await.unwrap();
        let fetched = store.get_session_state(&key).await.unwrap().unwrap();
        assert_eq!(fetched.key, key);
        assert_eq!(fetched.state, SessionState::Initializing);
    }

    #[tokio::test]
    async fn recover_moves_processing_back_to_pending() {
        let store = AuditStore::open_in_memory().unwrap();
        let key = SessionKey::new("demo-a").unwrap();
        let command = Command {
            id: "job-1".into(),
            session_key: key,
            payload: "continue".into(),
            source: "api".into(),
            status: CommandStatus::Processing,
            created_at: chrono::Utc::now(),
            sent_at: None,
            retry_count: 1,
            last_error: None,
        };
        store.upsert_command(&command).await.unwrap();

        let recovered = store.recover_processing_to_pending().await.unwrap();
        assert_eq!(recovered, vec!["job-1".to_string()]);

        let reloaded = store.get_command("job-1").await.unwrap().unwrap();
        assert_eq!(reloaded.status, CommandStatus::Pending);
    }

    #[tokio::test]
    async fn alert_log_round_trips() {
        let store = AuditStore::open_in_memory().unwrap();
        let key = SessionKey::new("demo-a").unwrap();
        let event = Event::new(
            crate::model::EventKind::AgentStuck,
            key.clone(),
            serde_json::json!({"idleSeconds": 10}),
        );
        store.insert_alert_log(&event).await.unwrap();
        let alerts = store.list_alerts(&key, 10).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].payload["idleSeconds"], 10);
    }
}
