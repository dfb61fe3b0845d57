// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Progress Parser: computes a [`ProgressSnapshot`] from pane text and an
//! optional, TTL-cached checkbox task-spec file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tokio::sync::RwLock;

use crate::model::{
    ProgressIndicators, ProgressSnapshot, ProgressSource, SessionKey, TaskItem, TaskSpec,
};

/// Ordered `(root, filename)` lookup table; the first existing, non-empty
/// file wins, mirroring the classifier's own first-match discipline.
#[derive(Debug, Clone)]
pub struct TaskSpecLookupPolicy {
    pub root_candidates: Vec<PathBuf>,
    pub filenames: Vec<String>,
}

impl TaskSpecLookupPolicy {
    /// Resolve the first existing, non-empty candidate path.
    pub fn resolve(&self, session_name: &str) -> Option<PathBuf> {
        let mut roots = self.root_candidates.clone();
        if roots.is_empty() {
            roots.push(PathBuf::from("."));
            roots.push(PathBuf::from(session_name));
        }
        for root in &roots {
            for filename in &self.filenames {
                let candidate = root.join(filename);
                if let Ok(meta) = std::fs::metadata(&candidate) {
                    if meta.is_file() && meta.len() > 0 {
                        return Some(candidate);
                    }
                }
            }
        }
        None
    }
}

fn thinking_time_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\((\d+)s\)").expect("static pattern"))
}

/// Count the occurrences of each action marker and sum thinking-time spans.
pub fn extract_indicators(snapshot_text: &str) -> ProgressIndicators {
    let files_read = snapshot_text.matches("Read ").count() as u32;
    let files_written = snapshot_text.matches("Write ").count() as u32;
    let files_edited = snapshot_text.matches("Edit ").count() as u32;
    let bash_commands = snapshot_text.matches("Bash:").count() as u32;
    let contemplations = snapshot_text.matches("Contemplating").count() as u32;
    let error_count = snapshot_text.matches("Error:").count() as u32;

    let thinking_time_seconds: u64 = thinking_time_regex()
        .captures_iter(snapshot_text)
        .filter_map(|c| c.get(1)?.as_str().parse::<u64>().ok())
        .sum();

    ProgressIndicators {
        files_read,
        files_written,
        files_edited,
        bash_commands,
        contemplations,
        thinking_time_seconds,
        error_count,
        source: ProgressSource::Output,
        task_spec_path: None,
        task_spec_total: None,
        task_spec_completed: None,
    }
}

/// Parse markdown checkbox lines (`- [ ] text` / `- [x] text`, case-insensitive).
pub fn parse_checkboxes(text: &str) -> Vec<TaskItem> {
    let mut items = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim_start();
        let Some(rest) = trimmed.strip_prefix('-').map(str::trim_start) else {
            continue;
        };
        let Some(rest) = rest.strip_prefix('[') else {
            continue;
        };
        let Some((marker, rest)) = rest.split_once(']') else {
            continue;
        };
        let done = matches!(marker.trim().to_lowercase().as_str(), "x");
        if marker.trim().is_empty() || done {
            items.push(TaskItem { text: rest.trim().to_owned(), done });
        }
    }
    items
}

/// TTL-cached, lazily-loaded checkbox task spec plus output-mode fallback,
/// producing the `ProgressSnapshot` a Session Supervisor publishes.
pub struct ProgressParser {
    policy: TaskSpecLookupPolicy,
    ttl: Duration,
    output_mode_estimate: u32,
    session_estimate_overrides: HashMap<String, u32>,
    cache: RwLock<HashMap<SessionKey, TaskSpec>>,
}

impl ProgressParser {
    pub fn new(policy: TaskSpecLookupPolicy, ttl: Duration, output_mode_estimate: u32) -> Self {
        Self {
            policy,
            ttl,
            output_mode_estimate,
            session_estimate_overrides: HashMap::new(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Configurable session-name substring -> estimate table, nudging the
    /// output-mode heuristic for known project shapes.
    pub fn with_session_estimate_overrides(mut self, overrides: HashMap<String, u32>) -> Self {
        self.session_estimate_overrides = overrides;
        self
    }

    fn estimate_for(&self, session_name: &str) -> u32 {
        for (substr, estimate) in &self.session_estimate_overrides {
            if session_name.contains(substr.as_str()) {
                return *estimate;
            }
        }
        self.output_mode_estimate
    }

    /// Compute a progress snapshot. Prefers task-spec mode; falls back to
    /// output-mode when no spec is found or its total is zero.
    pub async fn compute(&self, key: &SessionKey, snapshot_text: &str) -> ProgressSnapshot {
        let mut indicators = extract_indicators(snapshot_text);

        if let Some(spec) = self.load_or_refresh(key).await {
            if spec.total_tasks > 0 {
                let percent = ((spec.completed_tasks as f64 / spec.total_tasks as f64) * 100.0)
                    .round()
                    .clamp(0.0, 100.0) as u8;
                indicators.source = ProgressSource::Taskspec;
                indicators.task_spec_path = Some(spec.path.clone());
                indicators.task_spec_total = Some(spec.total_tasks);
                indicators.task_spec_completed = Some(spec.completed_tasks);
                return ProgressSnapshot { percent, indicators };
            }
        }

        let completed = indicators.files_written + indicators.files_edited + indicators.bash_commands;
        let estimate = self.estimate_for(key.as_str()).max(1);
        let percent = ((completed as f64 / estimate as f64) * 100.0).round().min(100.0) as u8;
        ProgressSnapshot { percent, indicators }
    }

    async fn load_or_refresh(&self, key: &SessionKey) -> Option<TaskSpec> {
        {
            let cache = self.cache.read().await;
            if let Some(spec) = cache.get(key) {
                let age = chrono::Utc::now().signed_duration_since(spec.cached_at);
                if age.to_std().map(|d| d < self.ttl).unwrap_or(false) {
                    return Some(spec.clone());
                }
            }
        }

        let path = self.policy.resolve(key.as_str())?;
        let spec = Self::parse_file(&path)?;
        self.cache.write().await.insert(key.clone(), spec.clone());
        Some(spec)
    }

    fn parse_file(path: &Path) -> Option<TaskSpec> {
        let text = std::fs::read_to_string(path).ok()?;
        let items = parse_checkboxes(&text);
        let total_tasks = items.len() as u32;
        let completed_tasks = items.iter().filter(|i| i.done).count() as u32;
        Some(TaskSpec {
            path: path.to_string_lossy().into_owned(),
            total_tasks,
            completed_tasks,
            items,
            cached_at: chrono::Utc::now(),
        })
    }
}

pub type SharedProgressParser = Arc<ProgressParser>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkbox_parsing_is_case_insensitive() {
        let text = "- [ ] todo one\n- [X] done one\n- [x] done two\nnot a checkbox";
        let items = parse_checkboxes(text);
        assert_eq!(items.len(), 3);
        assert_eq!(items.iter().filter(|i| i.done).count(), 2);
    }

    #[test]
    fn thinking_time_spans_are_summed() {
        let ind = extract_indicators("thought for (12s) then (8s) more");
        assert_eq!(ind.thinking_time_seconds, 20);
    }

    #[tokio::test]
    async fn zero_total_falls_back_to_output_mode() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spec_path = dir.path().join("TASKS.md");
        std::fs::write(&spec_path, "no checkboxes here").expect("write");
        let policy = TaskSpecLookupPolicy {
            root_candidates: vec![dir.path().to_path_buf()],
            filenames: vec!["TASKS.md".to_string()],
        };
        let parser = ProgressParser::new(policy, Duration::from_secs(30), 10);
        let key = SessionKey::new("demo").expect("key");
        let snap = parser.compute(&key, "Write src/lib.rs").await;
        assert_eq!(snap.indicators.source, ProgressSource::Output);
    }

    #[tokio::test]
    async fn task_spec_mode_computes_percent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spec_path = dir.path().join("TASKS.md");
        std::fs::write(&spec_path, "- [x] a\n- [x] b\n- [ ] c\n- [ ] d\n").expect("write");
        let policy = TaskSpecLookupPolicy {
            root_candidates: vec![dir.path().to_path_buf()],
            filenames: vec!["TASKS.md".to_string()],
        };
        let parser = ProgressParser::new(policy, Duration::from_secs(30), 10);
        let key = SessionKey::new("demo").expect("key");
        let snap = parser.compute(&key, "").await;
        assert_eq!(snap.percent, 50);
        assert_eq!(snap.indicators.task_spec_total, Some(4));
    }
}
