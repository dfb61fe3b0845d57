// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! State Classifier: maps `(snapshot, priorState, idleSeconds) -> SessionState`.
//!
//! Pure, total, deterministic. The glyph vocabulary is a named constant
//! table so classification order and membership are testable in one place.

use std::time::Duration;

use crate::model::SessionState;

/// Contemplation markers: a small set of unicode asterisks that, followed by
/// the literal "Contemplating", indicate the agent is thinking.
pub const CONTEMPLATION_GLYPHS: &[char] = &['✢', '✳', '∗', '✶', '✻'];
pub const CONTEMPLATION_LITERAL: &str = "Contemplating";

/// Read-action glyph: a tool call that only reads files.
pub const READ_ACTION_GLYPH: char = '◆';
pub const READ_ACTION_VERB: &str = "Read";

/// Write/edit-action glyphs: tool calls that mutate files.
pub const WRITE_ACTION_VERB: &str = "Write";
pub const EDIT_ACTION_VERB: &str = "Edit";

/// Shell-action glyph: a bash/shell tool call.
pub const SHELL_ACTION_VERB: &str = "Bash";

/// Completion glyph, paired with the substring "complete".
pub const COMPLETION_GLYPH: char = '✓';
pub const TASK_COMPLETE_LITERAL: &str = "Task complete";

/// Error markers.
pub const ERROR_PREFIX: &str = "Error:";
pub const CROSS_MARK_GLYPH: char = '✗';
pub const ERROR_BRACKET_LITERAL: &str = "[ERROR]";

/// The idle/stuck prompt glyph, expected as the last trimmed line.
pub const PROMPT_GLYPH: char = '❯';

/// Pure classification strategy, kept behind a trait so the glyph-inference
/// engine specified here can coexist with other strategies (e.g. an
/// inline-marker variant) without either one depending on the other.
pub trait Classifier: Send + Sync {
    fn classify(
        &self,
        snapshot_text: &str,
        prior_state: Option<SessionState>,
        idle: Duration,
        stuck_threshold: Duration,
    ) -> SessionState;
}

/// The glyph-inference classifier: ordered first-match over the constant
/// vocabulary table above.
#[derive(Debug, Default, Clone, Copy)]
pub struct GlyphClassifier;

impl Classifier for GlyphClassifier {
    fn classify(
        &self,
        snapshot_text: &str,
        prior_state: Option<SessionState>,
        idle: Duration,
        stuck_threshold: Duration,
    ) -> SessionState {
        let trimmed = snapshot_text.trim_end();

        let has_contemplation = CONTEMPLATION_GLYPHS.iter().any(|g| {
            snapshot_text.contains(*g) && snapshot_text.contains(CONTEMPLATION_LITERAL)
        });
        if has_contemplation {
            return SessionState::Thinking;
        }

        let has_read = snapshot_text.contains(READ_ACTION_GLYPH)
            && snapshot_text.contains(READ_ACTION_VERB);
        let has_write = snapshot_text.contains(WRITE_ACTION_VERB)
            || snapshot_text.contains(EDIT_ACTION_VERB);
        if has_read && !has_write {
            return SessionState::Reading;
        }

        if has_write {
            return SessionState::Working;
        }

        if snapshot_text.contains(SHELL_ACTION_VERB) && snapshot_text.to_lowercase().contains("test") {
            return SessionState::Testing;
        }

        let has_completion = (snapshot_text.contains(COMPLETION_GLYPH)
            && snapshot_text.contains("complete"))
            || snapshot_text.contains(TASK_COMPLETE_LITERAL);
        if has_completion {
            return SessionState::Complete;
        }

        let has_error = snapshot_text.contains(ERROR_PREFIX)
            || snapshot_text.contains(CROSS_MARK_GLYPH)
            || snapshot_text.contains(ERROR_BRACKET_LITERAL);
        if has_error {
            return SessionState::Error;
        }

        let ends_with_prompt = trimmed.ends_with(PROMPT_GLYPH);
        if ends_with_prompt {
            return if idle > stuck_threshold { SessionState::Stuck } else { SessionState::Idle };
        }

        prior_state.unwrap_or(SessionState::Idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_secs(300);

    #[test]
    fn empty_snapshot_retains_prior_state() {
        let c = GlyphClassifier;
        assert_eq!(
            c.classify("", Some(SessionState::Working), Duration::ZERO, T),
            SessionState::Working
        );
        assert_eq!(c.classify("", None, Duration::ZERO, T), SessionState::Idle);
    }

    #[test]
    fn trailing_prompt_below_threshold_is_idle() {
        let c = GlyphClassifier;
        let snap = "some output\n❯ ";
        assert_eq!(
            c.classify(snap, Some(SessionState::Idle), Duration::from_secs(10), T),
            SessionState::Idle
        );
    }

    #[test]
    fn trailing_prompt_above_threshold_is_stuck() {
        let c = GlyphClassifier;
        let snap = "some output\n❯ ";
        assert_eq!(
            c.classify(snap, Some(SessionState::Idle), Duration::from_secs(301), T),
            SessionState::Stuck
        );
    }

    #[test]
    fn contemplation_wins_over_everything_else() {
        let c = GlyphClassifier;
        let snap = "✢ Contemplating... \n❯ ";
        assert_eq!(c.classify(snap, None, Duration::from_secs(301), T), SessionState::Thinking);
    }

    #[test]
    fn read_without_write_is_reading() {
        let c = GlyphClassifier;
        let snap = "◆ Read src/main.rs";
        assert_eq!(c.classify(snap, None, Duration::ZERO, T), SessionState::Reading);
    }

    #[test]
    fn read_and_write_together_is_working() {
        let c = GlyphClassifier;
        let snap = "◆ Read src/main.rs\nWrite src/lib.rs";
        assert_eq!(c.classify(snap, None, Duration::ZERO, T), SessionState::Working);
    }

    #[test]
    fn shell_with_test_substring_is_testing() {
        let c = GlyphClassifier;
        let snap = "Bash: cargo test";
        assert_eq!(c.classify(snap, None, Duration::ZERO, T), SessionState::Testing);
    }

    #[test]
    fn completion_glyph_wins_over_error_literal_order() {
        let c = GlyphClassifier;
        let snap = "✓ complete";
        assert_eq!(c.classify(snap, None, Duration::ZERO, T), SessionState::Complete);
    }

    #[test]
    fn error_literal_detected() {
        let c = GlyphClassifier;
        assert_eq!(c.classify("Error: boom", None, Duration::ZERO, T), SessionState::Error);
        assert_eq!(c.classify("✗ failed", None, Duration::ZERO, T), SessionState::Error);
        assert_eq!(c.classify("[ERROR] boom", None, Duration::ZERO, T), SessionState::Error);
    }
}
