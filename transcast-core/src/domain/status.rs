//! Output lifecycle status
//!
//! Status is never stored. It is derived from what can be observed:
//! whether a command was synthesized, whether resolution failed, and
//! whether a completion record exists and which exit code it holds.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::pipeline::Output;

/// Lifecycle state of an output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStatus {
    /// No command synthesized yet
    Created,
    /// Command launched, no completion record yet
    Running,
    /// Process exited with code 0
    Finished,
    /// Process exited abnormally, or the output never launched
    Error,
}

impl OutputStatus {
    /// Derives the status from observable facts
    pub fn derive(
        command_synthesized: bool,
        has_resolution_errors: bool,
        record: Option<&CompletionRecord>,
    ) -> Self {
        if has_resolution_errors {
            return OutputStatus::Error;
        }
        if !command_synthesized {
            return OutputStatus::Created;
        }
        match record {
            None => OutputStatus::Running,
            Some(record) if record.succeeded() => OutputStatus::Finished,
            Some(_) => OutputStatus::Error,
        }
    }

    /// Derives the status of a persisted output
    pub fn of(output: &Output, record: Option<&CompletionRecord>) -> Self {
        Self::derive(output.command.is_some(), !output.errors.is_empty(), record)
    }
}

impl fmt::Display for OutputStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputStatus::Created => write!(f, "created"),
            OutputStatus::Running => write!(f, "running"),
            OutputStatus::Finished => write!(f, "finished"),
            OutputStatus::Error => write!(f, "error"),
        }
    }
}

/// Durable record written once, when an output's process exits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    /// Process exit code. `None` when the process was killed by a signal or never spawned.
    pub exit_code: Option<i32>,
    /// Whether the exit followed an explicit stop request
    pub cancelled: bool,
    pub finished_at: chrono::DateTime<chrono::Utc>,
}

impl CompletionRecord {
    pub fn new(exit_code: Option<i32>, cancelled: bool) -> Self {
        Self {
            exit_code,
            cancelled,
            finished_at: chrono::Utc::now(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_created_without_command() {
        assert_eq!(OutputStatus::derive(false, false, None), OutputStatus::Created);
    }

    #[test]
    fn test_running_without_record() {
        assert_eq!(OutputStatus::derive(true, false, None), OutputStatus::Running);
    }

    #[test]
    fn test_exit_code_decides_terminal_state() {
        let ok = CompletionRecord::new(Some(0), false);
        let failed = CompletionRecord::new(Some(1), false);
        let killed = CompletionRecord::new(None, true);

        assert_eq!(OutputStatus::derive(true, false, Some(&ok)), OutputStatus::Finished);
        assert_eq!(OutputStatus::derive(true, false, Some(&failed)), OutputStatus::Error);
        assert_eq!(OutputStatus::derive(true, false, Some(&killed)), OutputStatus::Error);
    }

    #[test]
    fn test_cancelled_clean_exit_is_finished() {
        let record = CompletionRecord::new(Some(0), true);
        assert_eq!(OutputStatus::derive(true, false, Some(&record)), OutputStatus::Finished);
    }

    #[test]
    fn test_resolution_errors_win() {
        assert_eq!(OutputStatus::derive(false, true, None), OutputStatus::Error);
        let record = CompletionRecord::new(Some(0), false);
        assert_eq!(OutputStatus::derive(false, true, Some(&record)), OutputStatus::Error);
    }
}
