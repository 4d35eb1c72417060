//! Task status machine.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a task record.
///
/// Legal transitions:
/// - Pending -> InProgress (claim) -> Succeeded | Failed
/// - InProgress -> TimedOut (sweeper, lease expired)
/// - Pending -> SchedulingTimedOut (execute entry, claim deadline passed)
/// - Pending -> Cancelled
///
/// Everything else is forbidden; terminal statuses never regress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to become due and get claimed.
    Pending,

    /// Claimed by a worker; the lease runs until `timeout_at`.
    InProgress,

    /// Handler returned a value.
    Succeeded,

    /// Handler failed (including per-task timeout).
    Failed,

    /// Cancelled while still pending.
    Cancelled,

    /// Lease expired before the worker persisted a terminal status.
    TimedOut,

    /// Nothing claimed the task before its scheduling deadline.
    SchedulingTimedOut,
}

impl TaskStatus {
    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Pending | TaskStatus::InProgress)
    }

    /// Only pending tasks are eligible for the claim query.
    pub fn is_claimable(self) -> bool {
        matches!(self, TaskStatus::Pending)
    }

    /// Canonical storage representation.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::TimedOut => "timed_out",
            TaskStatus::SchedulingTimedOut => "scheduling_timed_out",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::succeeded(TaskStatus::Succeeded)]
    #[case::failed(TaskStatus::Failed)]
    #[case::cancelled(TaskStatus::Cancelled)]
    #[case::timed_out(TaskStatus::TimedOut)]
    #[case::scheduling_timed_out(TaskStatus::SchedulingTimedOut)]
    fn terminal_statuses(#[case] status: TaskStatus) {
        assert!(status.is_terminal());
        assert!(!status.is_claimable());
    }

    #[test]
    fn pending_is_claimable_and_open() {
        assert!(TaskStatus::Pending.is_claimable());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::InProgress.is_terminal());
        assert!(!TaskStatus::InProgress.is_claimable());
    }

    #[test]
    fn serializes_as_snake_case() {
        let s = serde_json::to_string(&TaskStatus::SchedulingTimedOut).unwrap();
        assert_eq!(s, "\"scheduling_timed_out\"");

        let back: TaskStatus = serde_json::from_str("\"in_progress\"").unwrap();
        assert_eq!(back, TaskStatus::InProgress);
    }
}
