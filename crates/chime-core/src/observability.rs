//! Status views over the task collection.

use serde::{Deserialize, Serialize};

use crate::domain::TaskStatus;

/// Per-status record totals, for tests and operator dashboards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub timed_out: usize,
    pub scheduling_timed_out: usize,
}

impl StatusCounts {
    pub fn record(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::InProgress => self.in_progress += 1,
            TaskStatus::Succeeded => self.succeeded += 1,
            TaskStatus::Failed => self.failed += 1,
            TaskStatus::Cancelled => self.cancelled += 1,
            TaskStatus::TimedOut => self.timed_out += 1,
            TaskStatus::SchedulingTimedOut => self.scheduling_timed_out += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending
            + self.in_progress
            + self.succeeded
            + self.failed
            + self.cancelled
            + self.timed_out
            + self.scheduling_timed_out
    }
}
