//! Task record: the durable document representing one scheduled occurrence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{millis, TaskId, TaskStatus};

/// Failure captured from a handler run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskError {
    pub message: String,

    /// Only populated when a panic payload carries one; handler `Err`
    /// returns have no stack to capture.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl TaskError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }
}

/// One structured log line appended by handler code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

/// One recorded side effect: what ran, with what, and what came back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SideEffectRecord {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub name: String,
    pub params: Value,
    pub result: Value,
}

/// A task document as persisted in the store.
///
/// Field names serialize in the store's camelCase dialect. The record is the
/// single source of truth for task state; mutation goes through the store's
/// conditional updates, never through shared in-process state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: TaskId,

    /// Handler key; dots namespace nested registrations.
    pub name: String,

    pub params: Value,

    pub status: TaskStatus,

    /// Earliest instant at which the task becomes claimable.
    pub scheduled_at: DateTime<Utc>,

    /// Claim deadline; past it the task is aborted as scheduling-timed-out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduling_timeout_at: Option<DateTime<Utc>>,

    /// Per-invocation execution deadline for the in-process race.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Lease expiry stamped at claim; the sweeper reclaims past it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_running_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_running_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,

    /// Repeat cadence; a successor is enqueued at `scheduled_at + this`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_after_ms: Option<u64>,

    /// Handler-settable override for the next occurrence; wins over
    /// `repeat_after_ms`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_scheduled_at: Option<DateTime<Utc>>,

    /// Remaining retries the sweeper may spend on lease expiry.
    #[serde(default)]
    pub retry_on_timeout_count: u32,

    /// One hop back along the repeat chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_task_id: Option<TaskId>,

    /// Root of the repeat chain; stable across occurrences.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_task_id: Option<TaskId>,

    #[serde(default)]
    pub logs: Vec<LogEntry>,

    #[serde(default)]
    pub side_effects: Vec<SideEffectRecord>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Where the next occurrence goes, if anywhere: a handler-set
    /// `next_scheduled_at` wins, then `repeat_after_ms` counted from this
    /// occurrence's `scheduled_at`.
    pub fn next_occurrence_at(&self) -> Option<DateTime<Utc>> {
        if let Some(at) = self.next_scheduled_at {
            return Some(at);
        }
        self.repeat_after_ms
            .map(|ms| self.scheduled_at + millis(ms))
    }

    /// Builds the follow-up occurrence inserted after a terminal transition.
    ///
    /// Inherits name, params, `repeat_after_ms` and `timeout_ms`; links back
    /// via `previous_task_id` and keeps `original_task_id` stable across the
    /// chain.
    pub fn follow_up(&self, scheduled_at: DateTime<Utc>, scheduling_timeout_ms: u64) -> NewTask {
        NewTask {
            name: self.name.clone(),
            params: self.params.clone(),
            scheduled_at,
            scheduling_timeout_at: Some(scheduled_at + millis(scheduling_timeout_ms)),
            timeout_ms: self.timeout_ms,
            repeat_after_ms: self.repeat_after_ms,
            retry_on_timeout_count: 0,
            previous_task_id: Some(self.id),
            original_task_id: Some(self.original_task_id.unwrap_or(self.id)),
        }
    }

    /// Builds the retry occurrence the sweeper inserts for a timed-out task
    /// that still has retries left.
    ///
    /// Keeps the original `scheduled_at`, decrements the retry budget and
    /// restarts the scheduling-timeout window from `now`. Retries are not
    /// linked into the repeat chain.
    pub fn timeout_retry(&self, now: DateTime<Utc>, scheduling_timeout_ms: u64) -> NewTask {
        NewTask {
            name: self.name.clone(),
            params: self.params.clone(),
            scheduled_at: self.scheduled_at,
            scheduling_timeout_at: Some(now + millis(scheduling_timeout_ms)),
            timeout_ms: self.timeout_ms,
            repeat_after_ms: self.repeat_after_ms,
            retry_on_timeout_count: self.retry_on_timeout_count.saturating_sub(1),
            previous_task_id: None,
            original_task_id: None,
        }
    }
}

/// Insert payload: everything the caller decides about a new pending task.
///
/// The store supplies `id`, `created_at` and `updated_at`; status is always
/// `Pending` on insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub name: String,
    pub params: Value,
    pub scheduled_at: DateTime<Utc>,
    pub scheduling_timeout_at: Option<DateTime<Utc>>,
    pub timeout_ms: Option<u64>,
    pub repeat_after_ms: Option<u64>,
    pub retry_on_timeout_count: u32,
    pub previous_task_id: Option<TaskId>,
    pub original_task_id: Option<TaskId>,
}

impl NewTask {
    pub fn new(name: impl Into<String>, scheduled_at: DateTime<Utc>, params: Value) -> Self {
        Self {
            name: name.into(),
            params,
            scheduled_at,
            scheduling_timeout_at: None,
            timeout_ms: None,
            repeat_after_ms: None,
            retry_on_timeout_count: 0,
            previous_task_id: None,
            original_task_id: None,
        }
    }
}
