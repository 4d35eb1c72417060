//! Typed filter and update documents for the task store.
//!
//! These are the Rust spelling of the document-store query/`$set`/`$push`
//! dialect: a filter is a conjunction of the populated fields, an update sets
//! the populated fields and appends the pushed entries. Adapters translate
//! them to their native query language; the in-memory store evaluates them
//! directly via `matches` / `apply`.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::domain::{LogEntry, SideEffectRecord, TaskError, TaskId, TaskRecord, TaskStatus};

/// Conjunctive filter over task records. Empty filter matches everything;
/// callers that must not mass-match (e.g. cancel) check `is_empty` first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskFilter {
    pub id: Option<TaskId>,
    pub name: Option<String>,
    pub status: Option<TaskStatus>,

    /// `scheduled_at <= bound`; the due-task half of the claim query.
    pub scheduled_at_lte: Option<DateTime<Utc>>,

    /// `timeout_at <= bound`; the expired-lease half of the sweep query.
    pub timeout_at_lte: Option<DateTime<Utc>>,

    /// Restricts to names this worker has handlers for.
    pub name_in: Option<Vec<String>>,
}

impl TaskFilter {
    pub fn by_id(id: TaskId) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn matches(&self, record: &TaskRecord) -> bool {
        if let Some(id) = self.id {
            if record.id != id {
                return false;
            }
        }
        if let Some(name) = &self.name {
            if &record.name != name {
                return false;
            }
        }
        if let Some(status) = self.status {
            if record.status != status {
                return false;
            }
        }
        if let Some(bound) = self.scheduled_at_lte {
            if record.scheduled_at > bound {
                return false;
            }
        }
        if let Some(bound) = self.timeout_at_lte {
            match record.timeout_at {
                Some(at) if at <= bound => {}
                _ => return false,
            }
        }
        if let Some(names) = &self.name_in {
            if !names.iter().any(|n| n == &record.name) {
                return false;
            }
        }
        true
    }
}

/// Lease stamp evaluated against the matched document: sets
/// `timeout_at = started_at + min(doc.timeout_ms, default_lease_ms)`.
///
/// This is the one update that reads a field of the document it modifies;
/// document-store adapters express it as a pipeline update so the claim
/// stays a single atomic round trip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeaseStamp {
    pub started_at: DateTime<Utc>,
    pub default_lease_ms: u64,
}

impl LeaseStamp {
    pub fn expiry_for(&self, timeout_ms: Option<u64>) -> DateTime<Utc> {
        let ms = timeout_ms
            .unwrap_or(self.default_lease_ms)
            .min(self.default_lease_ms);
        self.started_at + crate::domain::millis(ms)
    }
}

/// Field-set and append operations applied in one atomic conditional update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub started_running_at: Option<DateTime<Utc>>,
    pub finished_running_at: Option<DateTime<Utc>>,
    pub timeout_at: Option<DateTime<Utc>>,
    pub lease: Option<LeaseStamp>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub worker_name: Option<String>,
    pub result: Option<Value>,
    pub error: Option<TaskError>,
    pub next_scheduled_at: Option<DateTime<Utc>>,
    pub push_log: Option<LogEntry>,
    pub push_side_effect: Option<SideEffectRecord>,
}

impl TaskUpdate {
    /// Applies the update in place; the store bumps `updated_at` with its
    /// own clock.
    pub fn apply(&self, record: &mut TaskRecord, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(at) = self.started_running_at {
            record.started_running_at = Some(at);
        }
        if let Some(at) = self.finished_running_at {
            record.finished_running_at = Some(at);
        }
        if let Some(at) = self.timeout_at {
            record.timeout_at = Some(at);
        }
        if let Some(lease) = self.lease {
            record.timeout_at = Some(lease.expiry_for(record.timeout_ms));
        }
        if let Some(at) = self.cancelled_at {
            record.cancelled_at = Some(at);
        }
        if let Some(name) = &self.worker_name {
            record.worker_name = Some(name.clone());
        }
        if let Some(result) = &self.result {
            record.result = Some(result.clone());
        }
        if let Some(error) = &self.error {
            record.error = Some(error.clone());
        }
        if let Some(at) = self.next_scheduled_at {
            record.next_scheduled_at = Some(at);
        }
        if let Some(entry) = &self.push_log {
            record.logs.push(entry.clone());
        }
        if let Some(effect) = &self.push_side_effect {
            record.side_effects.push(effect.clone());
        }
        record.updated_at = now;
    }
}
