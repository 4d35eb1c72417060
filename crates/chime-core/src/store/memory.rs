//! In-memory task store.
//!
//! Reference adapter for tests and embedded use. Records live in insertion
//! order inside one `tokio::sync::Mutex`, which stands in for the document
//! store's per-document atomicity: a conditional update is find-first-match
//! plus mutate under a single lock acquisition. Insertion order plays the
//! role of `_id` order for tie-breaking.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use ulid::Ulid;

use super::{ReturnDocument, TaskFilter, TaskStore, TaskUpdate};
use crate::clock::{Clock, SystemClock};
use crate::domain::{NewTask, TaskId, TaskRecord, TaskStatus};
use crate::error::ChimeError;
use crate::observability::StatusCounts;

pub struct InMemoryTaskStore {
    records: Mutex<Vec<TaskRecord>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Store-maintained stamps (`id`, `created_at`, `updated_at`) come from
    /// this clock; operation-level `now` values are passed in by callers.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            clock,
        }
    }

    fn mint_id(&self, now: DateTime<Utc>) -> TaskId {
        let ulid = Ulid::from_parts(now.timestamp_millis() as u64, rand::random());
        TaskId::from_ulid(ulid)
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: NewTask) -> Result<TaskRecord, ChimeError> {
        let now = self.clock.now();
        let record = TaskRecord {
            id: self.mint_id(now),
            name: task.name,
            params: task.params,
            status: TaskStatus::Pending,
            scheduled_at: task.scheduled_at,
            scheduling_timeout_at: task.scheduling_timeout_at,
            timeout_ms: task.timeout_ms,
            timeout_at: None,
            started_running_at: None,
            finished_running_at: None,
            cancelled_at: None,
            worker_name: None,
            result: None,
            error: None,
            repeat_after_ms: task.repeat_after_ms,
            next_scheduled_at: None,
            retry_on_timeout_count: task.retry_on_timeout_count,
            previous_task_id: task.previous_task_id,
            original_task_id: task.original_task_id,
            logs: Vec::new(),
            side_effects: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        let mut records = self.records.lock().await;
        records.push(record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, id: TaskId) -> Result<Option<TaskRecord>, ChimeError> {
        let records = self.records.lock().await;
        Ok(records.iter().find(|r| r.id == id).cloned())
    }

    async fn find_one(&self, filter: TaskFilter) -> Result<Option<TaskRecord>, ChimeError> {
        let records = self.records.lock().await;
        Ok(records.iter().find(|r| filter.matches(r)).cloned())
    }

    async fn update_one_and_return(
        &self,
        filter: TaskFilter,
        update: TaskUpdate,
        ret: ReturnDocument,
    ) -> Result<Option<TaskRecord>, ChimeError> {
        let mut records = self.records.lock().await;
        let Some(record) = records.iter_mut().find(|r| filter.matches(r)) else {
            return Ok(None);
        };

        let before = record.clone();
        update.apply(record, self.clock.now());

        Ok(Some(match ret {
            ReturnDocument::Before => before,
            ReturnDocument::After => record.clone(),
        }))
    }

    async fn delete_many(&self, filter: TaskFilter) -> Result<u64, ChimeError> {
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|r| !filter.matches(r));
        Ok((before - records.len()) as u64)
    }

    async fn count_by_status(&self) -> Result<StatusCounts, ChimeError> {
        let records = self.records.lock().await;
        let mut counts = StatusCounts::default();
        for record in records.iter() {
            counts.record(record.status);
        }
        Ok(counts)
    }
}
