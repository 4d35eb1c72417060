//! Task handle: the narrow surface a handler gets to its own record.
//!
//! Reads come from the snapshot taken at claim time. Log lines and side
//! effects persist immediately as appends; the next-occurrence override is
//! held in process and written with the terminal transition.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;

use crate::clock::Clock;
use crate::domain::{LogEntry, SideEffectRecord, TaskId, TaskRecord};
use crate::error::ChimeError;
use crate::store::{ReturnDocument, TaskFilter, TaskStore, TaskUpdate};

#[derive(Clone)]
pub struct TaskHandle {
    record: Arc<TaskRecord>,
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    next_scheduled_at: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl TaskHandle {
    pub(crate) fn new(
        record: TaskRecord,
        store: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            record: Arc::new(record),
            store,
            clock,
            next_scheduled_at: Arc::new(Mutex::new(None)),
        }
    }

    pub fn id(&self) -> TaskId {
        self.record.id
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn params(&self) -> &Value {
        &self.record.params
    }

    pub fn scheduled_at(&self) -> DateTime<Utc> {
        self.record.scheduled_at
    }

    /// The record as it looked when this occurrence was claimed.
    pub fn record(&self) -> &TaskRecord {
        &self.record
    }

    /// Overrides where the next occurrence is scheduled. Wins over
    /// `repeat_after_ms` at follow-up time.
    pub fn set_next_scheduled_at(&self, at: DateTime<Utc>) {
        *self.next_scheduled_at.lock() = Some(at);
    }

    pub(crate) fn next_scheduled_at(&self) -> Option<DateTime<Utc>> {
        *self.next_scheduled_at.lock()
    }

    /// Appends a structured log line to the record.
    pub async fn log(
        &self,
        message: impl Into<String>,
        extra: Option<Value>,
    ) -> Result<(), ChimeError> {
        let entry = LogEntry {
            timestamp: self.clock.now(),
            message: message.into(),
            extra,
        };
        self.store
            .update_one_and_return(
                TaskFilter::by_id(self.record.id),
                TaskUpdate {
                    push_log: Some(entry),
                    ..TaskUpdate::default()
                },
                ReturnDocument::After,
            )
            .await?;
        Ok(())
    }

    /// Runs `f` and records it as a side effect with start/end instants and
    /// the produced value. Failures propagate unrecorded.
    pub async fn side_effect<F, Fut>(
        &self,
        name: &str,
        params: Value,
        f: F,
    ) -> Result<Value, ChimeError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, ChimeError>> + Send,
    {
        let start = self.clock.now();
        let result = f().await?;
        let effect = SideEffectRecord {
            start,
            end: self.clock.now(),
            name: name.to_string(),
            params,
            result: result.clone(),
        };
        self.store
            .update_one_and_return(
                TaskFilter::by_id(self.record.id),
                TaskUpdate {
                    push_side_effect: Some(effect),
                    ..TaskUpdate::default()
                },
                ReturnDocument::After,
            )
            .await?;
        Ok(result)
    }
}
