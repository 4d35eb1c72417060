//! Timeout sweeper: reclaims tasks whose lease expired.
//!
//! Each pass is a drain loop of atomic conditional updates, so any number of
//! workers can sweep concurrently; a record transitions at most once because
//! the filter requires `in_progress`.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::TaskStatus;
use crate::engine;
use crate::error::ChimeError;
use crate::store::{ReturnDocument, TaskFilter, TaskStore, TaskUpdate};

/// Moves every in-progress task with `timeout_at <= now` to `TimedOut`,
/// inserting a retry when the task has timeout retries left, otherwise
/// running the usual follow-up logic.
pub(crate) async fn expire_timed_out_tasks(
    store: &Arc<dyn TaskStore>,
    now: DateTime<Utc>,
    scheduling_timeout_ms: u64,
) -> Result<(), ChimeError> {
    loop {
        let swept = store
            .update_one_and_return(
                TaskFilter {
                    status: Some(TaskStatus::InProgress),
                    timeout_at_lte: Some(now),
                    ..TaskFilter::default()
                },
                TaskUpdate {
                    status: Some(TaskStatus::TimedOut),
                    finished_running_at: Some(now),
                    ..TaskUpdate::default()
                },
                ReturnDocument::After,
            )
            .await?;

        let Some(task) = swept else {
            return Ok(());
        };

        tracing::warn!(task = %task.id, name = %task.name, "lease expired; task timed out");

        if task.retry_on_timeout_count > 0 {
            let retry = store
                .insert(task.timeout_retry(now, scheduling_timeout_ms))
                .await?;
            tracing::info!(
                task = %task.id,
                retry = %retry.id,
                remaining = retry.retry_on_timeout_count,
                "enqueued timeout retry"
            );
        } else {
            engine::insert_follow_up(store, &task, scheduling_timeout_ms).await?;
        }
    }
}
