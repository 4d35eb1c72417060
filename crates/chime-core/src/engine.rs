//! Execution engine: runs a claimed task's handler and persists the outcome.
//!
//! Handler failures of every kind (error return, per-task timeout, panic)
//! are captured onto the record; only store errors escape. A terminal
//! transition is never rolled back, even when the follow-up insert fails
//! afterwards, so repeats are at-least-once under adversarial crashes.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinError;

use crate::clock::Clock;
use crate::domain::{TaskError, TaskRecord, TaskStatus};
use crate::error::ChimeError;
use crate::handle::TaskHandle;
use crate::registry::Handler;
use crate::store::{ReturnDocument, TaskFilter, TaskStore, TaskUpdate};

/// Runs one task to a terminal status.
///
/// `handler` is the registry lookup for `task.name`; `None` abandons the
/// claim without mutating the record (a worker should not have claimed an
/// unknown name in the first place). Returns the terminal record, or `None`
/// when nothing was done.
pub(crate) async fn execute_task(
    store: &Arc<dyn TaskStore>,
    handler: Option<Arc<dyn Handler>>,
    task: TaskRecord,
    clock: &Arc<dyn Clock>,
    scheduling_timeout_ms: u64,
) -> Result<Option<TaskRecord>, ChimeError> {
    let now = clock.now();

    // The claim deadline may have passed between scheduling and this call;
    // re-check before dispatching.
    if let Some(deadline) = task.scheduling_timeout_at {
        if now > deadline {
            let timed_out = store
                .update_one_and_return(
                    TaskFilter::by_id(task.id),
                    TaskUpdate {
                        status: Some(TaskStatus::SchedulingTimedOut),
                        finished_running_at: Some(now),
                        ..TaskUpdate::default()
                    },
                    ReturnDocument::After,
                )
                .await?;
            if let Some(record) = &timed_out {
                tracing::info!(task = %record.id, name = %record.name, "task missed its scheduling deadline");
                insert_follow_up(store, record, scheduling_timeout_ms).await?;
            }
            return Ok(timed_out);
        }
    }

    let Some(handler) = handler else {
        return Ok(None);
    };

    let handle = TaskHandle::new(task.clone(), store.clone(), clock.clone());
    let outcome = run_handler(handler, task.params.clone(), handle.clone(), task.timeout_ms).await;

    let now = clock.now();
    let update = match &outcome {
        Ok(result) => TaskUpdate {
            status: Some(TaskStatus::Succeeded),
            result: Some(result.clone()),
            finished_running_at: Some(now),
            next_scheduled_at: handle.next_scheduled_at(),
            ..TaskUpdate::default()
        },
        Err(error) => TaskUpdate {
            status: Some(TaskStatus::Failed),
            error: Some(error.clone()),
            finished_running_at: Some(now),
            next_scheduled_at: handle.next_scheduled_at(),
            ..TaskUpdate::default()
        },
    };

    let finished = store
        .update_one_and_return(TaskFilter::by_id(task.id), update, ReturnDocument::After)
        .await?;

    match &outcome {
        Ok(_) => tracing::debug!(task = %task.id, name = %task.name, "task succeeded"),
        Err(error) => {
            tracing::warn!(task = %task.id, name = %task.name, error = %error.message, "task failed")
        }
    }

    if let Some(record) = &finished {
        insert_follow_up(store, record, scheduling_timeout_ms).await?;
    }
    Ok(finished)
}

/// Enqueues the next occurrence after a terminal transition, if the record
/// calls for one. Handler-set `next_scheduled_at` wins over
/// `repeat_after_ms`.
pub(crate) async fn insert_follow_up(
    store: &Arc<dyn TaskStore>,
    record: &TaskRecord,
    scheduling_timeout_ms: u64,
) -> Result<Option<TaskRecord>, ChimeError> {
    let Some(next_at) = record.next_occurrence_at() else {
        return Ok(None);
    };

    let inserted = store
        .insert(record.follow_up(next_at, scheduling_timeout_ms))
        .await?;
    tracing::info!(
        task = %record.id,
        follow_up = %inserted.id,
        scheduled_at = %inserted.scheduled_at,
        "enqueued follow-up occurrence"
    );
    Ok(Some(inserted))
}

/// Runs the handler, racing it against the per-task deadline when one is
/// set. The loser is asked to cancel; an uncancellable handler is left to
/// the default lease and the failure record stands regardless.
async fn run_handler(
    handler: Arc<dyn Handler>,
    params: Value,
    handle: TaskHandle,
    timeout_ms: Option<u64>,
) -> Result<Value, TaskError> {
    let Some(ms) = timeout_ms else {
        let join = tokio::spawn(async move { handler.run(params, handle).await });
        return flatten(join.await);
    };

    // Zero deadline: already past before the handler could start.
    if ms == 0 {
        return Err(TaskError::new("Task timed out after 0 ms"));
    }

    let mut join = tokio::spawn(async move { handler.run(params, handle).await });
    match tokio::time::timeout(Duration::from_millis(ms), &mut join).await {
        Ok(joined) => flatten(joined),
        Err(_elapsed) => {
            join.abort();
            Err(TaskError::new(format!("Task timed out after {ms} ms")))
        }
    }
}

fn flatten(joined: Result<Result<Value, ChimeError>, JoinError>) -> Result<Value, TaskError> {
    match joined {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(TaskError::new(error.to_string())),
        Err(join_error) if join_error.is_panic() => {
            let payload = join_error.into_panic();
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned());
            Err(TaskError {
                message: "handler panicked".to_string(),
                stack: detail,
            })
        }
        Err(join_error) => Err(TaskError::new(format!("handler aborted: {join_error}"))),
    }
}
