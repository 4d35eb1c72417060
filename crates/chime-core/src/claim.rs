//! Claim protocol: the atomic pending-to-in-progress transition.
//!
//! One claim attempt is one conditional update. The store's atomicity is the
//! whole concurrency story: with N workers racing, exactly one sees the
//! pending pre-image for a given record.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::{TaskRecord, TaskStatus};
use crate::error::ChimeError;
use crate::store::{LeaseStamp, ReturnDocument, TaskFilter, TaskStore, TaskUpdate};

/// Attempts to claim one due pending task whose name is locally handled.
///
/// Returns the claimed record (lease fields stamped) or `None` when nothing
/// is due. The lease runs to `now + min(timeout_ms, lease_ms)`.
pub(crate) async fn claim_one(
    store: &Arc<dyn TaskStore>,
    names: &[String],
    now: DateTime<Utc>,
    worker_name: Option<&str>,
    lease_ms: u64,
) -> Result<Option<TaskRecord>, ChimeError> {
    if names.is_empty() {
        return Ok(None);
    }

    let filter = TaskFilter {
        status: Some(TaskStatus::Pending),
        scheduled_at_lte: Some(now),
        name_in: Some(names.to_vec()),
        ..TaskFilter::default()
    };
    let update = TaskUpdate {
        status: Some(TaskStatus::InProgress),
        started_running_at: Some(now),
        lease: Some(LeaseStamp {
            started_at: now,
            default_lease_ms: lease_ms,
        }),
        worker_name: worker_name.map(str::to_owned),
        ..TaskUpdate::default()
    };

    let Some(before) = store
        .update_one_and_return(filter, update.clone(), ReturnDocument::Before)
        .await?
    else {
        return Ok(None);
    };

    // Defense in depth against non-atomic stores: the pre-image must have
    // been pending, otherwise the claim is treated as failed.
    if before.status != TaskStatus::Pending {
        tracing::warn!(task = %before.id, status = %before.status, "claim pre-image was not pending; dropping claim");
        return Ok(None);
    }

    // The update is deterministic, so the post-image is the pre-image with
    // the same update applied; no second round trip needed.
    let mut claimed = before;
    update.apply(&mut claimed, now);
    tracing::debug!(task = %claimed.id, name = %claimed.name, timeout_at = ?claimed.timeout_at, "claimed task");
    Ok(Some(claimed))
}
