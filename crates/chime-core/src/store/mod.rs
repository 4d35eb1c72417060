//! Task store port and its reference in-memory adapter.

mod filter;
mod memory;

pub use filter::{LeaseStamp, TaskFilter, TaskUpdate};
pub use memory::InMemoryTaskStore;

use async_trait::async_trait;

use crate::domain::{NewTask, TaskId, TaskRecord};
use crate::error::ChimeError;
use crate::observability::StatusCounts;

/// Which side of a conditional update the caller wants back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnDocument {
    /// The document as it was before the update. The claim protocol uses
    /// this to verify the pre-image status.
    Before,

    /// The document after the update.
    After,
}

/// Port over the document store's task collection.
///
/// The one primitive everything rests on is `update_one_and_return`: a
/// conditional update returning the pre- or post-image in a single atomic
/// round trip. Concurrent workers contend only through it; no in-process
/// locks are shared. Adapters should back the claim and sweep queries with a
/// compound index on `(status, scheduledAt)`.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Inserts a new pending record. The store assigns the id and the
    /// `created_at` / `updated_at` stamps.
    async fn insert(&self, task: NewTask) -> Result<TaskRecord, ChimeError>;

    async fn find_by_id(&self, id: TaskId) -> Result<Option<TaskRecord>, ChimeError>;

    /// First record matching the filter, in the store's natural order.
    async fn find_one(&self, filter: TaskFilter) -> Result<Option<TaskRecord>, ChimeError>;

    /// Atomically updates the first record matching `filter` and returns the
    /// requested image, or `None` when nothing matched. Tie-break among
    /// concurrently matching records is the store's ordering; no fairness is
    /// promised.
    async fn update_one_and_return(
        &self,
        filter: TaskFilter,
        update: TaskUpdate,
        ret: ReturnDocument,
    ) -> Result<Option<TaskRecord>, ChimeError>;

    /// Removes matching records and returns how many went. Test harness
    /// helper; the scheduler itself never destroys records.
    async fn delete_many(&self, filter: TaskFilter) -> Result<u64, ChimeError>;

    /// Per-status record totals.
    async fn count_by_status(&self) -> Result<StatusCounts, ChimeError>;
}
