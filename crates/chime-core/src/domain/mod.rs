//! Domain model: ids, status machine, the task record and its views.

pub mod ids;
pub mod record;
pub mod status;

pub use ids::TaskId;
pub use record::{LogEntry, NewTask, SideEffectRecord, TaskError, TaskRecord};
pub use status::TaskStatus;

/// Millisecond spans as stored on records (`timeout_ms`, `repeat_after_ms`)
/// converted to a chrono duration for instant arithmetic.
pub(crate) fn millis(ms: u64) -> chrono::Duration {
    chrono::Duration::milliseconds(ms as i64)
}
