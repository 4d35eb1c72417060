//! chime-core
//!
//! Durable task scheduler over a document store. Clients schedule named
//! tasks for a wall-clock instant; workers atomically claim due tasks, run
//! registered handlers with per-task timeouts, persist outcomes, and enqueue
//! repeat and retry occurrences. All cross-worker coordination happens
//! through the store's atomic conditional updates: the claim protocol is
//! leaderless and execution is at-least-once under worker crash.
//!
//! Module map:
//! - domain: ids, status machine, the task record
//! - store: the store port, typed filters/updates, in-memory adapter
//! - registry: handler registration (flat and nested trees)
//! - handle: the narrow surface handlers get to their own record
//! - scheduler + poller: public API, claim/execute/sweep loops
//! - clock: injectable time source
//! - error: crate-level error types

pub mod clock;
pub mod config;
pub mod domain;
pub mod error;
pub mod handle;
pub mod observability;
pub mod poller;
pub mod registry;
pub mod scheduler;
pub mod store;

mod claim;
mod engine;
mod sweeper;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::Config;
pub use domain::{NewTask, TaskId, TaskRecord, TaskStatus};
pub use error::ChimeError;
pub use handle::TaskHandle;
pub use observability::StatusCounts;
pub use poller::{PollHandle, PollOptions, PollingOptions};
pub use registry::{Handler, HandlerNode, HandlerRegistry};
pub use scheduler::{ExecuteOptions, ScheduleOptions, Scheduler, SweepOptions};
pub use store::{InMemoryTaskStore, LeaseStamp, ReturnDocument, TaskFilter, TaskStore, TaskUpdate};
