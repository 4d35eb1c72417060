//! Scheduler facade: the public surface over store, registry and clock.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::domain::{millis, NewTask, TaskRecord, TaskStatus};
use crate::engine;
use crate::error::ChimeError;
use crate::handle::TaskHandle;
use crate::observability::StatusCounts;
use crate::poller::PollHandle;
use crate::registry::{Handler, HandlerNode, HandlerRegistry};
use crate::store::{ReturnDocument, TaskFilter, TaskStore, TaskUpdate};
use crate::sweeper;

/// Options accepted by [`Scheduler::schedule`].
///
/// `From<u64>` mirrors the bare-number shorthand for a repeat cadence:
/// `scheduler.schedule(name, at, params, 5000.into())`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleOptions {
    pub repeat_after_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub retry_on_timeout_count: u32,
}

impl From<u64> for ScheduleOptions {
    fn from(repeat_after_ms: u64) -> Self {
        Self {
            repeat_after_ms: Some(repeat_after_ms),
            ..Self::default()
        }
    }
}

/// Options accepted by [`Scheduler::execute`].
#[derive(Clone, Default)]
pub struct ExecuteOptions {
    pub clock: Option<Arc<dyn Clock>>,
}

/// Options accepted by [`Scheduler::expire_timed_out_tasks`].
#[derive(Clone, Default)]
pub struct SweepOptions {
    pub clock: Option<Arc<dyn Clock>>,
}

pub(crate) struct SchedulerInner {
    pub(crate) store: Arc<dyn TaskStore>,
    pub(crate) registry: RwLock<HandlerRegistry>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: Config,
    pub(crate) poll_slot: Mutex<Option<PollHandle>>,
}

/// One worker's view of the task collection.
///
/// Cheap to clone; clones share the store handle, the handler registry and
/// the poll-loop guard. Multiple `Scheduler`s over one store are exactly the
/// multi-worker deployment: contention is resolved by the store's atomic
/// conditional updates, never by in-process locks.
#[derive(Clone)]
pub struct Scheduler {
    pub(crate) inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self::with_config(store, Config::default())
    }

    pub fn with_config(store: Arc<dyn TaskStore>, config: Config) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn TaskStore>, config: Config, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                store,
                registry: RwLock::new(HandlerRegistry::new()),
                clock,
                config,
                poll_slot: Mutex::new(None),
            }),
        }
    }

    pub fn store(&self) -> Arc<dyn TaskStore> {
        self.inner.store.clone()
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub(crate) fn clock_or(&self, over: &Option<Arc<dyn Clock>>) -> Arc<dyn Clock> {
        over.clone().unwrap_or_else(|| self.inner.clock.clone())
    }

    pub(crate) fn handler_for(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.inner.registry.read().get(name)
    }

    // ---- registry ----

    pub fn register_handler(&self, name: impl Into<String>, handler: Arc<dyn Handler>) -> &Self {
        self.inner.registry.write().register(name, handler);
        self
    }

    pub fn register_handler_fn<F, Fut>(&self, name: impl Into<String>, f: F) -> &Self
    where
        F: Fn(Value, TaskHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ChimeError>> + Send + 'static,
    {
        self.inner.registry.write().register_fn(name, f);
        self
    }

    /// Registers every leaf of a nested tree under its dotted path.
    pub fn register_handlers(
        &self,
        tree: std::collections::HashMap<String, HandlerNode>,
        prefix: Option<&str>,
    ) -> &Self {
        self.inner.registry.write().register_tree(tree, prefix);
        self
    }

    pub fn remove_all_handlers(&self) -> &Self {
        self.inner.registry.write().remove_all();
        self
    }

    pub fn handler_names(&self) -> Vec<String> {
        self.inner.registry.read().names()
    }

    // ---- task lifecycle ----

    /// Creates a pending record due at `scheduled_at`. The scheduling
    /// timeout defaults to `scheduled_at` plus the configured window.
    pub async fn schedule(
        &self,
        name: impl Into<String>,
        scheduled_at: DateTime<Utc>,
        params: Value,
        options: ScheduleOptions,
    ) -> Result<TaskRecord, ChimeError> {
        let task = NewTask {
            name: name.into(),
            params,
            scheduled_at,
            scheduling_timeout_at: Some(
                scheduled_at + millis(self.inner.config.default_scheduling_timeout_ms),
            ),
            timeout_ms: options.timeout_ms,
            repeat_after_ms: options.repeat_after_ms,
            retry_on_timeout_count: options.retry_on_timeout_count,
            previous_task_id: None,
            original_task_id: None,
        };

        let record = self.inner.store.insert(task).await?;
        tracing::debug!(task = %record.id, name = %record.name, scheduled_at = %record.scheduled_at, "scheduled task");
        Ok(record)
    }

    /// Cancels the first matching task that is still pending. Returns the
    /// cancelled record, or `None` when nothing pending matched. An empty
    /// filter cancels nothing.
    pub async fn cancel_task(
        &self,
        filter: TaskFilter,
    ) -> Result<Option<TaskRecord>, ChimeError> {
        if filter.is_empty() {
            return Ok(None);
        }

        let now = self.inner.clock.now();
        let cancelled = self
            .inner
            .store
            .update_one_and_return(
                TaskFilter {
                    status: Some(TaskStatus::Pending),
                    ..filter
                },
                TaskUpdate {
                    status: Some(TaskStatus::Cancelled),
                    cancelled_at: Some(now),
                    finished_running_at: Some(now),
                    ..TaskUpdate::default()
                },
                ReturnDocument::After,
            )
            .await?;

        if let Some(record) = &cancelled {
            tracing::info!(task = %record.id, name = %record.name, "cancelled task");
        }
        Ok(cancelled)
    }

    /// Runs one task to a terminal status. Handler failures are captured on
    /// the record; this only errors when the store does.
    pub async fn execute(
        &self,
        task: &TaskRecord,
        options: ExecuteOptions,
    ) -> Result<Option<TaskRecord>, ChimeError> {
        let clock = self.clock_or(&options.clock);
        engine::execute_task(
            &self.inner.store,
            self.handler_for(&task.name),
            task.clone(),
            &clock,
            self.inner.config.default_scheduling_timeout_ms,
        )
        .await
    }

    /// Sweeps every expired lease to `TimedOut`, inserting retries or
    /// follow-ups as each record calls for.
    pub async fn expire_timed_out_tasks(&self, options: SweepOptions) -> Result<(), ChimeError> {
        let clock = self.clock_or(&options.clock);
        sweeper::expire_timed_out_tasks(
            &self.inner.store,
            clock.now(),
            self.inner.config.default_scheduling_timeout_ms,
        )
        .await
    }

    /// Per-status totals over the whole collection.
    pub async fn counts(&self) -> Result<StatusCounts, ChimeError> {
        self.inner.store.count_by_status().await
    }
}
