//! Poll loop: claims due tasks and drives them to completion.
//!
//! `poll` is one synchronous pass (everything claimed is finished before it
//! returns); `start_polling` wraps it in a cancellable tick loop, one loop
//! per scheduler instance.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::claim;
use crate::clock::Clock;
use crate::engine;
use crate::error::ChimeError;
use crate::scheduler::{Scheduler, SweepOptions};

/// Options accepted by [`Scheduler::poll`].
#[derive(Clone, Default)]
pub struct PollOptions {
    /// Claim-and-run batch size; defaults to the configured `parallel`.
    pub parallel: Option<usize>,

    /// Stamped onto claimed records for operational tracing.
    pub worker_name: Option<String>,

    pub clock: Option<Arc<dyn Clock>>,
}

/// Options accepted by [`Scheduler::start_polling`].
#[derive(Clone, Default)]
pub struct PollingOptions {
    /// Delay between ticks, measured from the end of the previous pass;
    /// defaults to the configured interval.
    pub interval: Option<Duration>,

    pub parallel: Option<usize>,
    pub worker_name: Option<String>,
    pub clock: Option<Arc<dyn Clock>>,
}

/// Cancel handle returned by [`Scheduler::start_polling`].
///
/// Cancelling stops future ticks, awaits any pass already in flight (it is
/// never interrupted), and releases the scheduler's poll-loop guard.
#[derive(Clone)]
pub struct PollHandle {
    shutdown: Arc<watch::Sender<bool>>,
    active: Arc<AtomicBool>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl PollHandle {
    pub async fn cancel(&self) {
        let _ = self.shutdown.send(true);
        let join = self.task.lock().take();
        if let Some(join) = join {
            let _ = join.await;
        }
    }

    /// Whether the tick loop is still running. Only the loop's own exit
    /// clears this, so the singleton guard cannot hand out a second loop
    /// while a cancelled one is finishing its pass.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Scheduler {
    /// One poll pass: claim up to `parallel` due tasks, run the batch
    /// concurrently to completion, and repeat until a claim comes back
    /// empty. Store errors propagate; handler failures never do.
    pub async fn poll(&self, options: PollOptions) -> Result<(), ChimeError> {
        let parallel = options
            .parallel
            .unwrap_or(self.inner.config.parallel)
            .max(1);
        let clock = self.clock_or(&options.clock);

        loop {
            let mut batch = Vec::with_capacity(parallel);
            for _ in 0..parallel {
                let names = self.handler_names();
                let claimed = claim::claim_one(
                    &self.inner.store,
                    &names,
                    clock.now(),
                    options.worker_name.as_deref(),
                    self.inner.config.default_lease_ms,
                )
                .await?;
                match claimed {
                    Some(task) => batch.push(task),
                    None => break,
                }
            }

            if batch.is_empty() {
                return Ok(());
            }

            let mut joins = Vec::with_capacity(batch.len());
            for task in batch {
                let scheduler = self.clone();
                let clock = clock.clone();
                joins.push(tokio::spawn(async move {
                    let handler = scheduler.handler_for(&task.name);
                    engine::execute_task(
                        &scheduler.inner.store,
                        handler,
                        task,
                        &clock,
                        scheduler.inner.config.default_scheduling_timeout_ms,
                    )
                    .await
                }));
            }

            // Await the whole batch before the next claim pass; the first
            // store error is reported once everything has settled.
            let mut first_error = None;
            for join in joins {
                match join.await {
                    Ok(Ok(_)) => {}
                    Ok(Err(error)) => {
                        if first_error.is_none() {
                            first_error = Some(error);
                        }
                    }
                    Err(join_error) => {
                        if first_error.is_none() {
                            first_error =
                                Some(ChimeError::store(format!("execution task: {join_error}")));
                        }
                    }
                }
            }
            if let Some(error) = first_error {
                return Err(error);
            }
        }
    }

    /// Starts the tick loop: sweep expired leases, poll, sleep, repeat. At
    /// most one loop runs per scheduler; calling again while one is live
    /// returns the existing handle. Errors from a pass are logged and the
    /// next tick still happens.
    pub fn start_polling(&self, options: PollingOptions) -> PollHandle {
        let mut slot = self.inner.poll_slot.lock();
        if let Some(handle) = slot.as_ref() {
            if handle.is_active() {
                return handle.clone();
            }
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let handle = PollHandle {
            shutdown: Arc::new(shutdown_tx),
            active: Arc::new(AtomicBool::new(true)),
            task: Arc::new(Mutex::new(None)),
        };

        let scheduler = self.clone();
        let interval = options.interval.unwrap_or(self.inner.config.poll_interval);
        let poll_options = PollOptions {
            parallel: options.parallel,
            worker_name: options.worker_name,
            clock: options.clock,
        };
        let sweep_options = SweepOptions {
            clock: poll_options.clock.clone(),
        };
        let active = handle.active.clone();

        let join = tokio::spawn(async move {
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }

                if let Err(error) = scheduler
                    .expire_timed_out_tasks(sweep_options.clone())
                    .await
                {
                    tracing::warn!(%error, "sweep pass failed");
                }
                if let Err(error) = scheduler.poll(poll_options.clone()).await {
                    tracing::warn!(%error, "poll pass failed");
                }

                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            active.store(false, Ordering::SeqCst);
        });
        *handle.task.lock() = Some(join);

        *slot = Some(handle.clone());
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::Config;
    use crate::domain::TaskStatus;
    use crate::scheduler::ScheduleOptions;
    use crate::store::{InMemoryTaskStore, TaskFilter, TaskStore};
    use chrono::{DateTime, TimeZone, Utc};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::HashMap;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap()
    }

    fn scheduler_over(store: Arc<dyn TaskStore>) -> Scheduler {
        Scheduler::with_clock(store, Config::default(), Arc::new(FixedClock::new(t0())))
    }

    #[tokio::test]
    async fn poll_skips_names_without_local_handlers() {
        let scheduler = scheduler_over(Arc::new(InMemoryTaskStore::new()));
        scheduler.register_handler_fn("handledJob", |_p, _t| async { Ok(json!("done")) });

        let handled = scheduler
            .schedule("handledJob", t0(), json!({}), ScheduleOptions::default())
            .await
            .unwrap();
        let unhandled = scheduler
            .schedule("unhandledJob", t0(), json!({}), ScheduleOptions::default())
            .await
            .unwrap();

        scheduler.poll(PollOptions::default()).await.unwrap();

        let store = scheduler.store();
        let handled = store.find_by_id(handled.id).await.unwrap().unwrap();
        assert_eq!(handled.status, TaskStatus::Succeeded);

        let unhandled = store.find_by_id(unhandled.id).await.unwrap().unwrap();
        assert_eq!(unhandled.status, TaskStatus::Pending);
        assert!(unhandled.started_running_at.is_none());
        assert!(unhandled.timeout_at.is_none());
        assert!(unhandled.worker_name.is_none());
    }

    #[tokio::test]
    async fn poll_with_empty_registry_claims_nothing() {
        let scheduler = scheduler_over(Arc::new(InMemoryTaskStore::new()));
        scheduler
            .schedule("job", t0(), json!({}), ScheduleOptions::default())
            .await
            .unwrap();

        scheduler.poll(PollOptions::default()).await.unwrap();

        let counts = scheduler.counts().await.unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.in_progress, 0);
    }

    #[tokio::test]
    async fn poll_drains_everything_due() {
        let scheduler = scheduler_over(Arc::new(InMemoryTaskStore::new()));
        scheduler.register_handler_fn("job", |_p, _t| async { Ok(json!(null)) });

        for i in 0..5 {
            scheduler
                .schedule("job", t0(), json!({ "i": i }), ScheduleOptions::default())
                .await
                .unwrap();
        }

        scheduler
            .poll(PollOptions {
                parallel: Some(3),
                ..PollOptions::default()
            })
            .await
            .unwrap();

        let counts = scheduler.counts().await.unwrap();
        assert_eq!(counts.succeeded, 5);
        assert_eq!(counts.pending, 0);
    }

    /// Two workers over one store: every record is executed exactly once.
    #[tokio::test]
    async fn concurrent_workers_claim_each_task_exactly_once() {
        let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        let executions: Arc<Mutex<HashMap<u64, u32>>> = Arc::new(Mutex::new(HashMap::new()));

        let worker = |name: &str| {
            let scheduler = scheduler_over(store.clone());
            let seen = executions.clone();
            scheduler.register_handler_fn("job", move |params, _task| {
                let seen = seen.clone();
                async move {
                    let i = params["i"].as_u64().unwrap();
                    *seen.lock().entry(i).or_insert(0) += 1;
                    Ok(json!(null))
                }
            });
            (scheduler, name.to_string())
        };
        let (alpha, alpha_name) = worker("alpha");
        let (beta, beta_name) = worker("beta");

        let total = 40u64;
        for i in 0..total {
            alpha
                .schedule("job", t0(), json!({ "i": i }), ScheduleOptions::default())
                .await
                .unwrap();
        }

        let alpha_poll = alpha.poll(PollOptions {
            parallel: Some(4),
            worker_name: Some(alpha_name),
            ..PollOptions::default()
        });
        let beta_poll = beta.poll(PollOptions {
            parallel: Some(4),
            worker_name: Some(beta_name),
            ..PollOptions::default()
        });
        let (a, b) = tokio::join!(alpha_poll, beta_poll);
        a.unwrap();
        b.unwrap();

        let counts = store.count_by_status().await.unwrap();
        assert_eq!(counts.succeeded as u64, total);
        assert_eq!(counts.pending, 0);
        assert_eq!(counts.in_progress, 0);

        let seen = executions.lock();
        assert_eq!(seen.len() as u64, total);
        assert!(seen.values().all(|&count| count == 1));
    }

    #[tokio::test]
    async fn polling_loop_picks_up_work_until_cancelled() {
        let scheduler = scheduler_over(Arc::new(InMemoryTaskStore::new()));
        scheduler.register_handler_fn("job", |_p, _t| async { Ok(json!(1)) });

        let handle = scheduler.start_polling(PollingOptions {
            interval: Some(Duration::from_millis(10)),
            ..PollingOptions::default()
        });
        assert!(handle.is_active());

        let task = scheduler
            .schedule("job", t0(), json!({}), ScheduleOptions::default())
            .await
            .unwrap();

        // Give the loop a few ticks to find the task.
        for _ in 0..50 {
            let stored = scheduler
                .store()
                .find_by_id(task.id)
                .await
                .unwrap()
                .unwrap();
            if stored.status == TaskStatus::Succeeded {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let stored = scheduler
            .store()
            .find_by_id(task.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, TaskStatus::Succeeded);

        handle.cancel().await;
        assert!(!handle.is_active());

        // Work scheduled after cancel is left alone.
        let after = scheduler
            .schedule("job", t0(), json!({}), ScheduleOptions::default())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let after = scheduler
            .store()
            .find_by_id(after.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn start_polling_is_a_singleton_per_scheduler() {
        let scheduler = scheduler_over(Arc::new(InMemoryTaskStore::new()));

        let first = scheduler.start_polling(PollingOptions {
            interval: Some(Duration::from_millis(10)),
            ..PollingOptions::default()
        });
        let second = scheduler.start_polling(PollingOptions::default());

        // Same loop, same handle.
        assert!(Arc::ptr_eq(&first.shutdown, &second.shutdown));

        // Cancel waits for the loop to wind down, so the guard is free the
        // moment it returns and a fresh loop may start straight away.
        first.cancel().await;
        assert!(!first.is_active());

        let third = scheduler.start_polling(PollingOptions {
            interval: Some(Duration::from_millis(10)),
            ..PollingOptions::default()
        });
        assert!(!Arc::ptr_eq(&first.shutdown, &third.shutdown));
        assert!(third.is_active());
        third.cancel().await;
    }

    #[tokio::test]
    async fn polling_loop_sweeps_before_claiming() {
        let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        let scheduler = scheduler_over(store.clone());
        scheduler.register_handler_fn("job", |_p, _t| async { Ok(json!(null)) });

        // A lease that expired before t0, with one retry left.
        let mut task = crate::domain::NewTask::new("job", t0() - crate::domain::millis(601_000), json!({}));
        task.retry_on_timeout_count = 1;
        store.insert(task).await.unwrap();
        crate::claim::claim_one(
            &store,
            &["job".to_string()],
            t0() - crate::domain::millis(601_000),
            None,
            600_000,
        )
        .await
        .unwrap()
        .unwrap();

        let handle = scheduler.start_polling(PollingOptions {
            interval: Some(Duration::from_millis(10)),
            ..PollingOptions::default()
        });

        // The tick sweeps the expired lease, inserts the retry, and the
        // retry (still due) is claimed and run.
        for _ in 0..50 {
            let counts = store.count_by_status().await.unwrap();
            if counts.succeeded == 1 && counts.timed_out == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.cancel().await;

        let counts = store.count_by_status().await.unwrap();
        assert_eq!(counts.timed_out, 1);
        assert_eq!(counts.succeeded, 1);

        let retry = store
            .find_one(TaskFilter {
                status: Some(TaskStatus::Succeeded),
                ..TaskFilter::default()
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(retry.retry_on_timeout_count, 0);
    }
}
