//! Job scheduler contract and the run loop shared by its implementations.
//!
//! A scheduler moves `Stopped -> Running -> Stopped`. Jobs are added while
//! stopped; `start` spawns one loop per job and every tick runs its callback
//! on a separate tracked task, so a slow job never delays another and a job's
//! own ticks may overlap. `stop` cancels the loops, then waits for every
//! loop and every in-flight callback to finish.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use switchyard_core::{EventLogger, PipelineError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::schedule::{Schedule, ScheduleKind};
use crate::service::middleware::recovery::panic_message;

// ---------------------------------------------------------------------------
// Job types
// ---------------------------------------------------------------------------

/// What a job callback receives on every tick.
#[derive(Debug, Clone)]
pub struct JobTick {
    pub job: String,
    pub schedule: String,
    pub fired_at: DateTime<Utc>,
    /// Fires when the scheduler stops.
    pub cancellation: CancellationToken,
}

/// Callback invoked on each tick of a job.
pub type JobCallback =
    Arc<dyn Fn(JobTick) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wraps an async closure as a [`JobCallback`].
pub fn job_fn<F, Fut>(f: F) -> JobCallback
where
    F: Fn(JobTick) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |tick| f(tick).boxed())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Running,
}

// ---------------------------------------------------------------------------
// JobScheduler trait
// ---------------------------------------------------------------------------

/// Periodic job runner.
///
/// Implemented by [`IntervalScheduler`](super::IntervalScheduler) for
/// `@every` schedules and [`CronScheduler`](super::CronScheduler) for full
/// cron expressions.
#[async_trait]
pub trait JobScheduler: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Checks that `expression` is accepted by this scheduler.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::InvalidSchedule` for rejected expressions.
    fn validate(&self, expression: &str) -> Result<Schedule, PipelineError>;

    /// Registers a job. Only valid while stopped.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::InvalidSchedule` for a malformed expression and
    /// `PipelineError::SchedulerRunning` when called after `start`.
    fn add_job(
        &self,
        name: &str,
        expression: &str,
        callback: JobCallback,
    ) -> Result<(), PipelineError>;

    /// Starts one loop per job. No-op when already running.
    fn start(&self);

    /// Stops every loop and waits for in-flight callbacks. No-op when stopped.
    async fn stop(&self);

    fn state(&self) -> SchedulerState;

    fn job_count(&self) -> usize;
}

// ---------------------------------------------------------------------------
// SchedulerCore
// ---------------------------------------------------------------------------

struct Job {
    name: String,
    schedule: Schedule,
    callback: JobCallback,
}

enum RunState {
    Stopped,
    Running {
        shutdown: CancellationToken,
        loops: Vec<JoinHandle<()>>,
        ticks: TaskTracker,
    },
}

/// Job list and run state shared by the scheduler implementations.
///
/// Lock order is `state` then `jobs`; neither lock is held across an await.
pub(crate) struct SchedulerCore {
    name: &'static str,
    logger: Arc<dyn EventLogger>,
    state: Mutex<RunState>,
    jobs: RwLock<Vec<Arc<Job>>>,
}

impl SchedulerCore {
    pub(crate) fn new(name: &'static str, logger: Arc<dyn EventLogger>) -> Self {
        Self {
            name,
            logger,
            state: Mutex::new(RunState::Stopped),
            jobs: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn add_job(
        &self,
        name: &str,
        schedule: Schedule,
        callback: JobCallback,
    ) -> Result<(), PipelineError> {
        let state = self.state.lock();
        if matches!(*state, RunState::Running { .. }) {
            return Err(PipelineError::SchedulerRunning);
        }
        self.jobs.write().push(Arc::new(Job {
            name: name.to_string(),
            schedule,
            callback,
        }));
        Ok(())
    }

    pub(crate) fn start(&self) {
        let mut state = self.state.lock();
        if matches!(*state, RunState::Running { .. }) {
            return;
        }

        let shutdown = CancellationToken::new();
        let ticks = TaskTracker::new();
        let jobs = self.jobs.read();
        let loops = jobs
            .iter()
            .map(|job| {
                tokio::spawn(run_job(
                    Arc::clone(job),
                    shutdown.clone(),
                    ticks.clone(),
                    Arc::clone(&self.logger),
                ))
            })
            .collect();

        self.logger.info(
            "scheduler started",
            &[
                ("scheduler", self.name.to_string()),
                ("jobs", jobs.len().to_string()),
            ],
        );
        *state = RunState::Running {
            shutdown,
            loops,
            ticks,
        };
    }

    pub(crate) async fn stop(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), RunState::Stopped);
        let RunState::Running {
            shutdown,
            loops,
            ticks,
        } = previous
        else {
            return;
        };

        shutdown.cancel();
        for handle in loops {
            if let Err(err) = handle.await {
                self.logger.error(
                    "scheduler loop ended abnormally",
                    &[("scheduler", self.name.to_string()), ("error", err.to_string())],
                );
            }
        }
        ticks.close();
        ticks.wait().await;

        self.logger
            .info("scheduler stopped", &[("scheduler", self.name.to_string())]);
    }

    pub(crate) fn state(&self) -> SchedulerState {
        match *self.state.lock() {
            RunState::Stopped => SchedulerState::Stopped,
            RunState::Running { .. } => SchedulerState::Running,
        }
    }

    pub(crate) fn job_count(&self) -> usize {
        self.jobs.read().len()
    }
}

async fn run_job(
    job: Arc<Job>,
    shutdown: CancellationToken,
    ticks: TaskTracker,
    logger: Arc<dyn EventLogger>,
) {
    match job.schedule.kind() {
        ScheduleKind::Every(interval) => {
            run_every(*interval, &job, &shutdown, &ticks, &logger).await;
        }
        ScheduleKind::Cron(_) => run_calendar(&job, &shutdown, &ticks, &logger).await,
    }
}

async fn run_every(
    interval: Duration,
    job: &Arc<Job>,
    shutdown: &CancellationToken,
    ticks: &TaskTracker,
    logger: &Arc<dyn EventLogger>,
) {
    // First tick one interval after start, later ticks on a fixed grid.
    let mut timer = tokio::time::interval_at(Instant::now() + interval, interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            _ = timer.tick() => fire(job, shutdown, ticks, logger),
        }
    }
}

async fn run_calendar(
    job: &Arc<Job>,
    shutdown: &CancellationToken,
    ticks: &TaskTracker,
    logger: &Arc<dyn EventLogger>,
) {
    let mut last_fire = Utc::now();
    loop {
        let now = Utc::now();
        // Never fire the same slot twice if the wall clock lags the timer.
        let Some(next) = job.schedule.next_after(now.max(last_fire)) else {
            logger.info(
                "schedule has no upcoming fire time",
                &[
                    ("job", job.name.clone()),
                    ("schedule", job.schedule.expression().to_string()),
                ],
            );
            break;
        };
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            () = tokio::time::sleep(wait) => fire(job, shutdown, ticks, logger),
        }
        last_fire = next;
    }
}

fn fire(
    job: &Arc<Job>,
    shutdown: &CancellationToken,
    ticks: &TaskTracker,
    logger: &Arc<dyn EventLogger>,
) {
    let tick = JobTick {
        job: job.name.clone(),
        schedule: job.schedule.expression().to_string(),
        fired_at: Utc::now(),
        cancellation: shutdown.child_token(),
    };
    let callback = Arc::clone(&job.callback);
    let logger = Arc::clone(logger);
    let name = job.name.clone();

    metrics::counter!("switchyard_scheduler_ticks_total", "job" => name.clone()).increment(1);

    ticks.spawn(async move {
        let outcome = AssertUnwindSafe(async move { callback(tick).await })
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => logger.error(
                "scheduled job failed",
                &[("job", name), ("error", format!("{err:#}"))],
            ),
            Err(payload) => logger.error(
                "scheduled job panicked",
                &[("job", name), ("fault", panic_message(payload.as_ref()))],
            ),
        }
    });
}
