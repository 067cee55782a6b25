//! In-process scheduler for `@every <duration>` jobs.

use std::sync::Arc;

use async_trait::async_trait;
use switchyard_core::{EventLogger, PipelineError};

use super::schedule::Schedule;
use super::scheduler::{JobCallback, JobScheduler, SchedulerCore, SchedulerState};

/// Runs each job on a fixed interval measured from `start`.
///
/// Only `@every` expressions are accepted; calendar expressions belong to
/// [`CronScheduler`](super::CronScheduler).
pub struct IntervalScheduler {
    core: SchedulerCore,
}

impl IntervalScheduler {
    #[must_use]
    pub fn new(logger: Arc<dyn EventLogger>) -> Self {
        Self {
            core: SchedulerCore::new("interval", logger),
        }
    }
}

#[async_trait]
impl JobScheduler for IntervalScheduler {
    fn name(&self) -> &'static str {
        "interval"
    }

    fn validate(&self, expression: &str) -> Result<Schedule, PipelineError> {
        Schedule::parse_interval(expression)
    }

    fn add_job(
        &self,
        name: &str,
        expression: &str,
        callback: JobCallback,
    ) -> Result<(), PipelineError> {
        let schedule = self.validate(expression)?;
        self.core.add_job(name, schedule, callback)
    }

    fn start(&self) {
        self.core.start();
    }

    async fn stop(&self) {
        self.core.stop().await;
    }

    fn state(&self) -> SchedulerState {
        self.core.state()
    }

    fn job_count(&self) -> usize {
        self.core.job_count()
    }
}
