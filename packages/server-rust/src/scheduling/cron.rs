//! Calendar scheduler backed by the `cron` crate.

use std::sync::Arc;

use async_trait::async_trait;
use switchyard_core::{EventLogger, PipelineError};

use super::schedule::Schedule;
use super::scheduler::{JobCallback, JobScheduler, SchedulerCore, SchedulerState};

/// Accepts every schedule form: cron fields, descriptors and `@every`.
///
/// Calendar jobs fire at UTC wall-clock times; `@every` jobs behave exactly
/// as under [`IntervalScheduler`](super::IntervalScheduler).
pub struct CronScheduler {
    core: SchedulerCore,
}

impl CronScheduler {
    #[must_use]
    pub fn new(logger: Arc<dyn EventLogger>) -> Self {
        Self {
            core: SchedulerCore::new("cron", logger),
        }
    }
}

#[async_trait]
impl JobScheduler for CronScheduler {
    fn name(&self) -> &'static str {
        "cron"
    }

    fn validate(&self, expression: &str) -> Result<Schedule, PipelineError> {
        Schedule::parse(expression)
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
