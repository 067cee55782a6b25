//! Cron trigger: runs cron-bound handlers on their schedules.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use parking_lot::Mutex;
use switchyard_core::{Payload, RequestContext, TriggerBinding, TriggerKind, Value};

use super::Trigger;
use crate::scheduling::{job_fn, JobCallback, JobScheduler, JobTick};
use crate::service::{Executor, HandlerDefinition};

/// Wires every `TriggerBinding::Cron` in the registry into a scheduler.
///
/// Each tick builds a context whose payload carries `job`, `schedule` and
/// `fired_at` (RFC 3339, UTC), inherits the tick's cancellation token and
/// runs on the executor's supervised path.
pub struct CronTrigger {
    executor: Executor,
    scheduler: Arc<dyn JobScheduler>,
    /// Number of bindings already added to the scheduler.
    wired: Mutex<usize>,
}

impl CronTrigger {
    #[must_use]
    pub fn new(executor: Executor, scheduler: Arc<dyn JobScheduler>) -> Self {
        Self {
            executor,
            scheduler,
            wired: Mutex::new(0),
        }
    }

    #[must_use]
    pub fn scheduler(&self) -> &Arc<dyn JobScheduler> {
        &self.scheduler
    }

    /// Cron bindings in registration order, each validated against the
    /// scheduler.
    fn bindings(&self) -> anyhow::Result<Vec<(Arc<HandlerDefinition>, String)>> {
        let mut jobs = Vec::new();
        for definition in self.executor.registry().list_by_trigger(TriggerKind::Cron) {
            for binding in definition.triggers() {
                let TriggerBinding::Cron { schedule } = binding else {
                    continue;
                };
                self.scheduler
                    .validate(schedule)
                    .with_context(|| format!("handler {}", definition.name()))?;
                jobs.push((Arc::clone(&definition), schedule.clone()));
            }
        }
        Ok(jobs)
    }

    fn callback(&self, definition: Arc<HandlerDefinition>) -> JobCallback {
        let executor = self.executor.clone();
        job_fn(move |tick: JobTick| {
            let executor = executor.clone();
            let definition = Arc::clone(&definition);
            async move {
                let mut payload = Payload::new();
                payload.insert("job".into(), Value::from(tick.job));
                payload.insert("schedule".into(), Value::from(tick.schedule));
                payload.insert("fired_at".into(), Value::from(tick.fired_at.to_rfc3339()));

                let ctx = RequestContext::new(TriggerKind::Cron, definition.name())
                    .with_payload(payload)
                    .with_cancellation(&tick.cancellation);
                let invocation = executor.execute_supervised(definition, ctx).await;
                invocation.result.map(|_| ()).map_err(anyhow::Error::from)
            }
        })
    }
}

#[async_trait]
impl Trigger for CronTrigger {
    fn kind(&self) -> TriggerKind {
        TriggerKind::Cron
    }

    /// Adds one job per binding not yet wired, then starts the scheduler.
    ///
    /// Every binding is validated before any job is added. Bindings come in
    /// registration order and the registry only appends, so a start that
    /// failed partway resumes after the last job it added.
    async fn start(&self) -> anyhow::Result<()> {
        {
            let mut wired = self.wired.lock();
            for (definition, schedule) in self.bindings()?.into_iter().skip(*wired) {
                let name = definition.name().to_string();
                self.scheduler
                    .add_job(&name, &schedule, self.callback(definition))
                    .with_context(|| format!("handler {name}"))?;
                *wired += 1;
            }
        }
        self.scheduler.start();
        Ok(())
    }

    async fn stop(&self) {
        self.scheduler.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use switchyard_core::{HandlerResult, PipelineError};

    use super::*;
    use crate::scheduling::{
        CronScheduler, IntervalScheduler, RateLimitConfig, Schedule, SchedulerState,
        TokenBucketLimiter,
    };
    use crate::service::middleware::test_support::{CapturingLogger, Faulty, Sleepy};
    use crate::service::{
        build_default_chain, FrameworkConfig, Handler, HandlerRegistry, MiddlewareChain,
    };

    /// Counts calls and remembers the last payload it saw.
    #[derive(Default)]
    struct Tally {
        calls: AtomicUsize,
        last: Mutex<Option<(TriggerKind, Payload)>>,
    }

    #[async_trait]
    impl Handler for Arc<Tally> {
        async fn call(&self, ctx: &mut RequestContext) -> HandlerResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock() = Some((ctx.trigger(), ctx.payload.clone()));
            Ok(Value::Null)
        }
    }

    /// Waits for cancellation and records that it saw it.
    struct AwaitsStop {
        observed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Handler for AwaitsStop {
        async fn call(&self, ctx: &mut RequestContext) -> HandlerResult {
            ctx.cancelled().await;
            self.observed.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        }
    }

    fn executor(registry: HandlerRegistry) -> Executor {
        Executor::new(Arc::new(registry), MiddlewareChain::new())
    }

    fn interval_scheduler(logger: &Arc<CapturingLogger>) -> Arc<dyn JobScheduler> {
        Arc::new(IntervalScheduler::new(logger.clone()))
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_invoke_bound_handler_with_job_payload() {
        let tally = Arc::new(Tally::default());
        let registry = HandlerRegistry::new();
        registry
            .register("report", tally.clone(), [TriggerBinding::cron("@every 50ms")])
            .unwrap();
        registry.register("idle", Sleepy { delay_ms: 0 }, []).unwrap();

        let logger = Arc::new(CapturingLogger::default());
        let trigger = CronTrigger::new(executor(registry), interval_scheduler(&logger));
        trigger.start().await.unwrap();
        assert_eq!(trigger.scheduler().job_count(), 1);

        tokio::time::sleep(Duration::from_millis(160)).await;
        trigger.stop().await;

        assert_eq!(tally.calls.load(Ordering::SeqCst), 3);
        let (kind, payload) = tally.last.lock().clone().unwrap();
        assert_eq!(kind, TriggerKind::Cron);
        assert_eq!(payload["job"], Value::from("report"));
        assert_eq!(payload["schedule"], Value::from("@every 50ms"));
        assert!(payload["fired_at"].as_str().is_some_and(|s| s.contains('T')));
    }

    #[tokio::test]
    async fn invalid_binding_fails_start_before_any_job_is_added() {
        let registry = HandlerRegistry::new();
        registry
            .register("ok", Sleepy { delay_ms: 0 }, [TriggerBinding::cron("@every 1s")])
            .unwrap();
        registry
            .register("bad", Sleepy { delay_ms: 0 }, [TriggerBinding::cron("@every soon")])
            .unwrap();

        let logger = Arc::new(CapturingLogger::default());
        let trigger = CronTrigger::new(executor(registry), interval_scheduler(&logger));
        let err = trigger.start().await.unwrap_err();

        assert!(format!("{err:#}").starts_with("handler bad: invalid schedule"));
        assert_eq!(trigger.scheduler().job_count(), 0);
        assert_eq!(trigger.scheduler().state(), SchedulerState::Stopped);
    }

    #[tokio::test]
    async fn interval_scheduler_rejects_calendar_bindings() {
        let registry = HandlerRegistry::new();
        registry
            .register("nightly", Sleepy { delay_ms: 0 }, [TriggerBinding::cron("0 3 * * *")])
            .unwrap();
        let logger = Arc::new(CapturingLogger::default());

        let interval = CronTrigger::new(executor(registry), interval_scheduler(&logger));
        assert!(interval.start().await.is_err());

        let registry = HandlerRegistry::new();
        registry
            .register("nightly", Sleepy { delay_ms: 0 }, [TriggerBinding::cron("0 3 * * *")])
            .unwrap();
        let cron = CronTrigger::new(
            executor(registry),
            Arc::new(CronScheduler::new(logger.clone())),
        );
        cron.start().await.unwrap();
        cron.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn faulting_handler_keeps_ticking() {
        let registry = HandlerRegistry::new();
        registry
            .register("faulty", Faulty, [TriggerBinding::cron("@every 50ms")])
            .unwrap();
        let logger = Arc::new(CapturingLogger::default());
        let trigger = CronTrigger::new(executor(registry), interval_scheduler(&logger));

        trigger.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(160)).await;
        trigger.stop().await;

        let failures = logger
            .messages("error")
            .into_iter()
            .filter(|m| m == "scheduled job failed")
            .count();
        assert_eq!(failures, 3);
        assert_eq!(
            logger.field("scheduled job failed", "error").as_deref(),
            Some("handler fault: index out of range")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_running_invocations() {
        let observed = Arc::new(AtomicUsize::new(0));
        let registry = HandlerRegistry::new();
        registry
            .register(
                "waits",
                AwaitsStop {
                    observed: observed.clone(),
                },
                [TriggerBinding::cron("@every 50ms")],
            )
            .unwrap();
        let logger = Arc::new(CapturingLogger::default());
        let trigger = CronTrigger::new(executor(registry), interval_scheduler(&logger));

        trigger.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        trigger.stop().await;

        assert_eq!(observed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_does_not_duplicate_jobs() {
        let tally = Arc::new(Tally::default());
        let registry = HandlerRegistry::new();
        registry
            .register("report", tally.clone(), [TriggerBinding::cron("@every 50ms")])
            .unwrap();
        let logger = Arc::new(CapturingLogger::default());
        let trigger = CronTrigger::new(executor(registry), interval_scheduler(&logger));

        trigger.start().await.unwrap();
        trigger.stop().await;
        trigger.start().await.unwrap();
        assert_eq!(trigger.scheduler().job_count(), 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        trigger.stop().await;
        assert_eq!(tally.calls.load(Ordering::SeqCst), 1);
    }

    /// Rejects the first attempt to add the job named `refuse`.
    struct RefusesOnce {
        inner: IntervalScheduler,
        refuse: &'static str,
        refused: AtomicBool,
    }

    #[async_trait]
    impl JobScheduler for RefusesOnce {
        fn name(&self) -> &'static str {
            "refuses-once"
        }

        fn validate(&self, expression: &str) -> Result<Schedule, PipelineError> {
            self.inner.validate(expression)
        }

        fn add_job(
            &self,
            name: &str,
            expression: &str,
            callback: JobCallback,
        ) -> Result<(), PipelineError> {
            if name == self.refuse && !self.refused.swap(true, Ordering::SeqCst) {
                return Err(PipelineError::SchedulerRunning);
            }
            self.inner.add_job(name, expression, callback)
        }

        fn start(&self) {
            self.inner.start();
        }

        async fn stop(&self) {
            self.inner.stop().await;
        }

        fn state(&self) -> SchedulerState {
            self.inner.state()
        }

        fn job_count(&self) -> usize {
            self.inner.job_count()
        }
    }

    #[tokio::test]
    async fn failed_start_does_not_duplicate_jobs_on_retry() {
        let registry = HandlerRegistry::new();
        registry
            .register("first", Sleepy { delay_ms: 0 }, [TriggerBinding::cron("@every 1s")])
            .unwrap();
        registry
            .register("second", Sleepy { delay_ms: 0 }, [TriggerBinding::cron("@every 1s")])
            .unwrap();
        let logger = Arc::new(CapturingLogger::default());
        let scheduler = Arc::new(RefusesOnce {
            inner: IntervalScheduler::new(logger),
            refuse: "second",
            refused: AtomicBool::new(false),
        });
        let trigger = CronTrigger::new(executor(registry), scheduler);

        let err = trigger.start().await.unwrap_err();
        assert!(format!("{err:#}").starts_with("handler second:"));
        assert_eq!(trigger.scheduler().job_count(), 1);
        assert_eq!(trigger.scheduler().state(), SchedulerState::Stopped);

        trigger.start().await.unwrap();
        assert_eq!(trigger.scheduler().job_count(), 2);
        trigger.stop().await;
    }

    /// Sleeps, then records that it ran to the end.
    struct FinishesLate {
        finished: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Handler for FinishesLate {
        async fn call(&self, _ctx: &mut RequestContext) -> HandlerResult {
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.finished.store(true, Ordering::SeqCst);
            Ok(Value::Null)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stop_waits_for_a_tick_already_running_under_the_default_chain() {
        let finished = Arc::new(AtomicBool::new(false));
        let registry = HandlerRegistry::new();
        registry
            .register(
                "report",
                FinishesLate {
                    finished: finished.clone(),
                },
                [TriggerBinding::cron("@every 50ms")],
            )
            .unwrap();
        let logger = Arc::new(CapturingLogger::default());
        let chain = build_default_chain(
            &FrameworkConfig::default(),
            Arc::new(TokenBucketLimiter::new(RateLimitConfig::default())),
            logger.clone(),
        );
        let trigger = CronTrigger::new(
            Executor::new(Arc::new(registry), chain),
            interval_scheduler(&logger),
        );

        trigger.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(70)).await;
        assert!(!finished.load(Ordering::SeqCst));

        trigger.stop().await;
        assert!(finished.load(Ordering::SeqCst));
        assert!(logger.messages("error").is_empty());
    }
}
