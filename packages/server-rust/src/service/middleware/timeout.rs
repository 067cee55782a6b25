//! Timeout middleware for invocations.
//!
//! Bounds the rest of the chain by a deadline. An inherited deadline that is
//! already tighter wins. The rest of the chain runs on its own task with a
//! forked context, so a handler that blocks its thread still loses the race
//! against the deadline.
//!
//! When the deadline passes first, the narrowed cancellation token is
//! cancelled, the task is detached rather than aborted, and
//! `PipelineError::Timeout` is returned. Cancellation of the enclosing scope
//! is cooperative: it reaches the handler through the token and never cuts
//! the running path short.

use std::time::Duration;

use async_trait::async_trait;
use switchyard_core::{HandlerResult, PipelineError, RequestContext};
use tokio::time::Instant;
use tracing::Instrument;

use super::{Middleware, Next};

/// Enforces a per-invocation deadline around the inner chain.
#[derive(Debug, Clone, Copy)]
pub struct Timeout {
    limit: Duration,
}

impl Timeout {
    #[must_use]
    pub fn new(limit: Duration) -> Self {
        Self { limit }
    }

    #[must_use]
    pub fn limit(&self) -> Duration {
        self.limit
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[async_trait]
impl Middleware for Timeout {
    fn name(&self) -> &'static str {
        "timeout"
    }

    async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> HandlerResult {
        if ctx.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let scope = ctx.narrow(self.limit);
        let budget = scope.budget();
        let narrowed = ctx.cancellation().clone();
        let deadline = ctx.deadline().unwrap_or_else(|| Instant::now() + budget);

        let rest = next.into_owned();
        let forked = ctx.fork();
        let task = tokio::spawn(rest.run(forked).in_current_span());

        let result = match tokio::time::timeout_at(deadline, task).await {
            Ok(Ok((forked, result))) => {
                ctx.join(forked);
                result
            }
            // Re-raised here so an enclosing `Recovery` still sees the fault.
            Ok(Err(err)) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Ok(Err(_)) => Err(PipelineError::Cancelled),
            Err(_elapsed) => {
                narrowed.cancel();
                tracing::debug!(
                    handler = ctx.handler(),
                    timeout_ms = millis(budget),
                    "invocation deadline exceeded"
                );
                Err(PipelineError::Timeout {
                    timeout_ms: millis(budget),
                })
            }
        };

        ctx.restore(scope);
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use parking_lot::Mutex;
    use switchyard_core::{Payload, TriggerKind, Value};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::service::handler::handler_fn;
    use crate::service::middleware::test_support::{CapturingLogger, Faulty, Sleepy};
    use crate::service::middleware::{MiddlewareChain, Recovery};

    fn chain(limit_ms: u64) -> MiddlewareChain {
        MiddlewareChain::new().with(Timeout::new(Duration::from_millis(limit_ms)))
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_times_out_at_the_limit() {
        let chain = chain(50);
        let mut ctx = RequestContext::new(TriggerKind::Http, "slow");

        let start = Instant::now();
        let err = chain
            .run(Arc::new(Sleepy { delay_ms: 200 }), &mut ctx)
            .await
            .unwrap_err();
        let elapsed = start.elapsed();

        assert!(matches!(err, PipelineError::Timeout { timeout_ms: 50 }));
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(100));
        assert!(ctx.deadline().is_none());
        assert!(!ctx.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn fast_handler_result_is_unchanged() {
        let chain = chain(50);
        let mut ctx = RequestContext::new(TriggerKind::Http, "fast");
        let result = chain.run(Arc::new(Sleepy { delay_ms: 10 }), &mut ctx).await;
        assert_eq!(result.unwrap(), Value::from("done"));
    }

    #[tokio::test(start_paused = true)]
    async fn handler_writes_survive_the_task_boundary() {
        let handler = Arc::new(handler_fn(|ctx| {
            Box::pin(async move {
                ctx.set_meta("handled_by", "worker");
                Ok(ctx.payload_value("n").cloned().unwrap_or_default())
            })
        }));
        let mut payload = Payload::new();
        payload.insert("n".into(), Value::Int(3));
        let mut ctx = RequestContext::new(TriggerKind::Queue, "h").with_payload(payload);

        let result = chain(50).run(handler, &mut ctx).await.unwrap();

        assert_eq!(result, Value::Int(3));
        assert_eq!(ctx.meta_str("handled_by"), Some("worker"));
        assert_eq!(ctx.payload_value("n"), Some(&Value::Int(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn inherited_shorter_deadline_wins() {
        let chain = chain(1_000);
        let mut ctx =
            RequestContext::new(TriggerKind::Http, "h").with_timeout(Duration::from_millis(20));
        let inherited = ctx.deadline();

        let err = chain
            .run(Arc::new(Sleepy { delay_ms: 100 }), &mut ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Timeout { timeout_ms: 20 }));
        assert_eq!(ctx.deadline(), inherited);
    }

    #[tokio::test(start_paused = true)]
    async fn parent_cancellation_does_not_interrupt_the_handler() {
        let parent = CancellationToken::new();
        let mut ctx = RequestContext::new(TriggerKind::Cron, "h").with_cancellation(&parent);

        let canceller = parent.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let result = chain(1_000)
            .run(Arc::new(Sleepy { delay_ms: 100 }), &mut ctx)
            .await;
        assert_eq!(result.unwrap(), Value::from("done"));
    }

    #[tokio::test(start_paused = true)]
    async fn cooperative_handler_observes_parent_cancellation() {
        let parent = CancellationToken::new();
        let handler = Arc::new(handler_fn(|ctx| {
            Box::pin(async move {
                ctx.cancelled().await;
                Ok(Value::from("wound down"))
            })
        }));
        let mut ctx = RequestContext::new(TriggerKind::Cron, "h").with_cancellation(&parent);

        let canceller = parent.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let result = chain(1_000).run(handler, &mut ctx).await;
        assert_eq!(result.unwrap(), Value::from("wound down"));
    }

    #[tokio::test]
    async fn already_cancelled_context_skips_the_handler() {
        let parent = CancellationToken::new();
        parent.cancel();
        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();
        let handler = Arc::new(handler_fn(move |_ctx| {
            flag.store(true, Ordering::SeqCst);
            Box::pin(async { Ok(Value::Null) })
        }));

        let mut ctx = RequestContext::new(TriggerKind::Http, "h").with_cancellation(&parent);
        let err = chain(50).run(handler.clone(), &mut ctx).await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
        assert!(!called.load(Ordering::SeqCst));
    }

    // The abandoned path is not killed: it runs to completion on its own
    // task while the token it observes reports cancellation.
    #[tokio::test(start_paused = true)]
    async fn timed_out_path_keeps_running_with_its_token_cancelled() {
        let finished = Arc::new(AtomicBool::new(false));
        let seen_token: Arc<Mutex<Option<CancellationToken>>> = Arc::new(Mutex::new(None));

        let handler = {
            let finished = finished.clone();
            let seen_token = seen_token.clone();
            Arc::new(handler_fn(move |ctx| {
                *seen_token.lock() = Some(ctx.cancellation().clone());
                let finished = finished.clone();
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    finished.store(true, Ordering::SeqCst);
                    Ok(Value::from("late"))
                })
            }))
        };

        let mut ctx = RequestContext::new(TriggerKind::Http, "h");
        let err = chain(30).run(handler, &mut ctx).await.unwrap_err();
        assert!(matches!(err, PipelineError::Timeout { timeout_ms: 30 }));

        let token = seen_token.lock().clone().unwrap();
        assert!(token.is_cancelled());
        assert!(!ctx.is_cancelled());
        assert!(!finished.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn blocking_handler_still_times_out() {
        let handler = Arc::new(handler_fn(|_ctx| {
            Box::pin(async {
                std::thread::sleep(Duration::from_millis(200));
                Ok(Value::from("late"))
            })
        }));
        let mut ctx = RequestContext::new(TriggerKind::Http, "h");

        let started = std::time::Instant::now();
        let err = chain(50).run(handler, &mut ctx).await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, PipelineError::Timeout { timeout_ms: 50 }));
        assert!(elapsed < Duration::from_millis(150), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn fault_below_the_deadline_reaches_recovery() {
        let chain = MiddlewareChain::new()
            .with(Recovery::new(Arc::new(CapturingLogger::default())))
            .with(Timeout::new(Duration::from_millis(500)));
        let mut ctx = RequestContext::new(TriggerKind::Http, "h");

        let err = chain.run(Arc::new(Faulty), &mut ctx).await.unwrap_err();
        assert!(
            matches!(err, PipelineError::HandlerFault { ref message } if message == "index out of range")
        );
    }
}
