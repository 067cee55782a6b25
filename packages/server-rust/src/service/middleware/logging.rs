//! Logging middleware for invocations.
//!
//! Times every invocation, logs its completion or failure with the request id
//! and records invocation counters and durations via the `metrics` facade.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use switchyard_core::{EventLogger, HandlerResult, Outcome, RequestContext};
use tracing::{info_span, Instrument};

use super::{Middleware, Next};

/// Records start time, always calls `next`, never alters the outcome.
#[derive(Clone)]
pub struct Logging {
    logger: Arc<dyn EventLogger>,
}

impl Logging {
    #[must_use]
    pub fn new(logger: Arc<dyn EventLogger>) -> Self {
        Self { logger }
    }
}

#[async_trait]
impl Middleware for Logging {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> HandlerResult {
        let handler = ctx.handler().to_owned();
        let request_id = ctx.request_id().to_string();
        let trigger = ctx.trigger().as_str();

        let span = info_span!(
            "invocation",
            handler = %handler,
            request_id = %request_id,
            trigger = trigger,
        );

        let start = Instant::now();
        let result = next.run(ctx).instrument(span).await;
        let elapsed = start.elapsed();

        let outcome = Outcome::of(&result);
        metrics::counter!(
            "switchyard_invocations_total",
            "handler" => handler.clone(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
        metrics::histogram!(
            "switchyard_invocation_duration_seconds",
            "handler" => handler.clone()
        )
        .record(elapsed.as_secs_f64());

        let mut fields = vec![
            ("handler", handler),
            ("request_id", request_id),
            ("trigger", trigger.to_string()),
            ("duration_ms", elapsed.as_millis().to_string()),
            ("outcome", outcome.as_str().to_string()),
        ];
        match &result {
            Ok(_) => self.logger.info("invocation complete", &fields),
            Err(err) => {
                fields.push(("error", err.to_string()));
                self.logger.error("invocation failed", &fields);
            }
        }

        result
    }
}
