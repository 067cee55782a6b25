//! Recovery middleware: the guarded-call boundary for handler faults.
//!
//! Runs the rest of the chain inside `catch_unwind`. A panic anywhere below
//! this layer becomes `PipelineError::HandlerFault` carrying the panic
//! message instead of unwinding into the trigger adapter.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use switchyard_core::{EventLogger, HandlerResult, PipelineError, RequestContext};

use super::{Middleware, Next};

/// Converts uncaught faults into `HandlerFault` results and logs them.
#[derive(Clone)]
pub struct Recovery {
    logger: Arc<dyn EventLogger>,
}

impl Recovery {
    #[must_use]
    pub fn new(logger: Arc<dyn EventLogger>) -> Self {
        Self { logger }
    }
}

#[async_trait]
impl Middleware for Recovery {
    fn name(&self) -> &'static str {
        "recovery"
    }

    async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> HandlerResult {
        let handler = ctx.handler().to_owned();
        let request_id = ctx.request_id().to_string();

        match AssertUnwindSafe(next.run(ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                self.logger.error(
                    "recovered handler fault",
                    &[
                        ("handler", handler),
                        ("request_id", request_id),
                        ("fault", message.clone()),
                    ],
                );
                Err(PipelineError::HandlerFault { message })
            }
        }
    }
}

/// Extracts the human-readable message from a panic payload.
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
