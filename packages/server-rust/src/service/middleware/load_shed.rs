//! Load-shedding middleware for invocations.
//!
//! Rejects invocations when the number in flight reaches
//! `max_concurrent_invocations`, returning `PipelineError::Overloaded`
//! immediately instead of queueing.

use std::sync::Arc;

use async_trait::async_trait;
use switchyard_core::{HandlerResult, PipelineError, RequestContext};
use tokio::sync::Semaphore;

use super::{Middleware, Next};

/// Limits concurrent invocations via a semaphore.
///
/// Clones share the same permit pool.
#[derive(Debug, Clone)]
pub struct LoadShed {
    semaphore: Arc<Semaphore>,
}

impl LoadShed {
    #[must_use]
    pub fn new(max_concurrent: u32) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent as usize)),
        }
    }

    /// Permits currently free.
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[async_trait]
impl Middleware for LoadShed {
    fn name(&self) -> &'static str {
        "load_shed"
    }

    async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> HandlerResult {
        let Ok(_permit) = self.semaphore.clone().try_acquire_owned() else {
            metrics::counter!("switchyard_invocations_shed_total").increment(1);
            return Err(PipelineError::Overloaded);
        };
        next.run(ctx).await
    }
}
