//! Chain composition: an ordered list of middleware wrapped around a handler.

use std::sync::Arc;
use std::time::Duration;

use switchyard_core::{EventLogger, HandlerResult, RequestContext};

use super::cors::Cors;
use super::load_shed::LoadShed;
use super::logging::Logging;
use super::rate_limit::RateLimit;
use super::recovery::Recovery;
use super::timeout::Timeout;
use super::{Middleware, Next};
use crate::scheduling::TokenBucketLimiter;
use crate::service::config::FrameworkConfig;
use crate::service::handler::Handler;

/// Immutable, cheaply clonable sequence of middleware.
///
/// Given `[m1, m2, m3]` and handler `H`, [`run`](Self::run) evaluates
/// `m1(ctx, || m2(ctx, || m3(ctx, || H(ctx))))`.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    layers: Arc<[Arc<dyn Middleware>]>,
}

impl MiddlewareChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a chain with `middleware` appended as the innermost layer.
    #[must_use]
    pub fn with(self, middleware: impl Middleware) -> Self {
        self.with_arc(Arc::new(middleware))
    }

    #[must_use]
    pub fn with_arc(self, middleware: Arc<dyn Middleware>) -> Self {
        let mut layers = self.layers.to_vec();
        layers.push(middleware);
        Self {
            layers: layers.into(),
        }
    }

    /// Returns a chain running `self` first, then `extra` closer to the handler.
    #[must_use]
    pub fn extended(&self, extra: &[Arc<dyn Middleware>]) -> Self {
        if extra.is_empty() {
            return self.clone();
        }
        let layers: Vec<_> = self.layers.iter().chain(extra).cloned().collect();
        Self {
            layers: layers.into(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Layer names from outermost to innermost.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.layers.iter().map(|m| m.name()).collect()
    }

    /// Runs `handler` wrapped in every layer of the chain.
    pub async fn run(&self, handler: Arc<dyn Handler>, ctx: &mut RequestContext) -> HandlerResult {
        Next::new(&self.layers, &handler).run(ctx).await
    }
}

/// Builds the default global chain from the framework configuration.
///
/// Layer order (outermost to innermost):
/// 1. `Logging` -- sees every outcome, including faults recovered below it
/// 2. `Recovery` -- converts panics anywhere further in into `HandlerFault`
/// 3. `Cors` -- publish the CORS policy, so shed responses carry it too
/// 4. `LoadShed` -- reject when overloaded before doing any work
/// 5. `RateLimit` -- per-client admission
/// 6. `Timeout` -- deadline around the handler itself
#[must_use]
pub fn build_default_chain(
    config: &FrameworkConfig,
    limiter: Arc<TokenBucketLimiter>,
    logger: Arc<dyn EventLogger>,
) -> MiddlewareChain {
    MiddlewareChain::new()
        .with(Logging::new(logger.clone()))
        .with(Recovery::new(logger))
        .with(Cors::new(config.cors.clone()))
        .with(LoadShed::new(config.max_concurrent_invocations))
        .with(RateLimit::new(limiter))
        .with(Timeout::new(Duration::from_millis(config.default_timeout_ms)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
