//! Middleware for the invocation pipeline.
//!
//! A middleware receives the context and a [`Next`] handle to the rest of the
//! chain. Layers run in registration order on the way in and in reverse order
//! on the way out; a layer short-circuits by returning without calling
//! [`Next::run`].
//!
//! - [`cors`]: publishes CORS policy as context metadata
//! - [`logging`]: timing, structured logs and invocation metrics
//! - [`recovery`]: converts handler panics into `HandlerFault`
//! - [`rate_limit`]: token-bucket admission per client
//! - [`timeout`]: per-invocation deadline enforcement
//! - [`load_shed`]: semaphore-based concurrency limiting
//! - [`pipeline`]: the ordered chain and its default composition

pub mod cors;
pub mod load_shed;
pub mod logging;
pub mod pipeline;
pub mod rate_limit;
pub mod recovery;
pub mod timeout;

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use switchyard_core::{HandlerResult, RequestContext};

use super::handler::Handler;

pub use cors::{Cors, CorsConfig};
pub use load_shed::LoadShed;
pub use logging::Logging;
pub use pipeline::{build_default_chain, MiddlewareChain};
pub use rate_limit::RateLimit;
pub use recovery::Recovery;
pub use timeout::Timeout;

// ---------------------------------------------------------------------------
// Middleware trait
// ---------------------------------------------------------------------------

/// A composable wrapper around handler invocation.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str {
        "custom"
    }

    async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> HandlerResult;
}

// ---------------------------------------------------------------------------
// Next
// ---------------------------------------------------------------------------

/// The remainder of the chain below the current middleware.
///
/// `Next` is consumed by [`run`](Self::run) and is neither `Clone` nor
/// `Copy`, so each layer can invoke the rest of the chain at most once.
pub struct Next<'a> {
    layers: &'a Arc<[Arc<dyn Middleware>]>,
    position: usize,
    handler: &'a Arc<dyn Handler>,
}

impl<'a> Next<'a> {
    pub(crate) fn new(
        layers: &'a Arc<[Arc<dyn Middleware>]>,
        handler: &'a Arc<dyn Handler>,
    ) -> Self {
        Self {
            layers,
            position: 0,
            handler,
        }
    }

    /// Runs the next middleware, or the handler once the chain is exhausted.
    pub fn run<'c>(self, ctx: &'c mut RequestContext) -> BoxFuture<'c, HandlerResult>
    where
        'a: 'c,
    {
        match self.layers.get(self.position) {
            Some(current) => current.handle(
                ctx,
                Next {
                    layers: self.layers,
                    position: self.position + 1,
                    handler: self.handler,
                },
            ),
            None => self.handler.call(ctx),
        }
    }

    /// Detaches the rest of the chain so it can run on another task.
    #[must_use]
    pub fn into_owned(self) -> OwnedNext {
        OwnedNext {
            layers: Arc::clone(self.layers),
            position: self.position,
            handler: Arc::clone(self.handler),
        }
    }
}

/// The rest of a chain, detached from the borrow of the calling layer.
pub struct OwnedNext {
    layers: Arc<[Arc<dyn Middleware>]>,
    position: usize,
    handler: Arc<dyn Handler>,
}

impl OwnedNext {
    /// Runs the rest of the chain on an owned context and hands the context
    /// back with the result.
    pub async fn run(self, mut ctx: RequestContext) -> (RequestContext, HandlerResult) {
        let next = Next {
            layers: &self.layers,
            position: self.position,
            handler: &self.handler,
        };
        let result = next.run(&mut ctx).await;
        (ctx, result)
    }
}

// ---------------------------------------------------------------------------
// Closure middleware
// ---------------------------------------------------------------------------

/// Adapter returned by [`middleware_fn`].
pub struct MiddlewareFn<F>(F);

/// Turns a closure into a [`Middleware`].
pub fn middleware_fn<F>(f: F) -> MiddlewareFn<F>
where
    F: for<'a> Fn(&'a mut RequestContext, Next<'a>) -> BoxFuture<'a, HandlerResult>
        + Send
        + Sync
        + 'static,
{
    MiddlewareFn(f)
}

#[async_trait]
impl<F> Middleware for MiddlewareFn<F>
where
    F: for<'a> Fn(&'a mut RequestContext, Next<'a>) -> BoxFuture<'a, HandlerResult>
        + Send
        + Sync
        + 'static,
{
    async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> HandlerResult {
        (self.0)(ctx, next).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------


#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use switchyard_core::{PipelineError, TriggerKind, Value};

    use super::test_support::{Recording, Tracer};
    use super::*;

    fn recording(trace: &test_support::Trace) -> Arc<dyn Handler> {
        Arc::new(Recording {
            trace: trace.clone(),
        })
    }

    #[tokio::test]
    async fn closure_middleware_can_short_circuit() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let gate: Arc<dyn Middleware> = Arc::new(middleware_fn(|ctx, next| {
            Box::pin(async move {
                if ctx.meta_str("user_id").is_none() {
                    return Ok(Value::from("denied"));
                }
                next.run(ctx).await
            })
        }));
        let layers: Arc<[Arc<dyn Middleware>]> = vec![gate].into();
        let handler = recording(&trace);

        let mut ctx = RequestContext::new(TriggerKind::Http, "h");
        let result = Next::new(&layers, &handler).run(&mut ctx).await.unwrap();
        assert_eq!(result, Value::from("denied"));
        assert!(trace.lock().is_empty());

        ctx.set_meta("user_id", "u-1");
        let result = Next::new(&layers, &handler).run(&mut ctx).await.unwrap();
        assert_eq!(result, Value::from("ok"));
        assert_eq!(*trace.lock(), vec!["handler"]);
    }

    #[tokio::test]
    async fn next_without_middleware_calls_handler() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let handler = recording(&trace);
        let layers: Arc<[Arc<dyn Middleware>]> = Arc::new([]);
        let mut ctx = RequestContext::new(TriggerKind::Cli, "h");
        Next::new(&layers, &handler).run(&mut ctx).await.unwrap();
        assert_eq!(trace.lock().len(), 1);
    }

    #[tokio::test]
    async fn layers_nest_in_stack_order() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let layers: Arc<[Arc<dyn Middleware>]> = vec![
            Arc::new(Tracer {
                label: "outer",
                trace: trace.clone(),
            }) as Arc<dyn Middleware>,
            Arc::new(Tracer {
                label: "inner",
                trace: trace.clone(),
            }),
        ]
        .into();
        let handler = recording(&trace);
        let mut ctx = RequestContext::new(TriggerKind::Http, "h");
        Next::new(&layers, &handler).run(&mut ctx).await.unwrap();
        assert_eq!(
            *trace.lock(),
            vec!["enter:outer", "enter:inner", "handler", "exit:inner", "exit:outer"]
        );
    }

    /// Runs the rest of the chain on a spawned task.
    struct Detach;

    #[async_trait]
    impl Middleware for Detach {
        async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> HandlerResult {
            let forked = ctx.fork();
            let (forked, result) = tokio::spawn(next.into_owned().run(forked))
                .await
                .map_err(|err| PipelineError::HandlerFault {
                    message: err.to_string(),
                })?;
            ctx.join(forked);
            result
        }
    }

    #[tokio::test]
    async fn owned_remainder_resumes_below_the_detaching_layer() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let layers: Arc<[Arc<dyn Middleware>]> = vec![
            Arc::new(Tracer {
                label: "outer",
                trace: trace.clone(),
            }) as Arc<dyn Middleware>,
            Arc::new(Detach),
            Arc::new(middleware_fn(|ctx, next| {
                Box::pin(async move {
                    ctx.set_meta("spawned", true);
                    next.run(ctx).await
                })
            })),
            Arc::new(Tracer {
                label: "inner",
                trace: trace.clone(),
            }),
        ]
        .into();
        let handler = recording(&trace);
        let mut ctx = RequestContext::new(TriggerKind::Http, "h");

        let result = Next::new(&layers, &handler).run(&mut ctx).await.unwrap();
        assert_eq!(result, Value::from("ok"));
        assert_eq!(
            *trace.lock(),
            vec!["enter:outer", "enter:inner", "handler", "exit:inner", "exit:outer"]
        );
        assert_eq!(ctx.meta("spawned"), Some(&Value::Bool(true)));
    }
}
