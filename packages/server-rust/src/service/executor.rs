//! Binds a handler, its middleware chain and a context into one invocation.

use std::sync::Arc;

use switchyard_core::{HandlerResult, Metadata, Outcome, PipelineError, RequestContext};
use uuid::Uuid;

use super::handler::HandlerDefinition;
use super::middleware::recovery::panic_message;
use super::middleware::MiddlewareChain;
use super::registry::HandlerRegistry;

// ---------------------------------------------------------------------------
// Invocation
// ---------------------------------------------------------------------------

/// The result of a supervised invocation, with the context metadata the
/// chain left behind (CORS policy, rate-limit identifier, ...).
#[derive(Debug)]
pub struct Invocation {
    pub request_id: Uuid,
    pub metadata: Metadata,
    pub result: HandlerResult,
}

impl Invocation {
    #[must_use]
    pub fn outcome(&self) -> Outcome {
        Outcome::of(&self.result)
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Runs handler definitions through the global middleware chain.
///
/// The global chain wraps every invocation; a definition's own middleware
/// runs inside it, closest to the handler.
#[derive(Clone)]
pub struct Executor {
    registry: Arc<HandlerRegistry>,
    chain: MiddlewareChain,
}

impl Executor {
    #[must_use]
    pub fn new(registry: Arc<HandlerRegistry>, chain: MiddlewareChain) -> Self {
        Self { registry, chain }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn chain(&self) -> &MiddlewareChain {
        &self.chain
    }

    /// Runs `definition` through the chain on the caller's task.
    ///
    /// The handler is called at most once. A panic is converted into
    /// `HandlerFault` only if a `Recovery` layer is in the chain; otherwise
    /// it unwinds into the caller.
    pub async fn execute(
        &self,
        definition: &HandlerDefinition,
        ctx: &mut RequestContext,
    ) -> HandlerResult {
        if ctx.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let chain = self.chain.extended(definition.middleware());
        chain.run(Arc::clone(definition.handler()), ctx).await
    }

    /// Looks `name` up in the registry and executes it.
    pub async fn dispatch(&self, name: &str, ctx: &mut RequestContext) -> HandlerResult {
        let definition = self.registry.lookup(name)?;
        self.execute(&definition, ctx).await
    }

    /// Runs the invocation on its own task so that a fault is contained even
    /// without `Recovery` in the chain.
    ///
    /// Metadata is lost when the task panics, since the context unwinds with it.
    pub async fn execute_supervised(
        &self,
        definition: Arc<HandlerDefinition>,
        ctx: RequestContext,
    ) -> Invocation {
        let request_id = ctx.request_id();
        let handler = definition.name().to_string();
        let chain = self.chain.extended(definition.middleware());

        let task = tokio::spawn(async move {
            let mut ctx = ctx;
            let result = if ctx.is_cancelled() {
                Err(PipelineError::Cancelled)
            } else {
                chain.run(Arc::clone(definition.handler()), &mut ctx).await
            };
            (ctx.metadata, result)
        });

        match task.await {
            Ok((metadata, result)) => Invocation {
                request_id,
                metadata,
                result,
            },
            Err(err) if err.is_panic() => {
                let message = panic_message(err.into_panic().as_ref());
                tracing::error!(
                    handler = %handler,
                    request_id = %request_id,
                    fault = %message,
                    "supervised invocation panicked"
                );
                Invocation {
                    request_id,
                    metadata: Metadata::new(),
                    result: Err(PipelineError::HandlerFault { message }),
                }
            }
            Err(_) => Invocation {
                request_id,
                metadata: Metadata::new(),
                result: Err(PipelineError::Cancelled),
            },
        }
    }

    /// Looks `name` up and runs it supervised.
    pub async fn dispatch_supervised(&self, name: &str, ctx: RequestContext) -> Invocation {
        match self.registry.lookup(name) {
            Ok(definition) => self.execute_supervised(definition, ctx).await,
            Err(err) => Invocation {
                request_id: ctx.request_id(),
                metadata: ctx.metadata,
                result: Err(err),
            },
        }
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("registry", &self.registry)
            .field("chain", &self.chain.names())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
