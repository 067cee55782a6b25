//! Handlers and the definitions that register them.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use switchyard_core::{HandlerResult, RequestContext, TriggerBinding, TriggerKind};

use super::middleware::Middleware;

// ---------------------------------------------------------------------------
// Handler trait
// ---------------------------------------------------------------------------

/// A unit of business logic, invoked the same way regardless of trigger.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn call(&self, ctx: &mut RequestContext) -> HandlerResult;
}

/// Adapter returned by [`handler_fn`].
pub struct HandlerFn<F>(F);

/// Turns a closure into a [`Handler`].
///
/// ```ignore
/// let echo = handler_fn(|ctx| Box::pin(async move {
///     Ok(Value::from(ctx.payload.clone()))
/// }));
/// ```
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    HandlerFn(f)
}

#[async_trait]
impl<F> Handler for HandlerFn<F>
where
    F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    async fn call(&self, ctx: &mut RequestContext) -> HandlerResult {
        (self.0)(ctx).await
    }
}

// ---------------------------------------------------------------------------
// HandlerDefinition
// ---------------------------------------------------------------------------

/// A named handler together with its trigger bindings and per-handler
/// middleware.
///
/// Definitions are immutable once registered; the registry hands them out as
/// `Arc<HandlerDefinition>`.
pub struct HandlerDefinition {
    name: String,
    handler: Arc<dyn Handler>,
    triggers: Vec<TriggerBinding>,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl HandlerDefinition {
    pub fn new(name: impl Into<String>, handler: impl Handler) -> Self {
        Self::from_arc(name, Arc::new(handler))
    }

    pub fn from_arc(name: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        Self {
            name: name.into(),
            handler,
            triggers: Vec::new(),
            middleware: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_trigger(mut self, binding: TriggerBinding) -> Self {
        self.triggers.push(binding);
        self
    }

    #[must_use]
    pub fn with_triggers(mut self, bindings: impl IntoIterator<Item = TriggerBinding>) -> Self {
        self.triggers.extend(bindings);
        self
    }

    /// Appends middleware that runs inside the global chain, for this handler only.
    #[must_use]
    pub fn with_middleware(mut self, middleware: impl Middleware) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    #[must_use]
    pub fn triggers(&self) -> &[TriggerBinding] {
        &self.triggers
    }

    #[must_use]
    pub fn middleware(&self) -> &[Arc<dyn Middleware>] {
        &self.middleware
    }

    /// Whether any binding targets the given trigger kind.
    #[must_use]
    pub fn binds(&self, kind: TriggerKind) -> bool {
        self.triggers.iter().any(|binding| binding.kind() == kind)
    }
}

impl fmt::Debug for HandlerDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDefinition")
            .field("name", &self.name)
            .field("triggers", &self.triggers)
            .field("middleware", &self.middleware.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use switchyard_core::Value;

    use super::*;

    #[tokio::test]
    async fn handler_fn_reads_and_writes_context() {
        let handler = handler_fn(|ctx| {
            Box::pin(async move {
                ctx.set_meta("seen", true);
                Ok(Value::from(ctx.handler().to_string()))
            })
        });

        let mut ctx = RequestContext::new(TriggerKind::Cli, "greet");
        let value = handler.call(&mut ctx).await.unwrap();
        assert_eq!(value, Value::from("greet"));
        assert_eq!(ctx.meta("seen"), Some(&Value::Bool(true)));
    }

    #[test]
    fn definition_records_bindings() {
        let def = HandlerDefinition::new(
            "report",
            handler_fn(|_ctx| Box::pin(async { Ok(Value::Null) })),
        )
        .with_trigger(TriggerBinding::cron("@daily"))
        .with_trigger(TriggerBinding::http("POST", "/report"));

        assert_eq!(def.name(), "report");
        assert_eq!(def.triggers().len(), 2);
        assert!(def.binds(TriggerKind::Cron));
        assert!(def.binds(TriggerKind::Http));
        assert!(!def.binds(TriggerKind::Queue));
        assert!(def.middleware().is_empty());
    }
}
