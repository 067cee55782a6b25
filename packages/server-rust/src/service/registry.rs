use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use switchyard_core::{PipelineError, TriggerBinding, TriggerKind};

use super::handler::{Handler, HandlerDefinition};

// ---------------------------------------------------------------------------
// HandlerRegistry
// ---------------------------------------------------------------------------

/// Concurrent store of handler definitions keyed by unique name.
///
/// Provides two views:
/// - **By name** (`lookup`): O(1) lookup for dispatch
/// - **By trigger** (`list_by_trigger`): registration order, used by trigger
///   adapters to wire up bindings at startup
///
/// Registration is write-once per name. A duplicate name is rejected and the
/// original definition stays in place.
pub struct HandlerRegistry {
    by_name: DashMap<String, Arc<HandlerDefinition>>,
    order: RwLock<Vec<Arc<HandlerDefinition>>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_name: DashMap::new(),
            order: RwLock::new(Vec::new()),
        }
    }

    /// Registers a handler under `name` with the given trigger bindings.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::DuplicateName` if `name` is already taken.
    pub fn register(
        &self,
        name: impl Into<String>,
        handler: impl Handler,
        triggers: impl IntoIterator<Item = TriggerBinding>,
    ) -> Result<Arc<HandlerDefinition>, PipelineError> {
        self.register_definition(HandlerDefinition::new(name, handler).with_triggers(triggers))
    }

    /// Registers a fully built definition.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::DuplicateName` if the definition's name is
    /// already taken.
    pub fn register_definition(
        &self,
        definition: HandlerDefinition,
    ) -> Result<Arc<HandlerDefinition>, PipelineError> {
        let name = definition.name().to_string();
        match self.by_name.entry(name) {
            Entry::Occupied(entry) => Err(PipelineError::DuplicateName {
                name: entry.key().clone(),
            }),
            Entry::Vacant(entry) => {
                let definition = Arc::new(definition);
                // Order is appended while the shard lock is held, so two
                // racing registrations of distinct names both land in it.
                self.order.write().push(Arc::clone(&definition));
                entry.insert(Arc::clone(&definition));
                tracing::debug!(handler = definition.name(), "handler registered");
                Ok(definition)
            }
        }
    }

    /// Looks up a handler by name.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::NotFound` if no handler has that name.
    pub fn lookup(&self, name: &str) -> Result<Arc<HandlerDefinition>, PipelineError> {
        self.by_name
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| PipelineError::not_found(name))
    }

    /// Every handler with at least one binding of `kind`, in registration order.
    #[must_use]
    pub fn list_by_trigger(&self, kind: TriggerKind) -> Vec<Arc<HandlerDefinition>> {
        self.order
            .read()
            .iter()
            .filter(|definition| definition.binds(kind))
            .cloned()
            .collect()
    }

    /// All handler definitions in registration order.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<HandlerDefinition>> {
        self.order.read().clone()
    }

    /// Registered names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.order
            .read()
            .iter()
            .map(|definition| definition.name().to_string())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use switchyard_core::{RequestContext, Value};

    use super::*;
    use crate::service::handler::handler_fn;

    fn constant(reply: &'static str) -> impl Handler {
        handler_fn(move |_ctx| Box::pin(async move { Ok(Value::from(reply)) }))
    }

    #[test]
    fn register_and_lookup() {
        let registry = HandlerRegistry::new();
        registry
            .register("echo", constant("a"), [TriggerBinding::http("POST", "/echo")])
            .unwrap();

        let definition = registry.lookup("echo").unwrap();
        assert_eq!(definition.name(), "echo");
        assert_eq!(registry.len(), 1);
        assert!(!registry.is_empty());
    }

    #[tokio::test]
    async fn duplicate_name_keeps_original() {
        let registry = HandlerRegistry::new();
        registry.register("job", constant("first"), []).unwrap();
        let err = registry.register("job", constant("second"), []).unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateName { ref name } if name == "job"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.names(), vec!["job"]);

        let definition = registry.lookup("job").unwrap();
        let mut ctx = RequestContext::new(TriggerKind::Cli, "job");
        let result = definition.handler().call(&mut ctx).await.unwrap();
        assert_eq!(result, Value::from("first"));
    }

    #[test]
    fn lookup_missing_is_not_found() {
        let registry = HandlerRegistry::new();
        let err = registry.lookup("ghost").unwrap_err();
        assert!(matches!(err, PipelineError::NotFound { ref name } if name == "ghost"));
    }

    #[test]
    fn list_by_trigger_preserves_registration_order() {
        let registry = HandlerRegistry::new();
        registry
            .register("b", constant("b"), [TriggerBinding::cron("@every 1m")])
            .unwrap();
        registry
            .register("a", constant("a"), [TriggerBinding::http("GET", "/a")])
            .unwrap();
        registry
            .register(
                "c",
                constant("c"),
                [
                    TriggerBinding::http("GET", "/c"),
                    TriggerBinding::cron("@hourly"),
                ],
            )
            .unwrap();

        let cron: Vec<_> = registry
            .list_by_trigger(TriggerKind::Cron)
            .iter()
            .map(|d| d.name().to_string())
            .collect();
        assert_eq!(cron, vec!["b", "c"]);

        let http: Vec<_> = registry
            .list_by_trigger(TriggerKind::Http)
            .iter()
            .map(|d| d.name().to_string())
            .collect();
        assert_eq!(http, vec!["a", "c"]);

        assert!(registry.list_by_trigger(TriggerKind::Queue).is_empty());
    }

    #[test]
    fn concurrent_registration_of_one_name_admits_exactly_one() {
        let registry = Arc::new(HandlerRegistry::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.register("race", constant("x"), []).is_ok())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(registry.all().len(), 1);
    }
}
