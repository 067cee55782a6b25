//! Handler execution framework.
//!
//! This module implements the trigger-independent invocation pipeline:
//!
//! 1. **Handlers** (`handler`): business logic plus its trigger bindings
//! 2. **Registry** (`registry`): name-keyed store of handler definitions
//! 3. **Middleware** (`middleware`): ordered chain wrapped around every call
//! 4. **Executor** (`executor`): binds definition, chain and context
//! 5. **Configuration** (`config`): defaults for the chain and transports

pub mod config;
pub mod executor;
pub mod handler;
pub mod middleware;
pub mod registry;

// Re-export key types for convenient access.
pub use config::FrameworkConfig;
pub use executor::{Executor, Invocation};
pub use handler::{handler_fn, Handler, HandlerDefinition, HandlerFn};
pub use middleware::{
    build_default_chain, middleware_fn, Middleware, MiddlewareChain, Next, OwnedNext,
};
pub use registry::HandlerRegistry;
