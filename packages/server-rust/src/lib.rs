//! Switchyard server: handler registry, middleware pipeline, executor,
//! scheduling primitives and trigger adapters.
//!
//! A process builds one [`HandlerRegistry`], wraps it in an [`Executor`]
//! with the global middleware chain, and hands that executor to every
//! trigger it runs.

pub mod network;
pub mod scheduling;
pub mod service;
pub mod telemetry;
pub mod trigger;

pub use network::{HttpConfig, HttpTrigger};
pub use scheduling::{CronScheduler, IntervalScheduler, JobScheduler, TokenBucketLimiter};
pub use service::{
    build_default_chain, handler_fn, Executor, FrameworkConfig, Handler, HandlerDefinition,
    HandlerRegistry, Middleware, MiddlewareChain,
};
pub use trigger::{CliTrigger, CronTrigger, Trigger, TriggerSet};
