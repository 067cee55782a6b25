//! Axum handlers for the HTTP trigger.
//!
//! `AppState` is the shared state carried through axum extractors; the
//! handler functions are re-exported for router assembly.

pub mod health;
pub mod invoke;

pub use health::{health_handler, liveness_handler, readiness_handler};
pub use invoke::{dispatch, invocation_response, invoke_handler, status_for};

use std::sync::Arc;
use std::time::Instant;

use super::{HttpConfig, ShutdownController};
use crate::service::Executor;

/// Shared application state passed to all axum handlers via `State` extraction.
///
/// Everything inside is reference counted, so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Runs invocations through the global middleware chain.
    pub executor: Executor,
    pub shutdown: Arc<ShutdownController>,
    pub config: Arc<HttpConfig>,
    /// Used for uptime reporting.
    pub start_time: Instant,
}
