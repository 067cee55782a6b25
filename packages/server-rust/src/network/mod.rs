//! HTTP trigger: configuration, transport layers, handlers and shutdown.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod server;
pub mod shutdown;

pub use config::HttpConfig;
pub use handlers::AppState;
pub use server::HttpTrigger;
pub use shutdown::{HealthState, InFlightGuard, ShutdownController};
