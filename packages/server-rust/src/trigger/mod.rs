//! Trigger adapters: event sources that turn external events into
//! invocations.
//!
//! - [`CronTrigger`]: scheduled jobs for cron-bound handlers
//! - [`CliTrigger`]: one-shot command-line invocation
//! - [`HttpTrigger`](crate::network::HttpTrigger): the axum server
//!
//! Every adapter builds a [`RequestContext`](switchyard_core::RequestContext)
//! per unit of work and hands it to the executor's supervised path, so a
//! faulting handler never takes the adapter down with it.

pub mod cli;
pub mod cron;

use std::sync::Arc;

use async_trait::async_trait;
use switchyard_core::TriggerKind;
use tracing::{error, info};

pub use cli::{CliOutput, CliTrigger};
pub use cron::CronTrigger;

/// Lifecycle of an event source.
#[async_trait]
pub trait Trigger: Send + Sync {
    fn kind(&self) -> TriggerKind;

    /// Begins accepting events.
    ///
    /// # Errors
    ///
    /// Returns an error when the trigger cannot be wired up (bad binding,
    /// port in use, ...).
    async fn start(&self) -> anyhow::Result<()>;

    /// Stops accepting events and waits for in-flight work. Idempotent.
    async fn stop(&self);
}

/// Starts a group of triggers together and stops them in reverse order.
#[derive(Default)]
pub struct TriggerSet {
    triggers: Vec<Arc<dyn Trigger>>,
}

impl TriggerSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, trigger: Arc<dyn Trigger>) -> Self {
        self.triggers.push(trigger);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// Starts every trigger in order.
    ///
    /// # Errors
    ///
    /// On the first failure the triggers already started are stopped again
    /// and the error is returned.
    pub async fn start_all(&self) -> anyhow::Result<()> {
        for (index, trigger) in self.triggers.iter().enumerate() {
            if let Err(err) = trigger.start().await {
                error!(trigger = %trigger.kind(), error = %err, "trigger failed to start");
                for started in self.triggers[..index].iter().rev() {
                    started.stop().await;
                }
                return Err(err);
            }
            info!(trigger = %trigger.kind(), "trigger started");
        }
        Ok(())
    }

    /// Stops every trigger, last started first.
    pub async fn stop_all(&self) {
        for trigger in self.triggers.iter().rev() {
            trigger.stop().await;
            info!(trigger = %trigger.kind(), "trigger stopped");
        }
    }
}
