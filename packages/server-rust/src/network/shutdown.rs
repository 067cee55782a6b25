//! Graceful shutdown controller with in-flight request tracking.
//!
//! Health state lives in an `ArcSwap` so health checks read it without locking.
//! In-flight requests are counted by RAII guards; the guard that brings the
//! count to zero wakes any task waiting for the drain.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Health state of the HTTP trigger.
///
/// State machine: Starting -> Ready -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Listener not yet accepting connections.
    Starting,
    Ready,
    /// Shutdown requested; in-flight requests are finishing.
    Draining,
    Stopped,
}

impl HealthState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Default)]
struct InFlight {
    count: AtomicU64,
    drained: Notify,
}

/// Coordinates shutdown of the HTTP trigger.
///
/// 1. Health checks read `health_state()`
/// 2. Request handlers hold an `InFlightGuard` and reject work once draining
/// 3. `trigger_shutdown()` moves to Draining and cancels `token()`, which
///    stops the accept loop
/// 4. `wait_for_drain()` waits until in-flight requests complete
/// 5. `cancel_invocations()` signals invocations still running after the
///    drain window
#[derive(Debug)]
pub struct ShutdownController {
    token: CancellationToken,
    invocations: CancellationToken,
    in_flight: Arc<InFlight>,
    health_state: ArcSwap<HealthState>,
}

impl ShutdownController {
    /// Creates a controller in the `Starting` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            invocations: CancellationToken::new(),
            in_flight: Arc::new(InFlight::default()),
            health_state: ArcSwap::from_pointee(HealthState::Starting),
        }
    }

    pub fn set_ready(&self) {
        self.health_state.store(Arc::new(HealthState::Ready));
    }

    /// Cancelled when shutdown is triggered.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Parent of every invocation context created by the HTTP trigger.
    ///
    /// Stays live through the drain so in-flight handlers are not told to
    /// stop while they are still allowed to finish.
    #[must_use]
    pub fn invocation_token(&self) -> &CancellationToken {
        &self.invocations
    }

    /// Moves to `Draining` and cancels [`token`](Self::token).
    pub fn trigger_shutdown(&self) {
        self.health_state.store(Arc::new(HealthState::Draining));
        self.token.cancel();
    }

    /// Cancels [`invocation_token`](Self::invocation_token).
    pub fn cancel_invocations(&self) {
        self.invocations.cancel();
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        **self.health_state.load()
    }

    /// Whether new requests should be turned away.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        matches!(
            self.health_state(),
            HealthState::Draining | HealthState::Stopped
        )
    }

    /// Counts one in-flight request until the guard is dropped, even if the
    /// request task panics.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.count.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.count.load(Ordering::Acquire)
    }

    /// Waits for all in-flight requests to complete, up to `timeout`.
    ///
    /// Returns `true` and moves to `Stopped` once drained. Returns `false`
    /// on timeout, leaving the state at `Draining`.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let drained = async {
            loop {
                // Register before checking so a wakeup between the two
                // is not lost.
                let notified = self.in_flight.drained.notified();
                if self.in_flight_count() == 0 {
                    return;
                }
                notified.await;
            }
        };

        if tokio::time::timeout(timeout, drained).await.is_ok() {
            self.health_state.store(Arc::new(HealthState::Stopped));
            true
        } else {
            false
        }
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard returned by [`ShutdownController::in_flight_guard`].
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.in_flight.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.in_flight.drained.notify_waiters();
        }
    }
}
