//! Per-invocation request context.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::trigger::TriggerKind;
use crate::types::{Metadata, Payload, Value};

/// Per-invocation carrier of payload, metadata and the cancellation signal.
///
/// Exactly one context exists per invocation. It is not `Clone`:
/// middleware and the handler all see the same instance through `&mut`, so a
/// metadata write made close to the handler is visible to outer layers once
/// `next` returns.
#[derive(Debug)]
pub struct RequestContext {
    request_id: Uuid,
    handler: String,
    trigger: TriggerKind,
    created_at: Instant,
    deadline: Option<Instant>,
    cancellation: CancellationToken,
    /// Trigger-specific request data.
    pub payload: Payload,
    /// Values exchanged between middleware layers and the handler.
    pub metadata: Metadata,
}

/// Saved deadline and token, returned by [`RequestContext::narrow`].
///
/// Passing it back to [`RequestContext::restore`] undoes the narrowing.
#[derive(Debug)]
pub struct DeadlineScope {
    previous_deadline: Option<Instant>,
    previous_token: CancellationToken,
    budget: Duration,
}

impl DeadlineScope {
    /// Time granted to the narrowed scope when it was opened.
    #[must_use]
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Token of the enclosing scope. Fires when the invoking environment cancels.
    #[must_use]
    pub fn parent_token(&self) -> &CancellationToken {
        &self.previous_token
    }
}

impl RequestContext {
    /// Creates a context with a fresh request id, no deadline and an
    /// independent cancellation token.
    pub fn new(trigger: TriggerKind, handler: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            handler: handler.into(),
            trigger,
            created_at: Instant::now(),
            deadline: None,
            cancellation: CancellationToken::new(),
            payload: Payload::new(),
            metadata: Metadata::new(),
        }
    }

    /// Adopts an id assigned upstream (e.g. an `X-Request-Id` header).
    #[must_use]
    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = request_id;
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Inherits cancellation from the invoking environment.
    ///
    /// The context holds a child of `parent`, so cancelling the parent
    /// cancels this invocation while narrowed scopes stay local.
    #[must_use]
    pub fn with_cancellation(mut self, parent: &CancellationToken) -> Self {
        self.cancellation = parent.child_token();
        self
    }

    /// Sets an absolute deadline, keeping an earlier one if already present.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        });
        self
    }

    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    #[must_use]
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    #[must_use]
    pub fn handler(&self) -> &str {
        &self.handler
    }

    #[must_use]
    pub fn trigger(&self) -> TriggerKind {
        self.trigger
    }

    /// Time since the context was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.created_at.elapsed()
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline, `None` when unbounded.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// The token of the current scope. Clone it to hand cancellation to
    /// spawned work.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Completes when the current scope is cancelled.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await;
    }

    /// Narrows the deadline to at most `limit` from now and swaps in a child
    /// cancellation token for the narrowed scope.
    ///
    /// An inherited deadline that is already earlier wins.
    pub fn narrow(&mut self, limit: Duration) -> DeadlineScope {
        let now = Instant::now();
        let candidate = now + limit;
        let deadline = match self.deadline {
            Some(inherited) if inherited < candidate => inherited,
            _ => candidate,
        };
        let child = self.cancellation.child_token();
        DeadlineScope {
            previous_deadline: self.deadline.replace(deadline),
            previous_token: std::mem::replace(&mut self.cancellation, child),
            budget: deadline.saturating_duration_since(now),
        }
    }

    /// Restores the deadline and token saved by [`narrow`](Self::narrow).
    pub fn restore(&mut self, scope: DeadlineScope) {
        self.deadline = scope.previous_deadline;
        self.cancellation = scope.previous_token;
    }

    /// Splits off an owned context for running the rest of an invocation on
    /// another task.
    ///
    /// The fork shares identity, deadline and cancellation token. It takes the
    /// payload and a copy of the metadata; [`join`](Self::join) hands both
    /// back. A fork that is never joined keeps the payload.
    #[must_use]
    pub fn fork(&mut self) -> RequestContext {
        RequestContext {
            request_id: self.request_id,
            handler: self.handler.clone(),
            trigger: self.trigger,
            created_at: self.created_at,
            deadline: self.deadline,
            cancellation: self.cancellation.clone(),
            payload: std::mem::take(&mut self.payload),
            metadata: self.metadata.clone(),
        }
    }

    /// Takes back the payload and metadata of a context returned by
    /// [`fork`](Self::fork).
    pub fn join(&mut self, forked: RequestContext) {
        self.payload = forked.payload;
        self.metadata = forked.metadata;
    }

    #[must_use]
    pub fn meta(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Returns a metadata entry as a non-empty string.
    #[must_use]
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.meta(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Inserts a metadata entry, returning the previous value.
    pub fn set_meta(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.metadata.insert(key.into(), value.into())
    }

    #[must_use]
    pub fn payload_value(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }
}
