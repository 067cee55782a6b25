//! Rate-limit middleware backed by the token-bucket limiter.

use std::sync::Arc;

use async_trait::async_trait;
use switchyard_core::{meta_keys, HandlerResult, PipelineError, RequestContext};

use super::{Middleware, Next};
use crate::scheduling::TokenBucketLimiter;

/// Identifier used when a request carries neither a client nor a user id.
pub const DEFAULT_IDENTIFIER: &str = "default";

/// Admits or rejects each invocation against a per-client token bucket.
///
/// The identifier is the `client_id` metadata entry, falling back to
/// `user_id`, then to [`DEFAULT_IDENTIFIER`]. Rejected requests never reach
/// the rest of the chain.
#[derive(Debug, Clone)]
pub struct RateLimit {
    limiter: Arc<TokenBucketLimiter>,
}

impl RateLimit {
    #[must_use]
    pub fn new(limiter: Arc<TokenBucketLimiter>) -> Self {
        Self { limiter }
    }
}

fn identifier(ctx: &RequestContext) -> String {
    ctx.meta_str(meta_keys::CLIENT_ID)
        .or_else(|| ctx.meta_str(meta_keys::USER_ID))
        .unwrap_or(DEFAULT_IDENTIFIER)
        .to_owned()
}

#[async_trait]
impl Middleware for RateLimit {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> HandlerResult {
        let identifier = identifier(ctx);
        if !self.limiter.check(&identifier) {
            tracing::debug!(identifier = %identifier, handler = ctx.handler(), "rate limit exceeded");
            return Err(PipelineError::RateLimitExceeded { identifier });
        }
        ctx.set_meta(meta_keys::RATE_LIMIT_IDENTIFIER, identifier);
        next.run(ctx).await
    }
}
