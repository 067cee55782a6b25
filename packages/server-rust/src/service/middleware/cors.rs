//! CORS middleware.
//!
//! Publishes the configured CORS policy as context metadata. Trigger adapters
//! that speak HTTP translate the metadata into response headers; other
//! transports ignore it.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use switchyard_core::{meta_keys, HandlerResult, RequestContext, Value};

use super::{Middleware, Next};

/// Cross-origin policy published by [`Cors`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Allowed origins. `"*"` allows any origin.
    pub allow_origins: Vec<String>,
    pub allow_methods: Vec<String>,
    pub allow_headers: Vec<String>,
    /// How long browsers may cache a preflight response.
    pub max_age: Duration,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origins: vec!["*".to_string()],
            allow_methods: ["GET", "POST", "PUT", "DELETE", "OPTIONS"]
                .into_iter()
                .map(String::from)
                .collect(),
            allow_headers: ["Content-Type", "Authorization"]
                .into_iter()
                .map(String::from)
                .collect(),
            max_age: Duration::from_secs(86_400),
        }
    }
}

impl CorsConfig {
    /// Whether a request `Origin` is permitted by this policy.
    #[must_use]
    pub fn allows_origin(&self, origin: &str) -> bool {
        self.allow_origins.iter().any(|o| o == "*" || o == origin)
    }
}

/// Sets the CORS metadata keys and always continues down the chain.
#[derive(Debug, Clone)]
pub struct Cors {
    config: CorsConfig,
}

impl Cors {
    #[must_use]
    pub fn new(config: CorsConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Middleware for Cors {
    fn name(&self) -> &'static str {
        "cors"
    }

    async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> HandlerResult {
        ctx.set_meta(
            meta_keys::CORS_ALLOW_ORIGINS,
            Value::string_list(self.config.allow_origins.iter().cloned()),
        );
        ctx.set_meta(
            meta_keys::CORS_ALLOW_METHODS,
            Value::string_list(self.config.allow_methods.iter().cloned()),
        );
        ctx.set_meta(
            meta_keys::CORS_ALLOW_HEADERS,
            Value::string_list(self.config.allow_headers.iter().cloned()),
        );
        let max_age = i64::try_from(self.config.max_age.as_secs()).unwrap_or(i64::MAX);
        ctx.set_meta(meta_keys::CORS_MAX_AGE, max_age);
        next.run(ctx).await
    }
}
