//! Framework-level configuration.

use std::str::FromStr;
use std::time::Duration;

use switchyard_core::{ConfigProvider, PipelineError};

use crate::network::HttpConfig;
use crate::scheduling::RateLimitConfig;
use crate::service::middleware::CorsConfig;

/// Settings for the default middleware chain and the HTTP trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameworkConfig {
    /// Deadline applied by the `Timeout` middleware, in milliseconds.
    pub default_timeout_ms: u64,
    /// Maximum number of invocations in flight before load shedding.
    pub max_concurrent_invocations: u32,
    pub rate_limit: RateLimitConfig,
    pub cors: CorsConfig,
    pub http: HttpConfig,
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            max_concurrent_invocations: 1000,
            rate_limit: RateLimitConfig::default(),
            cors: CorsConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl FrameworkConfig {
    /// Builds a configuration from a key/value provider.
    ///
    /// Absent keys keep their defaults. Recognised keys: `timeout_ms`,
    /// `max_concurrent_invocations`, `rate_limit.per_minute`,
    /// `rate_limit.burst`, `rate_limit.max_buckets`, `cors.allow_origins`,
    /// `cors.allow_methods`, `cors.allow_headers` (comma-separated),
    /// `cors.max_age_secs`, `http.host`, `http.port`,
    /// `http.request_timeout_ms`, `http.drain_timeout_ms`,
    /// `http.max_body_bytes`.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::InvalidConfig` when a present value does not
    /// parse, and propagates provider errors other than `NotFound`.
    pub fn from_provider(provider: &dyn ConfigProvider) -> Result<Self, PipelineError> {
        let mut config = Self::default();

        if let Some(v) = parse(provider, "timeout_ms")? {
            config.default_timeout_ms = v;
        }
        if let Some(v) = parse(provider, "max_concurrent_invocations")? {
            config.max_concurrent_invocations = v;
        }

        if let Some(v) = parse::<f64>(provider, "rate_limit.per_minute")? {
            config.rate_limit.per_minute = positive(v, "rate_limit.per_minute")?;
        }
        if let Some(v) = parse::<f64>(provider, "rate_limit.burst")? {
            config.rate_limit.burst = positive(v, "rate_limit.burst")?;
        }
        if let Some(v) = parse(provider, "rate_limit.max_buckets")? {
            config.rate_limit.max_buckets = v;
        }

        if let Some(v) = lookup(provider, "cors.allow_origins")? {
            config.cors.allow_origins = split_list(&v);
        }
        if let Some(v) = lookup(provider, "cors.allow_methods")? {
            config.cors.allow_methods = split_list(&v);
        }
        if let Some(v) = lookup(provider, "cors.allow_headers")? {
            config.cors.allow_headers = split_list(&v);
        }
        if let Some(v) = parse(provider, "cors.max_age_secs")? {
            config.cors.max_age = Duration::from_secs(v);
        }

        if let Some(v) = lookup(provider, "http.host")? {
            config.http.host = v;
        }
        if let Some(v) = parse(provider, "http.port")? {
            config.http.port = v;
        }
        if let Some(v) = parse(provider, "http.request_timeout_ms")? {
            config.http.request_timeout = Duration::from_millis(v);
        }
        if let Some(v) = parse(provider, "http.drain_timeout_ms")? {
            config.http.drain_timeout = Duration::from_millis(v);
        }
        if let Some(v) = parse(provider, "http.max_body_bytes")? {
            config.http.max_body_bytes = v;
        }

        Ok(config)
    }
}

fn lookup(provider: &dyn ConfigProvider, key: &str) -> Result<Option<String>, PipelineError> {
    match provider.get(key) {
        Ok(value) => Ok(Some(value.trim().to_string())),
        Err(PipelineError::NotFound { .. }) => Ok(None),
        Err(err) => Err(err),
    }
}

fn parse<T>(provider: &dyn ConfigProvider, key: &str) -> Result<Option<T>, PipelineError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(provider, key)?
        .map(|raw| {
            raw.parse::<T>().map_err(|e| PipelineError::InvalidConfig {
                key: key.to_string(),
                reason: format!("{raw:?}: {e}"),
            })
        })
        .transpose()
}

fn positive(value: f64, key: &str) -> Result<f64, PipelineError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(PipelineError::InvalidConfig {
            key: key.to_string(),
            reason: format!("must be a positive number, got {value}"),
        })
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
