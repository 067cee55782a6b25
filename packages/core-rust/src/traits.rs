use std::collections::HashMap;
use std::fmt;

use crate::error::PipelineError;

/// Key/value pairs attached to a log event.
pub type LogFields<'a> = &'a [(&'a str, String)];

/// Renders log fields as `key=value` pairs separated by spaces.
struct Fields<'a>(LogFields<'a>);

impl fmt::Display for Fields<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{key}={value}")?;
        }
        Ok(())
    }
}

/// Logging backend injected into middleware and schedulers.
///
/// Components log through this trait instead of a process-wide logger so
/// tests (and embedders) can capture or redirect events.
pub trait EventLogger: Send + Sync {
    fn info(&self, message: &str, fields: LogFields<'_>);

    fn error(&self, message: &str, fields: LogFields<'_>);
}

/// Default logger forwarding to the `tracing` subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl EventLogger for TracingLogger {
    fn info(&self, message: &str, fields: LogFields<'_>) {
        tracing::info!(target: "switchyard", fields = %Fields(fields), "{message}");
    }

    fn error(&self, message: &str, fields: LogFields<'_>) {
        tracing::error!(target: "switchyard", fields = %Fields(fields), "{message}");
    }
}

/// Opaque key/value source used to configure middleware and schedulers.
///
/// Secret managers, config files and environment lookups implement this
/// outside the core.
pub trait ConfigProvider: Send + Sync {
    /// Look up a key.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::NotFound` if the key is absent.
    fn get(&self, key: &str) -> Result<String, PipelineError>;
}

/// In-memory [`ConfigProvider`] backed by a `HashMap`.
#[derive(Debug, Clone, Default)]
pub struct MapConfigProvider {
    values: HashMap<String, String>,
}

impl MapConfigProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapConfigProvider {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl ConfigProvider for MapConfigProvider {
    fn get(&self, key: &str) -> Result<String, PipelineError> {
        self.values
            .get(key)
            .cloned()
            .ok_or_else(|| PipelineError::not_found(key))
    }
}
