//! Process-wide tracing and metrics installation.

use std::net::SocketAddr;

use anyhow::{anyhow, Context};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Installs the global `fmt` subscriber on stderr, filtered by `RUST_LOG`.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))
}

/// Installs the Prometheus recorder and serves `/metrics` on `addr`.
///
/// Must run inside a tokio runtime.
///
/// # Errors
///
/// Fails if a recorder is already installed or the listener cannot bind.
pub fn install_prometheus(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .with_context(|| format!("failed to install Prometheus exporter on {addr}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_subscriber_install_fails() {
        let _ = init_tracing(false);
        let err = init_tracing(true).unwrap_err();
        assert!(err
            .to_string()
            .starts_with("failed to install tracing subscriber"));
    }
}
