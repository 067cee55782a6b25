//! HTTP trigger: the axum server that exposes handlers over HTTP.
//!
//! `start()` binds the listener and serves in the background; `stop()`
//! moves to Draining, cancels every in-flight invocation context, waits
//! for the drain and then for the accept loop to close.

use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::Method;
use axum::routing::{get, post, MethodFilter, MethodRouter};
use axum::Router;
use parking_lot::Mutex;
use switchyard_core::{TriggerBinding, TriggerKind};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::config::HttpConfig;
use super::handlers::{
    dispatch, health_handler, invoke_handler, liveness_handler, readiness_handler, AppState,
};
use super::middleware::build_http_layers;
use super::shutdown::ShutdownController;
use crate::service::{Executor, HandlerRegistry};
use crate::trigger::Trigger;

/// Path prefixes owned by the trigger itself.
const RESERVED_PREFIXES: [&str; 2] = ["/health", "/invoke"];

struct Running {
    local_addr: SocketAddr,
    server: JoinHandle<std::io::Result<()>>,
}

/// Serves `POST /invoke/{handler}`, every `TriggerBinding::Http` route and
/// the health checks.
///
/// A trigger runs once: after `stop()` its shutdown token stays cancelled,
/// so a fresh trigger is needed to serve again.
pub struct HttpTrigger {
    config: HttpConfig,
    executor: Executor,
    shutdown: Arc<ShutdownController>,
    start_time: Instant,
    running: Mutex<Option<Running>>,
}

impl HttpTrigger {
    #[must_use]
    pub fn new(config: HttpConfig, executor: Executor) -> Self {
        Self {
            config,
            executor,
            shutdown: Arc::new(ShutdownController::new()),
            start_time: Instant::now(),
            running: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Address the listener is bound to, once started.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|running| running.local_addr)
    }

    /// Assembles the router with all routes and transport layers.
    ///
    /// Routes:
    /// - `GET /health`, `GET /health/live`, `GET /health/ready`
    /// - `POST /invoke/{handler}`
    /// - one route per `TriggerBinding::Http` in the registry
    ///
    /// # Errors
    ///
    /// Returns an error for an HTTP binding with an unknown method, a
    /// malformed or reserved path, or a method and path bound twice.
    pub fn router(&self) -> anyhow::Result<Router> {
        let state = AppState {
            executor: self.executor.clone(),
            shutdown: Arc::clone(&self.shutdown),
            config: Arc::new(self.config.clone()),
            start_time: self.start_time,
        };

        let mut router = Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .route("/invoke/{handler}", post(invoke_handler));
        for (path, methods) in binding_routes(self.executor.registry())? {
            router = router.route(&path, methods);
        }

        Ok(router
            .layer(build_http_layers(&self.config))
            .with_state(state))
    }
}

/// Groups the registry's HTTP bindings into one method router per path.
fn binding_routes(
    registry: &HandlerRegistry,
) -> anyhow::Result<BTreeMap<String, MethodRouter<AppState>>> {
    let mut routes: BTreeMap<String, MethodRouter<AppState>> = BTreeMap::new();
    let mut seen = HashSet::new();

    for definition in registry.list_by_trigger(TriggerKind::Http) {
        for binding in definition.triggers() {
            let TriggerBinding::Http { method, path } = binding else {
                continue;
            };
            let method = method.to_ascii_uppercase();
            let filter = Method::from_bytes(method.as_bytes())
                .ok()
                .and_then(|m| MethodFilter::try_from(m).ok())
                .ok_or_else(|| {
                    anyhow!(
                        "handler {}: unsupported HTTP method {method:?}",
                        definition.name()
                    )
                })?;
            validate_path(path).map_err(|reason| {
                anyhow!("handler {}: route {path:?} {reason}", definition.name())
            })?;
            if !seen.insert((method.clone(), path.clone())) {
                bail!("route {method} {path} is bound more than once");
            }

            let name: Arc<str> = Arc::from(definition.name());
            let endpoint = move |State(state): State<AppState>, request: Request| {
                let name = Arc::clone(&name);
                async move { dispatch(&state, &name, request).await }
            };
            let methods = routes.remove(path).unwrap_or_else(MethodRouter::new);
            routes.insert(path.clone(), methods.on(filter, endpoint));
        }
    }
    Ok(routes)
}

fn validate_path(path: &str) -> Result<(), &'static str> {
    if !path.starts_with('/') {
        return Err("must start with '/'");
    }
    if RESERVED_PREFIXES
        .iter()
        .any(|prefix| path == *prefix || path.starts_with(&format!("{prefix}/")))
    {
        return Err("collides with a built-in route");
    }
    if path
        .split('/')
        .any(|segment| segment.starts_with(':') || segment.starts_with('*'))
    {
        return Err("uses ':'/'*' captures; write parameters as {name}");
    }
    Ok(())
}

#[async_trait]
impl Trigger for HttpTrigger {
    fn kind(&self) -> TriggerKind {
        TriggerKind::Http
    }

    async fn start(&self) -> anyhow::Result<()> {
        if self.running.lock().is_some() {
            return Ok(());
        }
        if self.shutdown.token().is_cancelled() {
            bail!("HTTP trigger cannot be restarted after stop");
        }

        let router = self.router()?;
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let local_addr = listener.local_addr()?;

        let mut running = self.running.lock();
        if running.is_some() {
            return Ok(());
        }
        let shutdown = self.shutdown.token().clone().cancelled_owned();
        let server = tokio::spawn(async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(shutdown)
            .await
        });
        *running = Some(Running { local_addr, server });
        self.shutdown.set_ready();

        info!(addr = %local_addr, "HTTP trigger listening");
        Ok(())
    }

    async fn stop(&self) {
        let running = self.running.lock().take();
        let Some(Running {
            local_addr,
            mut server,
        }) = running
        else {
            return;
        };

        info!(
            addr = %local_addr,
            in_flight = self.shutdown.in_flight_count(),
            "HTTP trigger draining"
        );
        self.shutdown.trigger_shutdown();

        let drain = self.config.drain_timeout;
        if self.shutdown.wait_for_drain(drain).await {
            info!("all in-flight requests drained");
        } else {
            warn!(
                in_flight = self.shutdown.in_flight_count(),
                "drain timeout expired with requests still in flight"
            );
        }
        self.shutdown.cancel_invocations();

        match tokio::time::timeout(drain, &mut server).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(err))) => error!(error = %err, "HTTP server ended with an error"),
            Ok(Err(err)) => error!(error = %err, "HTTP server task failed"),
            Err(_) => {
                warn!("HTTP server did not close in time; aborting");
                server.abort();
            }
        }
        info!(addr = %local_addr, "HTTP trigger stopped");
    }
}
