//! Transport-level Tower layers for the HTTP trigger.
//!
//! Ordering follows the outer-to-inner convention: the first layer listed
//! sees the request first and the response last. CORS is not handled here;
//! the CORS middleware publishes its policy as invocation metadata and the
//! invoke handler turns it into response headers.

use axum::http::header::HeaderName;
use axum::http::StatusCode;
use tower::layer::util::{Identity, Stack};
use tower::ServiceBuilder;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::compression::CompressionLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::config::HttpConfig;

/// Header carrying the request id. The invoke handler adopts it as the
/// invocation's request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// The composed layer type produced by [`build_http_layers`].
type HttpLayers = Stack<
    PropagateRequestIdLayer,
    Stack<
        TimeoutLayer,
        Stack<
            CompressionLayer,
            Stack<
                TraceLayer<SharedClassifier<ServerErrorsAsFailures>>,
                Stack<SetRequestIdLayer<MakeRequestUuid>, Identity>,
            >,
        >,
    >,
>;

/// Builds the HTTP transport stack.
///
/// **Outermost to innermost:**
/// 1. `SetRequestId` -- assigns a UUID v4 `X-Request-Id` when absent
/// 2. `Tracing` -- request/response spans
/// 3. `Compression` -- gzip responses
/// 4. `Timeout` -- transport deadline, answers 408 when exceeded
/// 5. `PropagateRequestId` -- copies `X-Request-Id` onto the response
///
/// The transport timeout is a backstop above the invocation deadline
/// enforced by the `Timeout` middleware, which answers 504.
#[must_use]
pub fn build_http_layers(config: &HttpConfig) -> HttpLayers {
    let x_request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ))
        .layer(PropagateRequestIdLayer::new(x_request_id))
        .into_inner()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn builds_with_defaults() {
        let _layers = build_http_layers(&HttpConfig::default());
    }

    #[test]
    fn builds_with_custom_timeout() {
        let config = HttpConfig {
            request_timeout: Duration::from_secs(5),
            ..HttpConfig::default()
        };
        let _layers = build_http_layers(&config);
    }
}
