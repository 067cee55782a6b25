//! Turns HTTP requests into invocations and invocations into responses.
//!
//! The request becomes the payload:
//!
//! | key       | contents                                   |
//! |-----------|--------------------------------------------|
//! | `method`  | request method                             |
//! | `path`    | request path                               |
//! | `query`   | query string pairs                         |
//! | `params`  | path parameters of the matched route       |
//! | `headers` | request headers, lowercase names           |
//! | `body`    | parsed JSON body, `null` when empty        |
//!
//! The peer IP becomes the `client_id` metadata entry and `X-User-Id`
//! becomes `user_id`.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts, Path, Query, RawPathParams, Request, State};
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use switchyard_core::{meta_keys, Metadata, Outcome, Payload, RequestContext, TriggerKind, Value};
use uuid::Uuid;

use super::AppState;
use crate::network::middleware::REQUEST_ID_HEADER;
use crate::service::Invocation;

/// Header whose value becomes the `user_id` metadata entry.
pub const USER_ID_HEADER: &str = "x-user-id";

/// `POST /invoke/{handler}`.
pub async fn invoke_handler(
    State(state): State<AppState>,
    Path(handler): Path<String>,
    request: Request,
) -> Response {
    dispatch(&state, &handler, request).await
}

/// Runs `handler` for one HTTP request and renders the result.
pub async fn dispatch(state: &AppState, handler: &str, request: Request) -> Response {
    if state.shutdown.is_draining() {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "server is shutting down");
    }
    let _guard = state.shutdown.in_flight_guard();

    let (mut parts, body) = request.into_parts();
    let max_body = state.config.max_body_bytes;
    let Ok(bytes) = axum::body::to_bytes(body, max_body).await else {
        return error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            &format!("request body exceeds {max_body} bytes"),
        );
    };
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(value) => value,
            Err(err) => {
                let message = format!("invalid JSON body: {err}");
                return error_response(StatusCode::BAD_REQUEST, &message);
            }
        }
    };

    let origin = header_str(&parts.headers, header::ORIGIN.as_str()).map(str::to_owned);
    let mut ctx = RequestContext::new(TriggerKind::Http, handler)
        .with_payload(request_payload(&mut parts, body).await)
        .with_cancellation(state.shutdown.invocation_token());
    if let Some(id) =
        header_str(&parts.headers, REQUEST_ID_HEADER).and_then(|v| Uuid::parse_str(v).ok())
    {
        ctx = ctx.with_request_id(id);
    }
    if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
        ctx.set_meta(meta_keys::CLIENT_ID, addr.ip().to_string());
    }
    if let Some(user) = header_str(&parts.headers, USER_ID_HEADER).filter(|v| !v.is_empty()) {
        ctx.set_meta(meta_keys::USER_ID, user);
    }

    let invocation = state.executor.dispatch_supervised(handler, ctx).await;
    invocation_response(invocation, origin.as_deref())
}

async fn request_payload(parts: &mut Parts, body: Value) -> Payload {
    let query: BTreeMap<String, Value> =
        Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
            .map(|Query(pairs)| pairs.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            .unwrap_or_default();

    let params: BTreeMap<String, Value> = RawPathParams::from_request_parts(parts, &())
        .await
        .map(|raw| {
            raw.iter()
                .map(|(k, v)| (k.to_string(), Value::from(v)))
                .collect()
        })
        .unwrap_or_default();

    let mut headers = BTreeMap::new();
    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            headers.insert(name.as_str().to_string(), Value::from(value));
        }
    }

    let mut payload = Payload::new();
    payload.insert("method".into(), Value::from(parts.method.as_str()));
    payload.insert("path".into(), Value::from(parts.uri.path()));
    payload.insert("query".into(), Value::Map(query));
    payload.insert("params".into(), Value::Map(params));
    payload.insert("headers".into(), Value::Map(headers));
    payload.insert("body".into(), body);
    payload
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// HTTP status for an invocation outcome.
#[must_use]
pub fn status_for(outcome: Outcome) -> StatusCode {
    match outcome {
        Outcome::Ok => StatusCode::OK,
        Outcome::NotFound => StatusCode::NOT_FOUND,
        Outcome::Throttled => StatusCode::TOO_MANY_REQUESTS,
        Outcome::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        Outcome::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        Outcome::Invalid => StatusCode::BAD_REQUEST,
        Outcome::Internal | Outcome::Failed => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Renders an invocation as JSON.
///
/// Success: `{"request_id": ..., "result": ...}`.
/// Failure: `{"error": ..., "request_id": ...}` with the mapped status.
#[must_use]
pub fn invocation_response(invocation: Invocation, origin: Option<&str>) -> Response {
    let status = status_for(invocation.outcome());
    let request_id = invocation.request_id.to_string();
    let body = match invocation.result {
        Ok(value) => json!({
            "request_id": request_id,
            "result": serde_json::Value::from(value),
        }),
        Err(err) => json!({ "error": err.to_string(), "request_id": request_id }),
    };
    let mut response = (status, Json(body)).into_response();
    apply_cors(response.headers_mut(), &invocation.metadata, origin);
    response
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// Writes `Access-Control-*` headers from the metadata left by the CORS
/// middleware. Nothing is written when the origin is not allowed.
fn apply_cors(headers: &mut HeaderMap, metadata: &Metadata, origin: Option<&str>) {
    let Some(allowed) = metadata
        .get(meta_keys::CORS_ALLOW_ORIGINS)
        .and_then(Value::as_array)
    else {
        return;
    };
    let allows = |candidate: &str| allowed.iter().any(|o| o.as_str() == Some(candidate));

    if allows("*") {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    } else {
        let Some(origin) = origin.filter(|o| allows(o)) else {
            return;
        };
        let Ok(value) = HeaderValue::from_str(origin) else {
            return;
        };
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
        headers.append(header::VARY, HeaderValue::from_static("origin"));
    }

    insert_list(
        headers,
        header::ACCESS_CONTROL_ALLOW_METHODS,
        metadata.get(meta_keys::CORS_ALLOW_METHODS),
    );
    insert_list(
        headers,
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        metadata.get(meta_keys::CORS_ALLOW_HEADERS),
    );
    if let Some(max_age) = metadata.get(meta_keys::CORS_MAX_AGE).and_then(Value::as_i64) {
        headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from(max_age));
    }
}

fn insert_list(headers: &mut HeaderMap, name: HeaderName, list: Option<&Value>) {
    let Some(items) = list.and_then(Value::as_array) else {
        return;
    };
    let joined = items
        .iter()
        .filter_map(Value::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    if joined.is_empty() {
        return;
    }
    if let Ok(value) = HeaderValue::from_str(&joined) {
        headers.insert(name, value);
    }
}

#[cfg(test)]
mod tests {
    use switchyard_core::PipelineError;

    use super::*;

    fn cors_metadata(origins: &[&str]) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert(
            meta_keys::CORS_ALLOW_ORIGINS.into(),
            Value::string_list(origins.iter().copied()),
        );
        metadata.insert(
            meta_keys::CORS_ALLOW_METHODS.into(),
            Value::string_list(["GET", "POST"]),
        );
        metadata.insert(
            meta_keys::CORS_ALLOW_HEADERS.into(),
            Value::string_list(["Content-Type"]),
        );
        metadata.insert(meta_keys::CORS_MAX_AGE.into(), Value::Int(600));
        metadata
    }

    #[test]
    fn outcomes_map_to_statuses() {
        assert_eq!(status_for(Outcome::Ok), StatusCode::OK);
        assert_eq!(status_for(Outcome::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_for(Outcome::Throttled), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(status_for(Outcome::DeadlineExceeded), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(status_for(Outcome::Unavailable), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for(Outcome::Invalid), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(Outcome::Internal), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(status_for(Outcome::Failed), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn wildcard_policy_allows_any_origin() {
        let mut headers = HeaderMap::new();
        apply_cors(&mut headers, &cors_metadata(&["*"]), None);
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], "GET, POST");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_HEADERS], "Content-Type");
        assert_eq!(headers[header::ACCESS_CONTROL_MAX_AGE], "600");
        assert!(headers.get(header::VARY).is_none());
    }

    #[test]
    fn listed_origin_is_echoed_with_vary() {
        let mut headers = HeaderMap::new();
        let metadata = cors_metadata(&["https://app.example"]);
        apply_cors(&mut headers, &metadata, Some("https://app.example"));
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://app.example"
        );
        assert_eq!(headers[header::VARY], "origin");
    }

    #[test]
    fn unlisted_origin_gets_no_cors_headers() {
        let mut headers = HeaderMap::new();
        let metadata = cors_metadata(&["https://app.example"]);
        apply_cors(&mut headers, &metadata, Some("https://evil.example"));
        assert!(headers.is_empty());

        apply_cors(&mut headers, &metadata, None);
        assert!(headers.is_empty());
    }

    #[test]
    fn no_metadata_means_no_headers() {
        let mut headers = HeaderMap::new();
        apply_cors(&mut headers, &Metadata::new(), Some("https://app.example"));
        assert!(headers.is_empty());
    }

    #[tokio::test]
    async fn failed_invocation_renders_error_body() {
        let invocation = Invocation {
            request_id: Uuid::new_v4(),
            metadata: Metadata::new(),
            result: Err(PipelineError::RateLimitExceeded {
                identifier: "10.0.0.1".into(),
            }),
        };
        let request_id = invocation.request_id.to_string();
        let response = invocation_response(invocation, None);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"], "rate limit exceeded for 10.0.0.1");
        assert_eq!(json["request_id"], request_id);
    }
}
