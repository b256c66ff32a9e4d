//! Main proxy service implementation
//!
//! The `ProxyService` is the forwarding engine: it selects requests under the
//! configured route prefix, rewrites and forwards them to the upstream
//! target, and drives the [`ProxyInterceptor`] hooks around each call. The
//! inspection layer never alters the proxied response; its only output is the
//! record handed to the sink.

use crate::proxy::headers::{paths, HOST, X_REQUEST_ID};
use crate::proxy::interceptor::{spawn_tap, ProxyInterceptor, RecordingBody};
use crate::proxy::lifecycle::{lifecycle_middleware, request_id_middleware};
use crate::proxy::sink::RecordSink;
use crate::proxy::types::*;
use crate::proxy::url_resolver::UrlResolver;
use crate::site::Site;
use axum::{
    body::Body,
    extract::{Request, State},
    middleware::{from_fn, from_fn_with_state},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use http_body_util::BodyExt;
use hyper::header::HeaderValue as HttpHeaderValue;
use hyper::StatusCode;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Forwarding engine with the inspection layer wired in
#[derive(Clone)]
pub struct ProxyService {
    config: Arc<ProxyConfig>,
    sink: Arc<dyn RecordSink>,
    client: hyper_util::client::legacy::Client<HttpsConnector<HttpConnector>, Body>,
}

/// Connector dialing both `http://` and `https://` upstreams, with TLS
/// trust anchored in the platform certificate store
fn build_connector() -> ProxyResult<HttpsConnector<HttpConnector>> {
    Ok(hyper_rustls::HttpsConnectorBuilder::new()
        .with_native_roots()?
        .https_or_http()
        .enable_http1()
        .build())
}

impl ProxyService {
    /// Create a new proxy service emitting records to `sink`
    pub fn new(config: ProxyConfig, sink: Arc<dyn RecordSink>) -> ProxyResult<Self> {
        let client =
            hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
                .http1_title_case_headers(true)
                .http1_preserve_header_case(true)
                .build(build_connector()?);

        Ok(Self {
            config: Arc::new(config),
            sink,
            client,
        })
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Whether this request path is selected for proxying
    pub fn matches(&self, path: &str) -> bool {
        UrlResolver::matches(&self.config.route_prefix, path)
    }

    /// Forward one request to the upstream target.
    ///
    /// Exactly one exchange record is emitted per call, whatever happens:
    /// upstream failures emit an error-marked record here, successful calls
    /// emit from the tap task once the response stream ends.
    pub async fn forward(&self, request: Request<Body>) -> ProxyResult<Response> {
        let request_id = extract_request_id(&request);
        let (mut parts, body) = request.into_parts();

        let resolved_uri = UrlResolver::resolve_upstream_uri(
            &self.config.upstream_url,
            &self.config.route_prefix,
            &parts.uri,
        )?;

        // The inspection layer operates on fully-buffered request bytes
        let max_request_size = *self.config.max_request_size.as_ref();
        let body_bytes = http_body_util::Limited::new(body, max_request_size)
            .collect()
            .await
            .map_err(|e| {
                if e.is::<http_body_util::LengthLimitError>() {
                    ProxyError::RequestTooLarge {
                        size: BodySize::from(max_request_size + 1),
                        max_size: self.config.max_request_size,
                    }
                } else {
                    ProxyError::Internal(format!("Body collection error: {e}"))
                }
            })?
            .to_bytes();

        let method = HttpMethod::try_new(parts.method.to_string())
            .map_err(|e| ProxyError::Internal(format!("Invalid HTTP method: {e}")))?;
        let request_headers = Headers::from_http(&parts.headers);

        let interceptor = ProxyInterceptor::on_forward(
            request_id,
            Arc::clone(&self.sink),
            method,
            resolved_uri.to_string(),
            request_headers,
            &body_bytes,
        )
        .await;

        debug!(request_id = %request_id, target = %resolved_uri, "Forwarding request upstream");

        // Rewrite the request for the upstream origin
        parts.uri = resolved_uri.clone();
        if let Some(authority) = resolved_uri.authority() {
            if let Ok(host) = HttpHeaderValue::from_str(authority.as_str()) {
                parts.headers.insert(HOST, host);
            }
        }
        let outgoing = Request::from_parts(parts, Body::from(body_bytes));

        let response_future = self.client.request(outgoing);
        let timeout = self.config.request_timeout;
        let response = match tokio::time::timeout(timeout, response_future).await {
            Err(_) => {
                interceptor.on_proxy_error(format!("upstream timeout after {timeout:?}"));
                return Err(ProxyError::RequestTimeout(timeout));
            }
            Ok(Err(error)) => {
                interceptor.on_proxy_error(error.to_string());
                return Err(ProxyError::UpstreamUnreachable(error.to_string()));
            }
            Ok(Ok(response)) => response,
        };

        let (response_parts, response_body) = response.into_parts();

        let status = HttpStatusCode::try_new(response_parts.status.as_u16())
            .map_err(|_| ProxyError::Internal("status code outside 100..=599".to_string()))?;
        let mut interceptor = interceptor;
        interceptor.on_response_start(status, Headers::from_http(&response_parts.headers));

        // The tap task owns the interceptor for the streaming phase and
        // guarantees emission even if the client goes away
        let tx = spawn_tap(interceptor);
        let recording = RecordingBody::new(response_body, tx);

        Ok(Response::from_parts(response_parts, Body::new(recording)))
    }
}

/// Reuse the middleware-assigned request ID when it is a v7 UUID
fn extract_request_id(request: &Request<Body>) -> RequestId {
    request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .and_then(|uuid| RequestId::try_new(uuid).ok())
        .unwrap_or_default()
}

/// Error conversion for Axum responses
impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = match &self {
            ProxyError::RequestTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::RequestTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::UpstreamUnreachable(_) | ProxyError::InvalidUpstreamUrl(_) => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = axum::Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

#[derive(Clone)]
struct AppState {
    proxy: ProxyService,
    site: Arc<Site>,
}

/// Assemble the full router: health endpoint, proxy dispatch, static site
/// fallback, lifecycle and request-id middleware.
pub fn build_router(proxy: ProxyService, site: Arc<Site>, sink: Arc<dyn RecordSink>) -> Router {
    let state = AppState { proxy, site };

    Router::new()
        .route(paths::HEALTH, get(health_handler))
        .fallback(dispatch_handler)
        .with_state(state)
        .layer(from_fn_with_state(sink, lifecycle_middleware))
        .layer(from_fn(request_id_middleware))
}

/// Route to the proxy when the path matches the configured prefix,
/// otherwise to the static site
async fn dispatch_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    if state.proxy.matches(request.uri().path()) {
        match state.proxy.forward(request).await {
            Ok(response) => response,
            Err(error) => error.into_response(),
        }
    } else {
        state.site.handle(request).await
    }
}

/// Health check handler
async fn health_handler() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::sink::CaptureSink;

    fn test_config() -> ProxyConfig {
        ProxyConfig {
            route_prefix: RoutePrefix::try_new("/api".to_string()).unwrap(),
            upstream_url: TargetUrl::try_new("http://127.0.0.1:1".to_string()).unwrap(),
            ..ProxyConfig::default()
        }
    }

    #[tokio::test]
    async fn test_service_creation_and_matching() {
        let sink = Arc::new(CaptureSink::new());
        let service = ProxyService::new(test_config(), sink).unwrap();

        assert!(service.matches("/api"));
        assert!(service.matches("/api/users"));
        assert!(!service.matches("/apiary"));
        assert!(!service.matches("/static/app.js"));
    }

    #[tokio::test]
    async fn test_connector_dials_https_targets() {
        // A dead local port: dialing it proves the scheme was accepted and a
        // TCP connect was attempted, without leaving the machine
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector = build_connector().unwrap();
        let uri: hyper::Uri = format!("https://{addr}/todos/1").parse().unwrap();
        let error = tower::ServiceExt::oneshot(connector, uri).await.unwrap_err();
        assert!(!error.to_string().contains("scheme"), "{error}");
    }

    #[tokio::test]
    async fn test_proxy_error_status_mapping() {
        let cases = [
            (
                ProxyError::UpstreamUnreachable("refused".to_string()),
                StatusCode::BAD_GATEWAY,
            ),
            (
                ProxyError::RequestTimeout(std::time::Duration::from_secs(1)),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                ProxyError::Internal("boom".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }
}
