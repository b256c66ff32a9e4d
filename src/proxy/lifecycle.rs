//! Per-request lifecycle logging and request ID propagation
//!
//! Independent of the proxy interceptor: every inbound request (proxied,
//! static file, 404) gets exactly one compact lifecycle record, emitted when
//! the handler completes.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::proxy::headers::X_REQUEST_ID;
use crate::proxy::sink::{Record, RecordSink};
use crate::proxy::types::DurationMillis;

/// One-line summary record for a completed inbound request
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LifecycleRecord {
    pub timestamp: DateTime<Utc>,
    pub request_id: Option<String>,
    pub method: String,
    /// Original URI as received, before any prefix rewriting
    pub uri: String,
    pub status: u16,
    pub duration_ms: DurationMillis,
    pub client_addr: Option<String>,
}

/// Middleware timing every inbound request and emitting one lifecycle record
///
/// Fires exactly once per request regardless of which downstream handler
/// served it.
pub async fn lifecycle_middleware(
    State(sink): State<Arc<dyn RecordSink>>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let timestamp = Utc::now();

    let method = request.method().to_string();
    let uri = request.uri().to_string();
    let request_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|h| h.to_str().ok())
        .map(str::to_owned);
    let client_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string());

    let response = next.run(request).await;

    let duration_ms = DurationMillis::from(start.elapsed().as_millis() as u64);
    let status = response.status().as_u16();

    info!(
        request_id = request_id.as_deref().unwrap_or("unknown"),
        method = %method,
        uri = %uri,
        status,
        duration_ms = %duration_ms,
        "Request completed"
    );

    sink.emit(Record::Lifecycle(LifecycleRecord {
        timestamp,
        request_id,
        method,
        uri,
        status,
        duration_ms,
        client_addr,
    }));

    response
}

/// Request ID middleware - ensures every request has a unique ID for tracing
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::now_v7);

    let header_value = HeaderValue::from_str(&request_id.to_string())
        .expect("UUID strings are always valid header values");

    request
        .headers_mut()
        .insert(X_REQUEST_ID, header_value.clone());

    let mut response = next.run(request).await;

    response.headers_mut().insert(X_REQUEST_ID, header_value);
    response
}
