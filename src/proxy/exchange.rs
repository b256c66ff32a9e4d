//! Correlated exchange records and their assembly
//!
//! An [`Exchange`] is the single log record produced for one proxied HTTP
//! transaction: both sides of the call, decoded payloads, timing, and an
//! error marker when the upstream failed. It is constructed exactly once per
//! forwarded request and immutable once emitted; decode failures degrade the
//! payload fields rather than discarding the record.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::proxy::codec;
use crate::proxy::decoder::{self, DecodedPayload};
use crate::proxy::headers::{CONTENT_ENCODING, CONTENT_TYPE};
use crate::proxy::types::{DurationMillis, Headers, HttpMethod, HttpStatusCode, RequestId};

/// Request-side facts of a proxied call
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RequestSide {
    pub method: HttpMethod,
    /// Resolved target URL (upstream base + rewritten path)
    pub url: String,
    pub headers: Headers,
    pub content_type: Option<String>,
    /// Decoded payload; absent for GET requests and unparseable bodies
    pub payload: Option<DecodedPayload>,
}

/// Response-side facts of a proxied call
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResponseSide {
    pub status: HttpStatusCode,
    pub headers: Headers,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub payload: Option<DecodedPayload>,
    /// False when the stream was cut short (upstream reset or client
    /// disconnect) and the payload reflects only the buffered part
    pub complete: bool,
}

/// Phase of the proxied call in which a failure occurred
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorPhase {
    RequestForwarding,
    ResponseStreaming,
    ResponseDelivery,
}

/// Explicit marker carried by an exchange whose upstream call failed
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProxyFailure {
    pub phase: ErrorPhase,
    pub message: String,
}

/// One correlated request/response record for a single proxied transaction
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Exchange {
    pub request_id: RequestId,
    pub started_at: DateTime<Utc>,
    pub request: RequestSide,
    /// Absent when the upstream connection failed before any response
    /// headers arrived
    pub response: Option<ResponseSide>,
    pub duration_ms: DurationMillis,
    pub error: Option<ProxyFailure>,
}

/// Assembles exchange records from raw request/response facts
///
/// Stateless: each side is built from fully-buffered bytes, the response
/// side running the content codec (by `content-encoding`) before the body
/// decoder (by `content-type`).
pub struct ExchangeRecorder;

impl ExchangeRecorder {
    /// Build the request side. GET bodies are never decoded: parsing them is
    /// semantically meaningless and consuming the stream can corrupt GET
    /// handling elsewhere.
    pub async fn request_side(
        method: HttpMethod,
        url: String,
        headers: Headers,
        body: &Bytes,
    ) -> RequestSide {
        let content_type = headers.first(CONTENT_TYPE.as_str()).map(str::to_owned);
        let payload = if method.as_ref() == "GET" {
            None
        } else {
            decoder::decode(content_type.as_deref(), body).await
        };

        RequestSide {
            method,
            url,
            headers,
            content_type,
            payload,
        }
    }

    /// Build the response side: decompress first, then decode.
    pub async fn response_side(
        status: HttpStatusCode,
        headers: Headers,
        body: Bytes,
        complete: bool,
    ) -> ResponseSide {
        let content_type = headers.first(CONTENT_TYPE.as_str()).map(str::to_owned);
        let content_encoding = headers.first(CONTENT_ENCODING.as_str()).map(str::to_owned);

        let decompressed = codec::decompress(content_encoding.as_deref(), body);
        let payload = decoder::decode(content_type.as_deref(), &decompressed).await;

        ResponseSide {
            status,
            headers,
            content_type,
            content_encoding,
            payload,
            complete,
        }
    }

    /// Merge both sides into the final record.
    pub fn merge(
        request_id: RequestId,
        request: RequestSide,
        response: Option<ResponseSide>,
        error: Option<ProxyFailure>,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Exchange {
        Exchange {
            request_id,
            started_at,
            request,
            response,
            duration_ms: elapsed_millis(started_at, ended_at),
            error,
        }
    }
}

/// Elapsed integer milliseconds, clamped to zero under clock skew
pub fn elapsed_millis(started_at: DateTime<Utc>, ended_at: DateTime<Utc>) -> DurationMillis {
    let millis = (ended_at - started_at).num_milliseconds();
    if millis < 0 {
        warn!(
            started_at = %started_at,
            ended_at = %ended_at,
            "Negative elapsed duration observed, clamping to zero"
        );
        DurationMillis::from(0)
    } else {
        DurationMillis::from(millis as u64)
    }
}
