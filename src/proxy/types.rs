//! Type definitions for the proxy module

use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

// ========== Size Types ==========

/// Maximum size for buffered HTTP request bodies in bytes
#[nutype(
    derive(Clone, Copy, Debug, Display, Deserialize, Serialize, TryFrom, AsRef),
    validate(predicate = |size: &usize| *size > 0),
)]
pub struct RequestSizeLimit(usize);

/// Size of an HTTP body in bytes
#[nutype(derive(Clone, Copy, Debug, Display, Deserialize, Serialize, From, AsRef))]
pub struct BodySize(usize);

// ========== Time Types ==========

/// Duration in milliseconds
#[nutype(derive(
    Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize, From,
    AsRef
))]
pub struct DurationMillis(u64);

// ========== HTTP Types ==========

/// HTTP method as a string (for serialization)
#[nutype(
    derive(Clone, Debug, Display, PartialEq, Eq, Deserialize, Serialize, TryFrom, AsRef),
    validate(predicate = |s: &str| !s.is_empty()),
)]
pub struct HttpMethod(String);

/// HTTP request URI
#[nutype(
    derive(Clone, Debug, Display, Deserialize, Serialize, TryFrom, AsRef),
    validate(predicate = |s: &str| !s.is_empty()),
)]
pub struct RequestUri(String);

/// HTTP status code
#[nutype(
    derive(Clone, Copy, Debug, Display, PartialEq, Eq, Deserialize, Serialize, TryFrom, AsRef),
    validate(predicate = |code: &u16| (100..=599).contains(code)),
)]
pub struct HttpStatusCode(u16);

/// HTTP header name
#[nutype(
    derive(Clone, Debug, Display, PartialEq, Eq, Deserialize, Serialize, TryFrom, AsRef),
    validate(predicate = |s: &str| !s.is_empty()),
)]
pub struct HeaderName(String);

/// HTTP header value
#[nutype(derive(Clone, Debug, Display, PartialEq, Eq, Deserialize, Serialize, From, AsRef))]
pub struct HeaderValue(String);

/// Collection of HTTP headers, ordered by first appearance
///
/// Multi-valued headers (e.g. `set-cookie`) keep every declared value as a
/// list under a single name instead of silently overwriting.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Headers(Vec<(HeaderName, Vec<HeaderValue>)>);

impl Headers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Build from an `http::HeaderMap`, grouping repeated names in
    /// first-appearance order. Non-UTF-8 values degrade to a placeholder.
    pub fn from_http(map: &http::HeaderMap) -> Self {
        let mut headers = Self::new();
        for (name, value) in map.iter() {
            let value = value.to_str().unwrap_or("<binary>").to_string();
            headers.append(name.as_str(), value);
        }
        headers
    }

    pub fn from_pairs(pairs: Vec<(String, String)>) -> Result<Self, ProxyError> {
        let mut headers = Self::new();
        for (name, value) in pairs {
            if HeaderName::try_new(name.clone()).is_err() {
                return Err(ProxyError::Internal(format!("Invalid header name: {name}")));
            }
            headers.append(&name, value);
        }
        Ok(headers)
    }

    fn append(&mut self, name: &str, value: String) {
        let name = name.to_ascii_lowercase();
        match self.0.iter_mut().find(|(n, _)| n.as_ref() == name) {
            Some((_, values)) => values.push(HeaderValue::from(value)),
            None => {
                if let Ok(name) = HeaderName::try_new(name) {
                    self.0.push((name, vec![HeaderValue::from(value)]));
                }
            }
        }
    }

    /// First value declared for `name` (case-insensitive), if any
    pub fn first(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.0
            .iter()
            .find(|(n, _)| n.as_ref() == name)
            .and_then(|(_, values)| values.first())
            .map(|v| v.as_ref())
    }

    pub fn as_vec(&self) -> &Vec<(HeaderName, Vec<HeaderValue>)> {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for Headers {
    fn default() -> Self {
        Self::new()
    }
}

// ========== Routing Types ==========

/// Request ID for correlating records with in-flight requests
#[nutype(
    derive(Clone, Copy, Debug, Display, PartialEq, Eq, Deserialize, Serialize, TryFrom, AsRef),
    validate(predicate = |id: &Uuid| id.get_version_num() == 7),
)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Create a new RequestId with a v7 UUID
    pub fn new() -> Self {
        Self::try_new(Uuid::now_v7()).expect("now_v7 always produces a v7 UUID")
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// Base URL of the upstream target
#[nutype(
    derive(Clone, Debug, Display, Deserialize, Serialize, TryFrom, AsRef),
    validate(predicate = |s: &str| s.starts_with("http://") || s.starts_with("https://")),
)]
pub struct TargetUrl(String);

/// Path prefix selecting requests for proxying, stripped before forwarding
#[nutype(
    derive(Clone, Debug, Display, Deserialize, Serialize, TryFrom, AsRef),
    validate(predicate = |s: &str| s.starts_with('/') && s.len() > 1 && !s.ends_with('/')),
)]
pub struct RoutePrefix(String);

// ========== Configuration ==========

/// Forwarding engine configuration
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ProxyConfig {
    /// Path prefix that selects requests for proxying
    pub route_prefix: RoutePrefix,
    /// Upstream base URL the stripped path is joined to
    pub upstream_url: TargetUrl,
    /// Maximum buffered request size in bytes
    pub max_request_size: RequestSizeLimit,
    /// Upstream request timeout (owned by the forwarding engine, not the
    /// inspection layer)
    pub request_timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            route_prefix: RoutePrefix::try_new("/my-service".to_string())
                .expect("default prefix is valid"),
            upstream_url: TargetUrl::try_new("https://jsonplaceholder.typicode.com".to_string())
                .expect("default upstream is valid"),
            max_request_size: RequestSizeLimit::try_new(10 * 1024 * 1024).expect("10MB is valid"),
            request_timeout: Duration::from_secs(30),
        }
    }
}

// ========== Errors ==========

/// Errors that can occur in the forwarding engine
///
/// Inspection-layer failures (decode, decompress, sink writes) are not here
/// on purpose: they are recovered locally and never surface past their
/// component boundary.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Request too large: {size} bytes (max: {max_size} bytes)")]
    RequestTooLarge {
        size: BodySize,
        max_size: RequestSizeLimit,
    },

    #[error("Request timeout after {0:?}")]
    RequestTimeout(Duration),

    #[error("Invalid upstream URL: {0}")]
    InvalidUpstreamUrl(String),

    #[error("Upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] http::Error),

    #[error("Hyper error: {0}")]
    HyperError(#[from] hyper::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for proxy operations
pub type ProxyResult<T> = Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_group_repeated_names() {
        let mut map = http::HeaderMap::new();
        map.append("set-cookie", "a=1".parse().unwrap());
        map.append("set-cookie", "b=2".parse().unwrap());
        map.insert("content-type", "text/plain".parse().unwrap());

        let headers = Headers::from_http(&map);

        let cookies = headers
            .as_vec()
            .iter()
            .find(|(n, _)| n.as_ref() == "set-cookie")
            .map(|(_, v)| v.clone())
            .unwrap();
        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies[0].as_ref(), "a=1");
        assert_eq!(cookies[1].as_ref(), "b=2");
        assert_eq!(headers.first("Content-Type"), Some("text/plain"));
    }

    #[test]
    fn test_headers_first_is_case_insensitive() {
        let headers =
            Headers::from_pairs(vec![("X-Custom".to_string(), "value".to_string())]).unwrap();
        assert_eq!(headers.first("x-custom"), Some("value"));
        assert_eq!(headers.first("X-CUSTOM"), Some("value"));
        assert_eq!(headers.first("missing"), None);
    }

    #[test]
    fn test_request_id_is_v7() {
        let id = RequestId::new();
        assert_eq!(id.as_ref().get_version_num(), 7);
    }

    #[test]
    fn test_route_prefix_validation() {
        assert!(RoutePrefix::try_new("/my-service".to_string()).is_ok());
        assert!(RoutePrefix::try_new("my-service".to_string()).is_err());
        assert!(RoutePrefix::try_new("/".to_string()).is_err());
        assert!(RoutePrefix::try_new("/api/".to_string()).is_err());
    }

    #[test]
    fn test_target_url_validation() {
        assert!(TargetUrl::try_new("http://localhost:3000".to_string()).is_ok());
        assert!(TargetUrl::try_new("https://api.example.com".to_string()).is_ok());
        assert!(TargetUrl::try_new("ftp://example.com".to_string()).is_err());
    }

    #[test]
    fn test_proxy_config_default() {
        let config = ProxyConfig::default();
        assert_eq!(config.route_prefix.as_ref(), "/my-service");
        assert!(config.upstream_url.as_ref().starts_with("https://"));
    }
}
