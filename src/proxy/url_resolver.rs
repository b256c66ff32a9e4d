//! Target URL resolution and prefix rewriting for proxied requests

use crate::proxy::headers::paths;
use crate::proxy::types::{ProxyError, ProxyResult, RoutePrefix, TargetUrl};
use hyper::Uri;

/// Strategy for selecting proxied requests and composing upstream URIs
pub struct UrlResolver;

impl UrlResolver {
    /// Whether `path` falls under the proxied route prefix
    ///
    /// `/my-service` and `/my-service/...` match; `/my-service-x` does not.
    pub fn matches(prefix: &RoutePrefix, path: &str) -> bool {
        match path.strip_prefix(prefix.as_ref()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/') || rest.starts_with('?'),
            None => false,
        }
    }

    /// Resolve the outgoing URI: strip the route prefix from the original
    /// path and join the remainder (plus query) to the upstream base.
    pub fn resolve_upstream_uri(
        upstream: &TargetUrl,
        prefix: &RoutePrefix,
        original: &Uri,
    ) -> ProxyResult<Uri> {
        let path_and_query = original
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or(paths::DEFAULT);

        let stripped = path_and_query
            .strip_prefix(prefix.as_ref())
            .ok_or_else(|| {
                ProxyError::Internal(format!(
                    "Request path '{path_and_query}' does not match route prefix '{prefix}'",
                    prefix = prefix.as_ref()
                ))
            })?;

        let rewritten = if stripped.is_empty() {
            paths::DEFAULT.to_string()
        } else if stripped.starts_with('?') {
            format!("{}{stripped}", paths::DEFAULT)
        } else {
            stripped.to_string()
        };

        let final_uri = format!("{}{rewritten}", upstream.as_ref().trim_end_matches('/'));
        final_uri
            .parse()
            .map_err(|_| ProxyError::InvalidUpstreamUrl(final_uri))
    }
}
