//! HTTP header constants and utilities for the proxy service
//!
//! This module centralizes all HTTP header names and header-related
//! constants used throughout the proxy service to ensure consistency
//! and make maintenance easier.

use ::http::header;

/// Header name for request ID used for tracing and correlation
pub const X_REQUEST_ID: &str = "x-request-id";

/// Standard header re-exports for convenience
pub use header::{CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, HOST, SET_COOKIE};

/// Well-known paths
pub mod paths {
    /// Default path when none is specified
    pub const DEFAULT: &str = "/";

    /// Health check endpoint path
    pub const HEALTH: &str = "/health";
}

/// Content-type substrings recognized by the body decoder
///
/// Matching is containment, not equality, so parameterized values such as
/// `application/json; charset=utf-8` still match.
pub mod content_types {
    pub const TEXT_PLAIN: &str = "text/plain";
    pub const JSON: &str = "application/json";
    pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";
    pub const MULTIPART_FORM_DATA: &str = "multipart/form-data";
}

/// Content-encoding values the codec understands
pub mod content_encodings {
    pub const GZIP: &str = "gzip";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_constants() {
        assert!(X_REQUEST_ID.starts_with("x-"));

        // Ensure paths are valid
        assert!(paths::DEFAULT.starts_with('/'));
        assert!(paths::HEALTH.starts_with('/'));

        // Content types are lowercase media types
        assert!(content_types::JSON.contains('/'));
        assert!(content_types::MULTIPART_FORM_DATA.starts_with("multipart/"));
    }
}
