//! Proxy traffic inspection and structured logging
//!
//! The forwarding engine (service) relays requests under the configured
//! prefix to the upstream target; the inspection layer around it emits one
//! correlated record per proxied exchange:
//!
//! - codec: reverses transport-level compression on buffered bodies
//! - decoder: best-effort structured decoding keyed by content type
//! - exchange: the correlated record and its assembly
//! - interceptor: per-call state machine driven by the forwarding engine
//! - lifecycle: one-line summary records for every inbound request
//! - sink: injected record destinations

pub mod codec;
pub mod decoder;
pub mod exchange;
pub mod headers;
pub mod interceptor;
pub mod lifecycle;
pub mod service;
pub mod sink;
pub mod types;
pub mod url_resolver;


pub use service::{build_router, ProxyService};
pub use types::{ProxyConfig, ProxyError, ProxyResult};
