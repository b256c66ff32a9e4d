//! Glasswire - a recording reverse proxy
//!
//! Forwards HTTP traffic under a configured route prefix to an upstream
//! target while an inspection layer produces one structured, correlated log
//! record per proxied exchange, with bodies decoded regardless of content
//! type or compression. Everything else (static files, 404s) is served from
//! the site root.

pub mod application;
pub mod config;
pub mod error;
pub mod proxy;
pub mod site;

pub use application::Application;
pub use error::{Error, Result};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_functionality() {
        // Basic smoke test to ensure the library compiles and basic types work
        let result: Result<()> = Ok(());
        assert!(result.is_ok());
    }
}
