//! Static site serving and 404 rendering
//!
//! Collaborator of the proxy, not part of the inspection layer: requests that
//! do not match the proxied route prefix land here. Files with an extension
//! are served from the site root with a long-lived cache header; everything
//! else falls back to the site index. Requests under `/node_modules/` and a
//! configured blocklist of self-serving routes are refused.

use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
};
use std::path::PathBuf;
use tower::util::ServiceExt;
use tower_http::services::ServeDir;
use tracing::warn;

/// Cache lifetime for static assets (one year)
const STATIC_CACHE_CONTROL: &str = "public, max-age=31536000";

const INDEX_FILE: &str = "index.html";

/// Static site handler configuration and state
pub struct Site {
    root: PathBuf,
    blocked_routes: Vec<String>,
}

impl Site {
    pub fn new(root: PathBuf, blocked_routes: Vec<String>) -> Self {
        Self {
            root,
            blocked_routes,
        }
    }

    /// Handle a non-proxied request
    pub async fn handle(&self, request: Request<Body>) -> Response {
        let path = request.uri().path().to_string();

        if path.starts_with("/node_modules/") {
            return (StatusCode::FORBIDDEN, "Access denied").into_response();
        }

        if self.blocked_routes.iter().any(|route| route == &path) {
            return not_found(&path);
        }

        if has_file_extension(&path) {
            return self.serve_file(request).await;
        }

        self.serve_index(&path).await
    }

    async fn serve_file(&self, request: Request<Body>) -> Response {
        let path = request.uri().path().to_string();
        match ServeDir::new(&self.root).oneshot(request).await {
            Ok(response) => {
                if response.status() == StatusCode::NOT_FOUND {
                    return not_found(&path);
                }
                let mut response = response.map(Body::new);
                response.headers_mut().insert(
                    header::CACHE_CONTROL,
                    HeaderValue::from_static(STATIC_CACHE_CONTROL),
                );
                response
            }
            Err(infallible) => match infallible {},
        }
    }

    async fn serve_index(&self, path: &str) -> Response {
        match tokio::fs::read_to_string(self.root.join(INDEX_FILE)).await {
            Ok(contents) => Html(contents).into_response(),
            Err(error) => {
                warn!(%error, request_path = %path, "Site index not available");
                not_found(path)
            }
        }
    }
}

/// Whether the final path segment names a file (contains a dot)
fn has_file_extension(path: &str) -> bool {
    path.rsplit('/')
        .next()
        .is_some_and(|segment| segment.contains('.') && !segment.starts_with('.'))
}

/// Render the 404 page, echoing the (escaped) request path
fn not_found(path: &str) -> Response {
    let page = format!(
        "<!DOCTYPE html>\n\
         <html lang=\"en\">\n\
         <head>\n\
           <meta charset=\"UTF-8\">\n\
           <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n\
           <title>404 Not Found</title>\n\
         </head>\n\
         <body>\n\
           <h1>404 Not Found</h1>\n\
           <p>The requested URL {} was not found on this server.</p>\n\
         </body>\n\
         </html>\n",
        escape_html(path)
    );
    (StatusCode::NOT_FOUND, Html(page)).into_response()
}

fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
