//! Liveness check and service banner.

use axum::http::StatusCode;

/// Plain-text banner served at `/`.
pub const BANNER: &str = concat!(
    "git-poller ",
    env!("CARGO_PKG_VERSION"),
    ": watches git branches and publishes their pipelines\n"
);

/// Health check handler.
///
/// Returns 200 OK with the text "OK".
///
/// # Example
///
/// ```ignore
/// GET /health HTTP/1.1
///
/// HTTP/1.1 200 OK
/// Content-Type: text/plain
///
/// OK
/// ```
pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

pub async fn root_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, BANNER)
}
