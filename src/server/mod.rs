//! HTTP control surface.
//!
//! # Endpoints
//!
//! - `GET /` - Service banner
//! - `GET /health` - Returns 200 if server is running
//! - `GET /pollers` - Lists watched `{remote, branch}` pairs
//! - `POST /pollers` - Starts watching `{remote, branch}` (returns 202 Accepted)
//! - `DELETE /pollers?remote=<r>&branch=<b>` - Stops watching (returns 202 Accepted)
//!
//! Every response carries an `x-request-id` header with the id the request was
//! logged under.

use std::sync::Arc;

use axum::extract::Request;
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use tracing::{Instrument, info, info_span};
use uuid::Uuid;

use crate::control::PollerControl;

pub mod health;
pub mod pollers;

pub use health::{health_handler, root_handler};
pub use pollers::{create_poller_handler, delete_poller_handler, list_pollers_handler};

/// Response header echoing the request id.
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Shared application state.
///
/// This is passed to all handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    control: PollerControl,
}

impl AppState {
    pub fn new(control: PollerControl) -> Self {
        AppState {
            inner: Arc::new(AppStateInner { control }),
        }
    }

    pub fn control(&self) -> &PollerControl {
        &self.inner.control
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::get;

    axum::Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route(
            "/pollers",
            get(list_pollers_handler)
                .post(create_poller_handler)
                .delete(delete_poller_handler),
        )
        .layer(axum::middleware::from_fn(request_id))
        .with_state(app_state)
}

/// Tags each request with a fresh id, logs it and echoes the id back.
async fn request_id(request: Request, next: Next) -> Response {
    let id = Uuid::new_v4().to_string();
    let span = info_span!(
        "request",
        request_id = %id,
        method = %request.method(),
        uri = %request.uri()
    );

    let mut response = async {
        info!("Request received");
        let response = next.run(request).await;
        info!(status = response.status().as_u16(), "Request finished");
        response
    }
    .instrument(span)
    .await;

    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
