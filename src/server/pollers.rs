//! `/pollers` endpoint handlers.
//!
//! Pollers are addressed by `(remote, branch)`; the registry key is derived
//! from the pair and split back apart for listing.

use std::collections::HashMap;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error};

use super::AppState;
use crate::control::ControlError;
use crate::types::Target;

/// Errors from the `/pollers` endpoints.
#[derive(Debug, Error)]
pub enum PollersError {
    /// Request body is not a `{remote, branch}` object.
    #[error("invalid request body: {0}")]
    InvalidBody(#[from] serde_json::Error),

    /// Query parameter absent or empty.
    #[error("missing \"{0}\" query parameter")]
    MissingParam(&'static str),

    /// A registry key could not be split into remote and branch.
    #[error("malformed poller key {0:?}")]
    MalformedKey(String),

    #[error(transparent)]
    Control(#[from] ControlError),
}

impl IntoResponse for PollersError {
    fn into_response(self) -> Response {
        let status = match &self {
            PollersError::InvalidBody(_) => StatusCode::BAD_REQUEST,
            PollersError::MissingParam(_) => StatusCode::BAD_REQUEST,
            PollersError::Control(ControlError::EmptyField(_)) => StatusCode::BAD_REQUEST,
            PollersError::Control(ControlError::ContainsDelimiter(_)) => StatusCode::BAD_REQUEST,
            PollersError::MalformedKey(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PollersError::Control(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!(error = %self, "Request failed");
        } else {
            debug!(error = %self, "Rejected request");
        }

        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

/// `POST /pollers` body.
#[derive(Debug, Deserialize)]
struct CreatePoller {
    remote: String,
    branch: String,
}

/// Lists watched targets.
///
/// # Response
///
/// - 200 OK: `[{"remote": .., "branch": ..}, ..]`, sorted by key
/// - 500 Internal Server Error: pool unavailable or a malformed key
pub async fn list_pollers_handler(
    State(app_state): State<AppState>,
) -> Result<Json<Vec<Target>>, PollersError> {
    let keys = app_state.control().list().await?;
    let targets = keys
        .into_iter()
        .map(|key| key.target().ok_or(PollersError::MalformedKey(key.0)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(targets))
}

/// Starts watching a target. Already-watched targets are left alone.
///
/// # Response
///
/// - 202 Accepted
/// - 400 Bad Request: malformed body, empty field or `#` in the remote
/// - 500 Internal Server Error: pool unavailable
pub async fn create_poller_handler(
    State(app_state): State<AppState>,
    body: Bytes,
) -> Result<StatusCode, PollersError> {
    let request: CreatePoller = serde_json::from_slice(&body)?;
    let target = Target::new(request.remote, request.branch);
    app_state.control().create(&target).await?;
    Ok(StatusCode::ACCEPTED)
}

/// Stops watching a target. Unknown targets are accepted as a no-op.
///
/// # Response
///
/// - 202 Accepted
/// - 400 Bad Request: `remote` or `branch` missing or empty
/// - 500 Internal Server Error: pool unavailable
pub async fn delete_poller_handler(
    State(app_state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<StatusCode, PollersError> {
    let remote = required_param(&params, "remote")?;
    let branch = required_param(&params, "branch")?;
    app_state
        .control()
        .delete(&Target::new(remote, branch))
        .await?;
    Ok(StatusCode::ACCEPTED)
}

fn required_param<'a>(
    params: &'a HashMap<String, String>,
    name: &'static str,
) -> Result<&'a str, PollersError> {
    params
        .get(name)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or(PollersError::MissingParam(name))
}
