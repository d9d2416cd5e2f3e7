//! HTTP handlers and the gateway's error type.

use crate::merge;
use crate::router::{classify, FederatedCall, Route};
use crate::AppState;
use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use fedgate_negotiation::{EntryStatus, NegotiationError};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;

/// Marks responses produced by the gateway itself rather than an origin.
pub const GATEWAY_ERROR_HEADER: &str = "x-fedgate-error";

/// Failures of the federation layer.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("negotiation failed: {0}")]
    Negotiation(#[from] NegotiationError),
    #[error("remote node {0} rejected the channel credential")]
    ChannelRejected(String),
    #[error("local backend unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("remote node unavailable: {0}")]
    RemoteUnavailable(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid request: {0}")]
    BadRequest(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Negotiation(NegotiationError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            Self::Negotiation(_) | Self::ChannelRejected(_) | Self::RemoteUnavailable(_) => {
                StatusCode::BAD_GATEWAY
            }
            Self::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(%status, error = %self, "federation request failed");
        }

        let body = Json(json!({
            "error": self.to_string(),
            "source": "gateway"
        }));
        (
            status,
            [(
                HeaderName::from_static(GATEWAY_ERROR_HEADER),
                HeaderValue::from_static("1"),
            )],
            body,
        )
            .into_response()
    }
}

/// Handler for `GET /health`.
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub node_id: u64,
    pub node_key: String,
    pub display_name: String,
    pub asset_id: String,
    pub channel_state: &'static str,
}

/// Handler for `GET /federation/nodes`.
pub async fn list_nodes_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Json<Vec<NodeStatus>> {
    let federation = &state.federation;
    let nodes = federation
        .registry()
        .nodes()
        .iter()
        .map(|node| NodeStatus {
            node_id: node.node_id,
            node_key: node.node_key.clone(),
            display_name: node.display_name.clone(),
            asset_id: node.asset_id.clone(),
            channel_state: match federation.cache().status(&node.asset_id) {
                None => "none",
                Some(EntryStatus::Pending) => "pending",
                Some(EntryStatus::Ready) => "ready",
            },
        })
        .collect();
    Json(nodes)
}

/// Provisional answer to a job-style federated operation.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionalJob {
    pub status: &'static str,
    pub federated: bool,
    pub node_key: String,
    pub tracking_id: uuid::Uuid,
    pub start_time: chrono::DateTime<chrono::Utc>,
}

/// Fallback handler: every request under the API prefix that no fixed route
/// claims.
pub async fn gateway_handler(
    Extension(state): Extension<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let resource_path = state
        .strip_prefix(uri.path())
        .ok_or_else(|| GatewayError::NotFound(uri.path().to_string()))?;
    let query = uri.query();
    let path_and_query = with_query(resource_path, query);

    let route = classify(&method, resource_path, state.federation.registry())?;
    tracing::debug!(%method, resource_path, ?route, "classified request");

    match route {
        Route::Passthrough => {
            let response = state
                .backend
                .forward(method, &path_and_query, &headers, body)
                .await?;
            Ok(response.into_response())
        }
        Route::Listing(kind) => {
            Ok(merge::merged_listing(&state, kind, &path_and_query, query, &headers).await)
        }
        Route::SingleRecord {
            kind,
            node_id,
            local_id,
        } => {
            let node = state.federation.node(node_id)?;
            merge::remote_record(&state.federation, node, kind, local_id, query).await
        }
        Route::Federated(call) => federated(state, method, call, query, headers, body).await,
    }
}

async fn federated(
    state: Arc<AppState>,
    method: Method,
    call: FederatedCall,
    query: Option<&str>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let node = state.federation.node(call.node_id)?.clone();
    let path_and_query = with_query(&call.path, query);

    if !call.job {
        let response = state
            .federation
            .call(&node, method, &path_and_query, &headers, body)
            .await?;
        return Ok(response.into_response());
    }

    let job = ProvisionalJob {
        status: "STARTING",
        federated: true,
        node_key: node.node_key.clone(),
        tracking_id: uuid::Uuid::new_v4(),
        start_time: chrono::Utc::now(),
    };
    let tracking_id = job.tracking_id;
    tokio::spawn(async move {
        match state
            .federation
            .call(&node, method, &path_and_query, &headers, body)
            .await
        {
            Ok(response) => tracing::info!(
                %tracking_id,
                node_key = %node.node_key,
                status = %response.status,
                "federated job dispatched"
            ),
            Err(e) => tracing::warn!(
                %tracking_id,
                node_key = %node.node_key,
                error = %e,
                "federated job dispatch failed"
            ),
        }
    });

    Ok((StatusCode::ACCEPTED, Json(job)).into_response())
}

fn with_query(path: &str, query: Option<&str>) -> String {
    match query {
        Some(q) if !q.is_empty() => format!("{path}?{q}"),
        _ => path.to_string(),
    }
}
