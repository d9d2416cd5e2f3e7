//! Remote dispatch through negotiated data-plane channels.

use crate::api::GatewayError;
use crate::proxy::OriginResponse;
use axum::body::Bytes;
use axum::http::{header, HeaderMap, Method, StatusCode};
use fedgate_negotiation::{ChannelCache, ChannelLease, NegotiationClient};
use fedgate_types::{NodeRegistry, RecordKind, RemoteNode};
use serde_json::Value;
use std::time::Duration;

/// Request headers carried over to a remote data plane.
///
/// Credentials and cookies of the local session never leave the gateway;
/// the channel's own authorization replaces them.
const REMOTE_HEADERS: [header::HeaderName; 3] =
    [header::ACCEPT, header::CONTENT_TYPE, header::ACCEPT_LANGUAGE];

/// Everything needed to reach remote nodes.
pub struct Federation {
    registry: NodeRegistry,
    cache: ChannelCache,
    negotiator: NegotiationClient,
    client: reqwest::Client,
}

impl Federation {
    pub fn new(registry: NodeRegistry, negotiator: NegotiationClient, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            registry,
            cache: ChannelCache::new(),
            negotiator,
            client,
        }
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &ChannelCache {
        &self.cache
    }

    pub fn node(&self, node_id: u64) -> Result<&RemoteNode, GatewayError> {
        self.registry
            .by_id(node_id)
            .ok_or_else(|| GatewayError::NotFound(format!("node {node_id}")))
    }

    /// Returns the cached channel for `node`, negotiating one if needed.
    pub async fn channel_for(&self, node: &RemoteNode) -> Result<ChannelLease, GatewayError> {
        let negotiator = self.negotiator.clone();
        let target = node.clone();
        let lease = self
            .cache
            .get_or_create(&node.asset_id, move || async move {
                negotiator.obtain_channel(&target).await
            })
            .await?;
        Ok(lease)
    }

    /// Issues one data-plane call to `node`.
    ///
    /// Any origin answer is returned as is, except 401/403: those evict the
    /// channel and fail with [`GatewayError::ChannelRejected`] so the next
    /// request negotiates afresh.
    pub async fn call(
        &self,
        node: &RemoteNode,
        method: Method,
        path_and_query: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<OriginResponse, GatewayError> {
        let lease = self.channel_for(node).await?;
        let url = lease.channel.url_for(path_and_query);

        let mut outbound = HeaderMap::new();
        for name in REMOTE_HEADERS {
            if let Some(value) = headers.get(&name) {
                outbound.insert(name, value.clone());
            }
        }

        let mut request = self
            .client
            .request(method.clone(), &url)
            .headers(outbound)
            .header(header::AUTHORIZATION, &lease.channel.authorization);
        if !body.is_empty() {
            request = request.body(body);
        }

        let response = request.send().await.map_err(|e| {
            GatewayError::RemoteUnavailable(format!("{}: {e}", node.node_key))
        })?;

        if matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            tracing::info!(
                node_key = %node.node_key,
                status = %response.status(),
                "data plane rejected channel"
            );
            self.cache.invalidate(&lease);
            return Err(GatewayError::ChannelRejected(node.node_key.clone()));
        }

        tracing::debug!(
            %method,
            node_key = %node.node_key,
            status = %response.status(),
            "data-plane call"
        );
        OriginResponse::read(response)
            .await
            .map_err(|e| GatewayError::RemoteUnavailable(format!("{}: {e}", node.node_key)))
    }

    /// Fetches `node`'s listing of `kind`, restricted to what the node exposes.
    ///
    /// Records are returned as the origin sent them; namespacing happens in
    /// the merger.
    pub async fn fetch_list(
        &self,
        node: &RemoteNode,
        kind: RecordKind,
        query: Option<&str>,
    ) -> Result<Vec<Value>, GatewayError> {
        let path = match query {
            Some(q) if !q.is_empty() => format!("{}?{q}", kind.listing_path()),
            _ => kind.listing_path().to_string(),
        };
        let response = self
            .call(node, Method::GET, &path, &HeaderMap::new(), Bytes::new())
            .await?;
        if !response.is_success() {
            return Err(GatewayError::RemoteUnavailable(format!(
                "{} answered {} for {path}",
                node.node_key, response.status
            )));
        }

        match response.json() {
            Some(Value::Array(records)) => Ok(records
                .into_iter()
                .filter(|record| kind.is_exposed(node, record))
                .collect()),
            _ => Err(GatewayError::RemoteUnavailable(format!(
                "{} returned a malformed listing for {path}",
                node.node_key
            ))),
        }
    }
}
