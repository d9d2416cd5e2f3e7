//! Merging local and remote records into one collision-free view.

use crate::api::GatewayError;
use crate::federation::Federation;
use crate::AppState;
use axum::body::Bytes;
use axum::http::{header, HeaderMap, Method};
use axum::response::{IntoResponse, Response};
use axum::Json;
use fedgate_types::{is_local, RecordKind, RemoteNode};
use futures_util::future::join_all;
use serde_json::Value;

/// Concatenates local records (unchanged) with every node's records
/// rewritten into the merged namespace.
///
/// Remote records whose id cannot be minted are dropped. So are local
/// records whose id lies outside the local range: single-record routing
/// would send such an id to a remote node.
pub fn merge_records(
    kind: RecordKind,
    local: Vec<Value>,
    remote: Vec<(&RemoteNode, Vec<Value>)>,
) -> Vec<Value> {
    let mut merged: Vec<Value> = local
        .into_iter()
        .filter(|record| match kind.native_id(record) {
            Some(id) if !is_local(id) => {
                tracing::warn!(
                    ?kind,
                    id,
                    "dropping local record whose id overlaps the merged namespace"
                );
                false
            }
            _ => true,
        })
        .collect();
    for (node, records) in remote {
        for record in records {
            match kind.rewrite_remote(node, record) {
                Some(record) => merged.push(record),
                None => tracing::warn!(
                    node_key = %node.node_key,
                    ?kind,
                    "dropping remote record without a usable id"
                ),
            }
        }
    }
    merged
}

/// Serves a merged listing.
///
/// A node that fails contributes nothing and is logged. An unreachable
/// backend degrades the listing to remote records only; a backend that
/// answers with an error is forwarded as is.
pub async fn merged_listing(
    state: &AppState,
    kind: RecordKind,
    path_and_query: &str,
    query: Option<&str>,
    headers: &HeaderMap,
) -> Response {
    let mut local_headers = headers.clone();
    local_headers.remove(header::ACCEPT_ENCODING);

    let local = state
        .backend
        .forward(Method::GET, path_and_query, &local_headers, Bytes::new());
    let nodes = state.federation.registry().nodes();
    let remote = join_all(
        nodes
            .iter()
            .map(|node| state.federation.fetch_list(node, kind, query)),
    );
    let (local, remote) = tokio::join!(local, remote);

    let local_records = match local {
        Ok(response) if !response.is_success() => return response.into_response(),
        Ok(response) => match response.json() {
            Some(Value::Array(records)) => records,
            _ => return response.into_response(),
        },
        Err(e) => {
            tracing::warn!(
                ?kind,
                error = %e,
                "local listing unavailable, serving remote records only"
            );
            Vec::new()
        }
    };

    let remote_records = nodes
        .iter()
        .zip(remote)
        .filter_map(|(node, result)| match result {
            Ok(records) => Some((node, records)),
            Err(e) => {
                tracing::warn!(
                    node_key = %node.node_key,
                    error = %e,
                    "skipping node in merged listing"
                );
                None
            }
        })
        .collect();

    Json(merge_records(kind, local_records, remote_records)).into_response()
}

/// Fetches one remote record and rewrites it into its merged form.
///
/// A non-success answer from the origin is forwarded unchanged.
pub async fn remote_record(
    federation: &Federation,
    node: &RemoteNode,
    kind: RecordKind,
    local_id: u64,
    query: Option<&str>,
) -> Result<Response, GatewayError> {
    let mut path = format!("{}/{local_id}", kind.listing_path());
    if let Some(q) = query.filter(|q| !q.is_empty()) {
        path = format!("{path}?{q}");
    }
    let response = federation
        .call(node, Method::GET, &path, &HeaderMap::new(), Bytes::new())
        .await?;
    if !response.is_success() {
        return Ok(response.into_response());
    }

    let record = response.json().ok_or_else(|| {
        GatewayError::RemoteUnavailable(format!("{} returned a malformed record", node.node_key))
    })?;
    let merged = kind.rewrite_remote(node, record).ok_or_else(|| {
        GatewayError::RemoteUnavailable(format!(
            "{} returned a record without a usable id",
            node.node_key
        ))
    })?;
    Ok(Json(merged).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(node_id: u64, display_name: &str) -> RemoteNode {
        RemoteNode {
            node_id,
            node_key: format!("NODE_{node_id}"),
            display_name: display_name.to_string(),
            asset_id: format!("asset-{node_id}"),
            remote_source_key: "SYNPUF".to_string(),
            counter_party_address: "http://provider/protocol".to_string(),
            counter_party_id: "provider".to_string(),
        }
    }

    #[test]
    fn local_records_keep_ids_and_remote_ones_are_namespaced() {
        let remote = node(1001, "Node");
        let merged = merge_records(
            RecordKind::CohortDefinition,
            vec![json!({"id": 5, "name": "Local cohort"})],
            vec![(&remote, vec![json!({"id": 7, "name": "Diabetics"})])],
        );

        assert_eq!(
            merged,
            vec![
                json!({"id": 5, "name": "Local cohort"}),
                json!({"id": 1_001_000_007u64, "name": "[Node] Diabetics"}),
            ]
        );
    }

    #[test]
    fn records_from_several_nodes_never_collide() {
        let a = node(1, "A");
        let b = node(2, "B");
        let merged = merge_records(
            RecordKind::CohortDefinition,
            vec![json!({"id": 1})],
            vec![
                (&a, vec![json!({"id": 1, "name": "x"})]),
                (&b, vec![json!({"id": 1, "name": "x"})]),
            ],
        );
        let ids: Vec<u64> = merged.iter().map(|r| r["id"].as_u64().unwrap()).collect();
        assert_eq!(ids, vec![1, 1_000_001, 2_000_001]);
    }

    #[test]
    fn local_ids_in_the_merged_range_are_dropped() {
        let remote = node(1001, "Node");
        let merged = merge_records(
            RecordKind::CohortDefinition,
            vec![
                json!({"id": 1_001_000_007u64, "name": "local"}),
                json!({"id": 5, "name": "Local cohort"}),
            ],
            vec![(&remote, vec![json!({"id": 7, "name": "Diabetics"})])],
        );

        let ids: Vec<u64> = merged.iter().map(|r| r["id"].as_u64().unwrap()).collect();
        assert_eq!(ids, vec![5, 1_001_000_007]);
        assert_eq!(merged[1]["name"], "[Node] Diabetics");
    }

    #[test]
    fn unmintable_remote_records_are_dropped() {
        let remote = node(1001, "Node");
        let merged = merge_records(
            RecordKind::CohortDefinition,
            Vec::new(),
            vec![(
                &remote,
                vec![json!({"name": "no id"}), json!({"id": 3, "name": "ok"})],
            )],
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0]["id"], 1_001_000_003u64);
    }
}
