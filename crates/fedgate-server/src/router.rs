//! Classification of inbound requests.
//!
//! Pure: decides where a request goes from its method, resource path and
//! the node registry alone. Dispatch happens in [`crate::api`].

use crate::api::GatewayError;
use axum::http::Method;
use fedgate_types::{namespace, NodeRegistry, RecordKind, RemoteNode};

/// Record kinds with a merged listing, in matching order.
const MERGED_KINDS: [RecordKind; 2] = [RecordKind::Source, RecordKind::CohortDefinition];

/// Path segment that marks a long-running remote operation.
const JOB_SEGMENT: &str = "generate";

/// A request to be dispatched through a node's data-plane channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederatedCall {
    pub node_id: u64,
    /// Resource path in the form the origin expects.
    pub path: String,
    /// Acknowledge immediately instead of waiting for the origin.
    pub job: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Merged listing of local and remote records.
    Listing(RecordKind),
    /// One remote record by merged id.
    SingleRecord {
        kind: RecordKind,
        node_id: u64,
        local_id: u64,
    },
    Federated(FederatedCall),
    /// Forward to the local backend unchanged.
    Passthrough,
}

/// A merged id found at a record position of the path.
struct RecordRef {
    kind: RecordKind,
    node_id: u64,
    local_id: u64,
    /// The path is exactly `{listing}/{id}`.
    whole: bool,
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Finds a record id that decodes to a remote node.
///
/// Only the segment directly after a listing path is read as an id, so
/// unrelated numbers elsewhere in a local path are never mistaken for one.
fn remote_record_ref(
    path: &[&str],
    registry: &NodeRegistry,
) -> Result<Option<RecordRef>, GatewayError> {
    for kind in MERGED_KINDS {
        let prefix = segments(kind.listing_path());
        if path.len() <= prefix.len() || path[..prefix.len()] != prefix[..] {
            continue;
        }
        let Ok(id) = path[prefix.len()].parse::<u64>() else {
            continue;
        };
        let Some(decoded) = namespace::decode(id) else {
            continue;
        };
        if registry.by_id(decoded.node_id).is_none() {
            return Err(GatewayError::NotFound(format!(
                "record {id} belongs to unknown node {}",
                decoded.node_id
            )));
        }
        return Ok(Some(RecordRef {
            kind,
            node_id: decoded.node_id,
            local_id: decoded.local_id,
            whole: path.len() == prefix.len() + 1,
        }));
    }
    Ok(None)
}

/// Finds the node whose key appears as a path segment.
fn keyed_node(path: &[&str], registry: &NodeRegistry) -> Result<Option<u64>, GatewayError> {
    let mut found: Option<u64> = None;
    for node in path.iter().filter_map(|segment| registry.by_key(segment)) {
        match found {
            Some(node_id) if node_id != node.node_id => {
                return Err(GatewayError::BadRequest(
                    "path addresses more than one node".to_string(),
                ));
            }
            _ => found = Some(node.node_id),
        }
    }
    Ok(found)
}

/// Rewrites a client path into the path the node's origin expects.
///
/// The node key becomes the origin's own source key and merged ids of the
/// same node become their local ids. Everything else is kept.
pub fn rewrite_path(resource_path: &str, node: &RemoteNode) -> String {
    let rewritten: Vec<String> = segments(resource_path)
        .into_iter()
        .map(|segment| {
            if segment == node.node_key {
                return node.remote_source_key.clone();
            }
            segment
                .parse::<u64>()
                .ok()
                .and_then(namespace::decode)
                .filter(|decoded| decoded.node_id == node.node_id)
                .map(|decoded| decoded.local_id.to_string())
                .unwrap_or_else(|| segment.to_string())
        })
        .collect();
    format!("/{}", rewritten.join("/"))
}

/// Classifies a request by method and resource path.
///
/// # Errors
///
/// - [`GatewayError::NotFound`] if a merged id names an unconfigured node.
/// - [`GatewayError::BadRequest`] if the path addresses two different nodes.
pub fn classify(
    method: &Method,
    resource_path: &str,
    registry: &NodeRegistry,
) -> Result<Route, GatewayError> {
    let path = segments(resource_path);

    if *method == Method::GET {
        if let Some(kind) = MERGED_KINDS
            .into_iter()
            .find(|kind| segments(kind.listing_path()) == path)
        {
            return Ok(Route::Listing(kind));
        }
    }

    let record = remote_record_ref(&path, registry)?;
    let keyed = keyed_node(&path, registry)?;

    let node_id = match (&record, keyed) {
        (Some(record), Some(keyed)) if record.node_id != keyed => {
            return Err(GatewayError::BadRequest(format!(
                "record of node {} addressed through node {keyed}",
                record.node_id
            )));
        }
        (Some(record), _) => {
            if record.whole && keyed.is_none() && *method == Method::GET {
                return Ok(Route::SingleRecord {
                    kind: record.kind,
                    node_id: record.node_id,
                    local_id: record.local_id,
                });
            }
            record.node_id
        }
        (None, Some(keyed)) => keyed,
        (None, None) => return Ok(Route::Passthrough),
    };

    let Some(node) = registry.by_id(node_id) else {
        return Err(GatewayError::NotFound(format!("node {node_id}")));
    };
    Ok(Route::Federated(FederatedCall {
        node_id,
        path: rewrite_path(resource_path, node),
        job: path.contains(&JOB_SEGMENT),
    }))
}
