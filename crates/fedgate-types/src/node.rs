//! Federation peers and the process-wide registry of them.

use crate::namespace::{self, NamespacedId, MAX_NODE_ID};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// A federation peer whose records are merged into the gateway's namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteNode {
    /// Stable local integer; the high part of every merged id for this node.
    pub node_id: u64,
    /// Token that appears in client-facing paths for this node.
    pub node_key: String,
    /// Human-readable label, used to prefix merged record names.
    pub display_name: String,
    /// Asset identifier the remote registers on its control plane.
    #[serde(default)]
    pub asset_id: String,
    /// Token the origin itself expects where `node_key` appears in a path.
    pub remote_source_key: String,
    /// Dataspace protocol address of the provider connector.
    pub counter_party_address: String,
    /// Participant id of the provider connector.
    pub counter_party_id: String,
}

impl RemoteNode {
    /// Mints the merged id of one of this node's records.
    pub fn merged_id(&self, local_id: u64) -> Option<u64> {
        namespace::encode(self.node_id, local_id)
    }

    /// Prefixes a record name with this node's display name.
    pub fn display_label(&self, name: &str) -> String {
        format!("[{}] {}", self.display_name, name)
    }
}

/// Errors raised while validating the node registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("node id {0} is outside the namespace (must be between 1 and {max})", max = NodeRegistry::max_node_id())]
    NodeIdOutOfRange(u64),
    #[error("duplicate node id: {0}")]
    DuplicateNodeId(u64),
    #[error("duplicate node key: {0}")]
    DuplicateNodeKey(String),
    #[error("asset {0} is registered for more than one node")]
    DuplicateAssetId(String),
    #[error("node {0} has an empty {1}")]
    MissingField(String, &'static str),
}

/// The configured set of remote nodes.
///
/// Loaded once at startup and read-only afterwards; injected into the
/// components that need it rather than held in a global.
#[derive(Debug, Clone, Default)]
pub struct NodeRegistry {
    nodes: Vec<RemoteNode>,
    by_id: HashMap<u64, usize>,
    by_key: HashMap<String, usize>,
}

impl NodeRegistry {
    /// Builds a registry, rejecting nodes whose ids or keys would make the
    /// namespace ambiguous.
    pub fn new(nodes: Vec<RemoteNode>) -> Result<Self, RegistryError> {
        let mut by_id = HashMap::with_capacity(nodes.len());
        let mut by_key = HashMap::with_capacity(nodes.len());
        let mut assets = HashSet::with_capacity(nodes.len());

        for (index, node) in nodes.iter().enumerate() {
            if node.node_id == 0 || node.node_id > Self::max_node_id() {
                return Err(RegistryError::NodeIdOutOfRange(node.node_id));
            }
            if node.node_key.trim().is_empty() {
                return Err(RegistryError::MissingField(
                    node.node_id.to_string(),
                    "node_key",
                ));
            }
            if node.asset_id.trim().is_empty() {
                return Err(RegistryError::MissingField(node.node_key.clone(), "asset_id"));
            }
            if by_id.insert(node.node_id, index).is_some() {
                return Err(RegistryError::DuplicateNodeId(node.node_id));
            }
            if by_key.insert(node.node_key.clone(), index).is_some() {
                return Err(RegistryError::DuplicateNodeKey(node.node_key.clone()));
            }
            if !assets.insert(node.asset_id.as_str()) {
                return Err(RegistryError::DuplicateAssetId(node.asset_id.clone()));
            }
        }

        Ok(Self {
            nodes,
            by_id,
            by_key,
        })
    }

    /// Largest node id whose merged ids stay exact as JSON numbers.
    pub fn max_node_id() -> u64 {
        MAX_NODE_ID
    }

    pub fn nodes(&self) -> &[RemoteNode] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn by_id(&self, node_id: u64) -> Option<&RemoteNode> {
        self.by_id.get(&node_id).map(|&i| &self.nodes[i])
    }

    pub fn by_key(&self, node_key: &str) -> Option<&RemoteNode> {
        self.by_key.get(node_key).map(|&i| &self.nodes[i])
    }

    /// Reverse lookup of a merged id: the origin node and its local id.
    ///
    /// `None` when the id is in the local range or names an unknown node.
    pub fn resolve(&self, merged_id: u64) -> Option<(&RemoteNode, u64)> {
        let NamespacedId { node_id, local_id } = namespace::decode(merged_id)?;
        self.by_id(node_id).map(|node| (node, local_id))
    }
}
