//! Record kinds the gateway can merge, and the rewrite applied to remote ones.

use crate::node::RemoteNode;
use serde_json::Value;

/// A listable record type and the JSON fields that carry its identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// A data source (CDM database) registered on an origin.
    Source,
    /// A cohort definition.
    CohortDefinition,
}

impl RecordKind {
    /// Resource path of the listing endpoint on every origin.
    pub fn listing_path(self) -> &'static str {
        match self {
            Self::Source => "/source/sources",
            Self::CohortDefinition => "/cohortdefinition",
        }
    }

    pub fn id_field(self) -> &'static str {
        match self {
            Self::Source => "sourceId",
            Self::CohortDefinition => "id",
        }
    }

    pub fn name_field(self) -> &'static str {
        match self {
            Self::Source => "sourceName",
            Self::CohortDefinition => "name",
        }
    }

    /// Field holding a path token that must be swapped for the node key.
    pub fn key_field(self) -> Option<&'static str> {
        match self {
            Self::Source => Some("sourceKey"),
            Self::CohortDefinition => None,
        }
    }

    /// Reads the record's native id, if it is a non-negative integer.
    pub fn native_id(self, record: &Value) -> Option<u64> {
        record.get(self.id_field())?.as_u64()
    }

    /// Whether a remote record is exposed through `node` at all.
    ///
    /// A node stands for one origin source, so source listings only keep the
    /// entry whose key is the node's `remote_source_key`.
    pub fn is_exposed(self, node: &RemoteNode, record: &Value) -> bool {
        match self.key_field() {
            Some(key_field) => {
                record.get(key_field).and_then(Value::as_str) == Some(node.remote_source_key.as_str())
            }
            None => true,
        }
    }

    /// Rewrites a record fetched from `node` into its merged form.
    ///
    /// The id becomes the merged id, the name gets the node's display
    /// prefix, and a key field naming the origin's own token is replaced by
    /// the node key. Other fields pass through untouched. Returns `None` when
    /// the record is not an object or its id cannot be minted.
    pub fn rewrite_remote(self, node: &RemoteNode, mut record: Value) -> Option<Value> {
        let local_id = self.native_id(&record)?;
        let merged_id = node.merged_id(local_id)?;
        let object = record.as_object_mut()?;

        object.insert(self.id_field().to_string(), Value::from(merged_id));

        let name = object
            .get(self.name_field())
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        object.insert(
            self.name_field().to_string(),
            Value::String(node.display_label(&name)),
        );

        if let Some(key_field) = self.key_field() {
            let names_origin = object
                .get(key_field)
                .and_then(Value::as_str)
                .is_some_and(|key| key == node.remote_source_key);
            if names_origin {
                object.insert(key_field.to_string(), Value::String(node.node_key.clone()));
            }
        }

        Some(record)
    }
}
