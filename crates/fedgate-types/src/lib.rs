//! Shared types for the fedgate federation gateway.
//!
//! This crate holds the data model every other fedgate crate agrees on:
//! the configured federation peers ([`RemoteNode`], [`NodeRegistry`]), the
//! resolved data-plane access pair ([`Channel`]), the record kinds the
//! gateway knows how to merge ([`RecordKind`]) and the identifier namespace
//! arithmetic that keeps remote records from colliding with local ones.
//!
//! Nothing here performs I/O. The namespace functions in particular are pure
//! so the request router can decode a merged identifier without re-fetching
//! anything.

pub mod namespace;
pub mod node;
pub mod record;

pub use namespace::{
    decode, encode, is_local, NamespacedId, MAX_MERGED_ID, MAX_NODE_ID, NAMESPACE_MULTIPLIER,
};
pub use node::{NodeRegistry, RegistryError, RemoteNode};
pub use record::RecordKind;

use serde::{Deserialize, Serialize};
use std::fmt;

/// A resolved data-plane access pair.
///
/// Usable until the remote revokes or expires it. There is no expiry
/// timestamp; expiry is detected when the data plane answers 401/403.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Base URL of the provider's data plane.
    pub endpoint: String,
    /// Value sent verbatim in the `Authorization` header.
    pub authorization: String,
}

impl Channel {
    pub fn new(endpoint: impl Into<String>, authorization: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            authorization: authorization.into(),
        }
    }

    /// Joins a resource path onto the channel endpoint.
    pub fn url_for(&self, resource_path: &str) -> String {
        join_url(&self.endpoint, resource_path)
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("endpoint", &self.endpoint)
            .field("authorization", &"[REDACTED]")
            .finish()
    }
}

/// Joins `base` and `path` with exactly one `/` between them.
///
/// `path` may carry a query string; it is kept as is.
pub fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.is_empty() {
        return base.to_string();
    }
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}
