//! Identifier namespacing for merged listings.
//!
//! Remote records are exposed under `merged_id = node_id * NAMESPACE_MULTIPLIER + local_id`.
//! Local records keep their native identifier, which must stay below
//! [`NAMESPACE_MULTIPLIER`]. Node ids start at 1, so every minted id is at
//! least `NAMESPACE_MULTIPLIER` and the two ranges never overlap.

use serde::{Deserialize, Serialize};

/// Width of the per-node identifier space.
///
/// Must exceed the largest identifier any origin hands out.
pub const NAMESPACE_MULTIPLIER: u64 = 1_000_000;

/// Largest merged id a JSON client can read back exactly (2^53 - 1).
///
/// JavaScript numbers are IEEE-754 doubles; ids above this lose precision
/// in a browser.
pub const MAX_MERGED_ID: u64 = (1 << 53) - 1;

/// Largest node id whose whole id space stays at or below [`MAX_MERGED_ID`].
pub const MAX_NODE_ID: u64 = (MAX_MERGED_ID - (NAMESPACE_MULTIPLIER - 1)) / NAMESPACE_MULTIPLIER;

/// A merged identifier split back into its origin node and origin-local id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamespacedId {
    pub node_id: u64,
    pub local_id: u64,
}

/// Mints the merged identifier for a remote record.
///
/// Returns `None` when the pair cannot be represented without ambiguity:
/// node id 0 (reserved for the local range), a local id outside the
/// per-node space, or a result above [`MAX_MERGED_ID`].
pub fn encode(node_id: u64, local_id: u64) -> Option<u64> {
    if node_id == 0 || local_id >= NAMESPACE_MULTIPLIER {
        return None;
    }
    node_id
        .checked_mul(NAMESPACE_MULTIPLIER)?
        .checked_add(local_id)
        .filter(|&id| id <= MAX_MERGED_ID)
}

/// Splits a merged identifier. Returns `None` for ids in the local range.
pub fn decode(merged_id: u64) -> Option<NamespacedId> {
    if is_local(merged_id) {
        return None;
    }
    Some(NamespacedId {
        node_id: merged_id / NAMESPACE_MULTIPLIER,
        local_id: merged_id % NAMESPACE_MULTIPLIER,
    })
}

/// Whether an identifier belongs to the local backend's native range.
pub fn is_local(id: u64) -> bool {
    id < NAMESPACE_MULTIPLIER
}
