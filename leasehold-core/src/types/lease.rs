use serde::{Deserialize, Serialize};

use super::Resource;

/// A held [`Resource`] plus the metadata the expiry engine reasons about.
///
/// `(modified_index, modified_id)` is the lease's fencing token: the id names
/// the generation (minted when the key goes from unheld to held) and the
/// index counts writes to the key, including renewals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub resource: Resource,
    pub ttl_in_seconds: i64,
    pub modified_index: i64,
    pub modified_id: String,
}

impl Lease {
    pub fn key(&self) -> &str {
        &self.resource.key
    }

    pub fn owner(&self) -> &str {
        &self.resource.owner
    }

    /// True when both leases carry the same fencing token.
    pub fn same_generation_and_index(&self, other: &Lease) -> bool {
        self.modified_index == other.modified_index && self.modified_id == other.modified_id
    }
}
