use crate::error::StoreResult;

/// Name of the single table holding one row per lease key.
pub const LOCKS_TABLE: &str = "locks";

/// One physical row of the `locks` table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaseRow {
    pub path: String,
    pub owner: String,
    pub value: String,
    pub lease_type: String,
    pub modified_index: i64,
    pub modified_id: String,
    pub ttl: i64,
}

/// Row predicate for `all` and `count`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowFilter {
    /// Restrict to rows of this type.
    pub lease_type: Option<String>,
    /// Skip rows whose owner is empty. The repository always sets it; backends
    /// still honour `false` so empty-owner rows stay visible at the store level.
    pub held_only: bool,
}

impl RowFilter {
    pub fn matches(&self, row: &LeaseRow) -> bool {
        if self.held_only && row.owner.is_empty() {
            return false;
        }
        match &self.lease_type {
            Some(t) => row.lease_type == *t,
            None => true,
        }
    }
}

/// Operations available inside a store transaction.
pub trait StoreTx {
    fn one(&mut self, path: &str) -> StoreResult<Option<LeaseRow>>;

    fn all(&mut self, filter: &RowFilter) -> StoreResult<Vec<LeaseRow>>;

    fn count(&mut self, filter: &RowFilter) -> StoreResult<usize>;

    /// Insert the row, or overwrite every column of the row with the same path.
    fn upsert(&mut self, row: &LeaseRow) -> StoreResult<()>;

    /// Returns the number of rows removed.
    fn delete(&mut self, path: &str) -> StoreResult<usize>;
}

/// Defines the contract for lease storage backends.
///
/// `transact` runs `f` inside one transaction, committing when it returns
/// `Ok` and rolling back otherwise. Backends may re-run `f` when the store
/// reports transient contention, so `f` must not have side effects outside
/// the transaction other than recording its result.
pub trait LeaseStore: Send + Sync {
    fn transact(&self, f: &mut dyn FnMut(&mut dyn StoreTx) -> StoreResult<()>) -> StoreResult<()>;
}
