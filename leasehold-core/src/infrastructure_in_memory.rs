use crate::error::StoreResult;
use crate::infrastructure::{LeaseRow, LeaseStore, RowFilter, StoreTx};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// A lease store held in process memory.
///
/// Transactions are serialized by a single mutex and work on a copy of the
/// table that replaces the live one on commit. Clones share the same table,
/// which lets several components (or simulated replicas) see one store.
#[derive(Clone, Default)]
pub struct InMemoryLeaseStore {
    rows: Arc<Mutex<BTreeMap<String, LeaseRow>>>,
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a row outside of any repository logic. Test setup only.
    pub fn insert_raw(&self, row: LeaseRow) {
        let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        rows.insert(row.path.clone(), row);
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct InMemoryTx {
    rows: BTreeMap<String, LeaseRow>,
}

impl StoreTx for InMemoryTx {
    fn one(&mut self, path: &str) -> StoreResult<Option<LeaseRow>> {
        Ok(self.rows.get(path).cloned())
    }

    fn all(&mut self, filter: &RowFilter) -> StoreResult<Vec<LeaseRow>> {
        Ok(self
            .rows
            .values()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect())
    }

    fn count(&mut self, filter: &RowFilter) -> StoreResult<usize> {
        Ok(self.rows.values().filter(|row| filter.matches(row)).count())
    }

    fn upsert(&mut self, row: &LeaseRow) -> StoreResult<()> {
        self.rows.insert(row.path.clone(), row.clone());
        Ok(())
    }

    fn delete(&mut self, path: &str) -> StoreResult<usize> {
        Ok(usize::from(self.rows.remove(path).is_some()))
    }
}

impl LeaseStore for InMemoryLeaseStore {
    fn transact(&self, f: &mut dyn FnMut(&mut dyn StoreTx) -> StoreResult<()>) -> StoreResult<()> {
        let mut live = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        let mut tx = InMemoryTx { rows: live.clone() };
        f(&mut tx)?;
        *live = tx.rows;
        Ok(())
    }
}
