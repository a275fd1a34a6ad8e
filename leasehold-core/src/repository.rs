//! The four coordination verbs, enforced against a [`LeaseStore`].

use std::sync::Arc;

use tracing::{debug, error, info, info_span};

use crate::error::{LockError, LockResult};
use crate::infrastructure::{LeaseRow, LeaseStore, RowFilter};
use crate::types::{Lease, Resource, TypeFilter};

/// Repository contract consumed by the expiry engine, reconciler and handler.
pub trait LockDb: Send + Sync {
    /// Acquire or renew `resource` for its owner.
    fn acquire(&self, resource: &Resource, ttl_in_seconds: i64) -> LockResult<Lease>;

    /// Delete the lease if `resource.owner` holds it.
    fn release(&self, resource: &Resource) -> LockResult<()>;

    fn fetch(&self, key: &str) -> LockResult<Lease>;

    fn fetch_all(&self, filter: &TypeFilter) -> LockResult<Vec<Lease>>;

    fn count(&self, filter: &TypeFilter) -> LockResult<usize>;
}

impl<T: LockDb + ?Sized> LockDb for Arc<T> {
    fn acquire(&self, resource: &Resource, ttl_in_seconds: i64) -> LockResult<Lease> {
        (**self).acquire(resource, ttl_in_seconds)
    }

    fn release(&self, resource: &Resource) -> LockResult<()> {
        (**self).release(resource)
    }

    fn fetch(&self, key: &str) -> LockResult<Lease> {
        (**self).fetch(key)
    }

    fn fetch_all(&self, filter: &TypeFilter) -> LockResult<Vec<Lease>> {
        (**self).fetch_all(filter)
    }

    fn count(&self, filter: &TypeFilter) -> LockResult<usize> {
        (**self).count(filter)
    }
}

/// Mints a fresh generation id for a key going from unheld to held.
fn next_modified_id() -> String {
    nanoid::nanoid!()
}

fn lease_from_row(row: LeaseRow) -> Lease {
    Lease {
        resource: Resource::new(row.path, row.owner, row.value, row.lease_type),
        ttl_in_seconds: row.ttl,
        modified_index: row.modified_index,
        modified_id: row.modified_id,
    }
}

fn held_filter(filter: &TypeFilter) -> RowFilter {
    RowFilter {
        lease_type: filter.effective_type().map(str::to_string),
        held_only: true,
    }
}

/// Lock repository over any [`LeaseStore`]. Every call runs in exactly one
/// store transaction.
pub struct LockRepository<S> {
    store: S,
}

impl<S: LeaseStore> LockRepository<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: LeaseStore> LockDb for LockRepository<S> {
    fn acquire(&self, resource: &Resource, ttl_in_seconds: i64) -> LockResult<Lease> {
        let lease_type = resource.effective_type().to_string();
        let _span = info_span!(
            "lock",
            key = %resource.key,
            owner = %resource.owner,
            lock_type = %lease_type,
        )
        .entered();

        let mut outcome: LockResult<Lease> = Err(LockError::ResourceNotFound);
        let result = self.store.transact(&mut |tx| {
            let existing = tx.one(&resource.key)?;

            let (index, modified_id, new_generation) = match existing {
                Some(row) if !row.owner.is_empty() => {
                    if row.owner != resource.owner {
                        debug!(holder = %row.owner, "lock-already-exists");
                        outcome = Err(LockError::LockCollision);
                        return Ok(());
                    }
                    (row.modified_index + 1, row.modified_id, false)
                }
                // An unheld row keeps counting writes but starts a new generation.
                Some(row) => (row.modified_index + 1, next_modified_id(), true),
                None => (1, next_modified_id(), true),
            };

            let row = LeaseRow {
                path: resource.key.clone(),
                owner: resource.owner.clone(),
                value: resource.value.clone(),
                lease_type: lease_type.clone(),
                modified_index: index,
                modified_id,
                ttl: ttl_in_seconds,
            };
            tx.upsert(&row)?;

            if new_generation {
                info!(modified_index = row.modified_index, modified_id = %row.modified_id, "acquired-lock");
            }
            outcome = Ok(lease_from_row(row));
            Ok(())
        });

        if let Err(err) = result {
            error!(error = %err, "failed-updating-lock");
            return Err(err.into());
        }
        outcome
    }

    fn release(&self, resource: &Resource) -> LockResult<()> {
        let _span = info_span!(
            "release-lock",
            key = %resource.key,
            owner = %resource.owner,
            lock_type = %resource.effective_type(),
        )
        .entered();

        let mut outcome: LockResult<()> = Ok(());
        let result = self.store.transact(&mut |tx| {
            outcome = match tx.one(&resource.key)? {
                Some(row) if !row.owner.is_empty() => {
                    if row.owner != resource.owner {
                        error!(holder = %row.owner, "cannot-release-lock");
                        Err(LockError::LockCollision)
                    } else {
                        tx.delete(&resource.key)?;
                        info!("released-lock");
                        Ok(())
                    }
                }
                _ => {
                    debug!("lock-not-found");
                    Err(LockError::ResourceNotFound)
                }
            };
            Ok(())
        });

        if let Err(err) = result {
            error!(error = %err, "failed-to-release-lock");
            return Err(err.into());
        }
        outcome
    }

    fn fetch(&self, key: &str) -> LockResult<Lease> {
        let _span = info_span!("fetch-lock", key = %key).entered();

        let mut found = None;
        self.store
            .transact(&mut |tx| {
                found = tx.one(key)?.filter(|row| !row.owner.is_empty());
                Ok(())
            })
            .map_err(|err| {
                error!(error = %err, "failed-to-fetch-lock");
                LockError::from(err)
            })?;

        found.map(lease_from_row).ok_or(LockError::ResourceNotFound)
    }

    fn fetch_all(&self, filter: &TypeFilter) -> LockResult<Vec<Lease>> {
        let _span = info_span!("fetch-all-locks", lock_type = ?filter.effective_type()).entered();

        let row_filter = held_filter(filter);
        let mut rows = Vec::new();
        self.store
            .transact(&mut |tx| {
                rows = tx.all(&row_filter)?;
                Ok(())
            })
            .map_err(|err| {
                error!(error = %err, "failed-to-fetch-locks");
                LockError::from(err)
            })?;

        Ok(rows.into_iter().map(lease_from_row).collect())
    }

    fn count(&self, filter: &TypeFilter) -> LockResult<usize> {
        let _span = info_span!("count-locks", lock_type = ?filter.effective_type()).entered();

        let row_filter = held_filter(filter);
        let mut count = 0;
        self.store
            .transact(&mut |tx| {
                count = tx.count(&row_filter)?;
                Ok(())
            })
            .map_err(|err| {
                error!(error = %err, "failed-to-count-locks");
                LockError::from(err)
            })?;

        Ok(count)
    }
}
