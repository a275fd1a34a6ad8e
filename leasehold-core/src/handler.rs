//! Request routing for the lock service.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info_span};

use crate::error::{LockError, LockResult};
use crate::lock_pick::LockPick;
use crate::repository::LockDb;
use crate::types::{Resource, TypeFilter};

/// Validates requests, writes through the repository and arms the expiry
/// engine for every lease it writes.
pub struct LockHandler<D> {
    db: Arc<D>,
    lock_pick: LockPick<D>,
    exit_tx: Option<mpsc::Sender<()>>,
}

impl<D: LockDb + 'static> LockHandler<D> {
    pub fn new(db: Arc<D>, lock_pick: LockPick<D>) -> Self {
        Self {
            db,
            lock_pick,
            exit_tx: None,
        }
    }

    /// Signals `exit_tx` (without blocking) when the store reports an
    /// unrecoverable error.
    pub fn with_exit_channel(mut self, exit_tx: mpsc::Sender<()>) -> Self {
        self.exit_tx = Some(exit_tx);
        self
    }

    pub fn lock_pick(&self) -> &LockPick<D> {
        &self.lock_pick
    }

    fn exit_if_unrecoverable(&self, err: &LockError) {
        if !err.is_unrecoverable() {
            return;
        }
        error!(error = %err, "unrecoverable-error");
        if let Some(exit_tx) = &self.exit_tx {
            let _ = exit_tx.try_send(());
        }
    }

    /// Writes the lease and arms its expiry timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn acquire(&self, resource: &Resource, ttl_in_seconds: i64) -> LockResult<()> {
        let _span = info_span!("lock", key = %resource.key, owner = %resource.owner).entered();
        debug!("started");

        if let Err(err) = resource.validate_type() {
            error!(
                lock_type = %resource.resource_type,
                type_code = i32::from(resource.type_code),
                "invalid-request"
            );
            return Err(err);
        }
        if ttl_in_seconds <= 0 {
            error!(error = %LockError::InvalidTtl, "failed-locking-lock");
            return Err(LockError::InvalidTtl);
        }
        if resource.owner.is_empty() {
            error!(error = %LockError::InvalidOwner, "failed-locking-lock");
            return Err(LockError::InvalidOwner);
        }

        let lease = self.db.acquire(resource, ttl_in_seconds).inspect_err(|err| {
            self.exit_if_unrecoverable(err);
            if *err != LockError::LockCollision {
                error!(error = %err, "failed-locking-lock");
            }
        })?;

        self.lock_pick.register_ttl(&lease);
        debug!("complete");
        Ok(())
    }

    pub fn release(&self, resource: &Resource) -> LockResult<()> {
        let _span = info_span!("release", key = %resource.key, owner = %resource.owner).entered();

        self.db
            .release(resource)
            .inspect_err(|err| self.exit_if_unrecoverable(err))
    }

    pub fn fetch(&self, key: &str) -> LockResult<Resource> {
        let _span = info_span!("fetch", key = %key).entered();

        self.db
            .fetch(key)
            .map(|lease| lease.resource)
            .inspect_err(|err| self.exit_if_unrecoverable(err))
    }

    pub fn fetch_all(&self, filter: &TypeFilter) -> LockResult<Vec<Resource>> {
        let _span = info_span!("fetch-all").entered();

        if let Err(err) = filter.validate() {
            error!(
                lock_type = %filter.resource_type,
                type_code = i32::from(filter.type_code),
                "invalid-request"
            );
            return Err(err);
        }

        let leases = self
            .db
            .fetch_all(filter)
            .inspect_err(|err| self.exit_if_unrecoverable(err))?;
        Ok(leases.into_iter().map(|lease| lease.resource).collect())
    }

    pub fn count(&self, filter: &TypeFilter) -> LockResult<usize> {
        let _span = info_span!("count").entered();

        self.db
            .count(filter)
            .inspect_err(|err| self.exit_if_unrecoverable(err))
    }
}
