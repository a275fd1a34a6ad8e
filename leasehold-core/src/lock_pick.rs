//! In-process TTL enforcement.
//!
//! Every registered lease generation gets one timer task. When the timer
//! fires, the lease is re-fetched and released only if its fencing token is
//! unchanged, so a renewal that lands while the timer is pending always wins.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, error, info, info_span, Instrument};

use crate::repository::LockDb;
use crate::types::{Lease, PRESENCE_TYPE};

/// `(key, modified_id)`: one entry per lease generation.
type WatchKey = (String, String);

struct Watcher {
    cancel: oneshot::Sender<()>,
    watched_index: i64,
}

/// Number of leases released because their TTL elapsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExpiryCounts {
    pub locks_expired: u64,
    pub presence_expired: u64,
}

#[derive(Default)]
struct ExpiryCounters {
    locks: AtomicU64,
    presence: AtomicU64,
}

impl ExpiryCounters {
    fn record(&self, lease_type: &str) {
        if lease_type == PRESENCE_TYPE {
            self.presence.fetch_add(1, Ordering::Relaxed);
        } else {
            self.locks.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Decrements the live-check gauge when a timer task ends, however it ends.
struct CheckGuard(Arc<AtomicUsize>);

impl CheckGuard {
    fn new(active: &Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self(active.clone())
    }
}

impl Drop for CheckGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The expiry engine. Cheap to clone; clones share the watcher table.
pub struct LockPick<D> {
    db: Arc<D>,
    watchers: Arc<Mutex<HashMap<WatchKey, Watcher>>>,
    counters: Arc<ExpiryCounters>,
    active_checks: Arc<AtomicUsize>,
}

impl<D> Clone for LockPick<D> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            watchers: self.watchers.clone(),
            counters: self.counters.clone(),
            active_checks: self.active_checks.clone(),
        }
    }
}

impl<D: LockDb + 'static> LockPick<D> {
    pub fn new(db: Arc<D>) -> Self {
        Self {
            db,
            watchers: Arc::new(Mutex::new(HashMap::new())),
            counters: Arc::new(ExpiryCounters::default()),
            active_checks: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn watchers(&self) -> MutexGuard<'_, HashMap<WatchKey, Watcher>> {
        self.watchers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Arms a timer for `lease` unless an equal or fresher one is already
    /// watching the same generation. A timer for an older index of the same
    /// generation is cancelled and replaced.
    ///
    /// Must be called from within a tokio runtime.
    pub fn register_ttl(&self, lease: &Lease) {
        let span = info_span!(
            "register-ttl",
            key = %lease.key(),
            owner = %lease.owner(),
            lock_type = %lease.resource.resource_type,
            modified_index = lease.modified_index,
            modified_id = %lease.modified_id,
        );
        let _entered = span.enter();

        let (cancel, cancelled) = oneshot::channel();
        let key: WatchKey = (lease.key().to_string(), lease.modified_id.clone());

        {
            let mut watchers = self.watchers();
            if let Some(existing) = watchers.get(&key) {
                if existing.watched_index >= lease.modified_index {
                    debug!(watched_index = existing.watched_index, "found-existing-check");
                    return;
                }
            }

            let watcher = Watcher {
                cancel,
                watched_index: lease.modified_index,
            };
            if let Some(old) = watchers.insert(key.clone(), watcher) {
                info!(watched_index = old.watched_index, "cancelling-old-check");
                let _ = old.cancel.send(());
            }
        }

        let lock_pick = self.clone();
        let lease = lease.clone();
        let guard = CheckGuard::new(&self.active_checks);
        tokio::spawn(
            async move {
                let _guard = guard;
                lock_pick.check_expiration(key, lease, cancelled).await;
            }
            .instrument(span.clone()),
        );
    }

    async fn check_expiration(&self, key: WatchKey, lease: Lease, cancelled: oneshot::Receiver<()>) {
        let ttl = Duration::from_secs(lease.ttl_in_seconds.max(0) as u64);

        tokio::select! {
            _ = cancelled => {
                debug!("check-cancelled");
                return;
            }
            _ = tokio::time::sleep(ttl) => {}
        }

        {
            let mut watchers = self.watchers();
            if watchers
                .get(&key)
                .is_some_and(|w| w.watched_index == lease.modified_index)
            {
                watchers.remove(&key);
            }
        }

        let current = match self.db.fetch(lease.key()) {
            Ok(current) => current,
            Err(err) => {
                debug!(error = %err, "lock-already-gone");
                return;
            }
        };

        if !current.same_generation_and_index(&lease) {
            debug!(
                current_index = current.modified_index,
                current_id = %current.modified_id,
                "lock-renewed"
            );
            return;
        }

        self.counters.record(&lease.resource.resource_type);
        info!("lock-expired");

        if let Err(err) = self.db.release(&lease.resource) {
            error!(error = %err, "failed-to-expire-lock");
        }
    }

    /// Generations currently being watched.
    pub fn watcher_count(&self) -> usize {
        self.watchers().len()
    }

    /// Timer tasks that have not yet finished.
    pub fn active_checks(&self) -> usize {
        self.active_checks.load(Ordering::SeqCst)
    }

    pub fn expired_counts(&self) -> ExpiryCounts {
        ExpiryCounts {
            locks_expired: self.counters.locks.load(Ordering::Relaxed),
            presence_expired: self.counters.presence.load(Ordering::Relaxed),
        }
    }
}
