//! Periodic reconciliation of stored leases into the local expiry engine.
//!
//! Expiry state is process-local while leases may be written by any replica
//! sharing the store. Each sweep re-loads every lease and re-arms its timer;
//! [`LockPick::register_ttl`] ignores generations it is already watching at
//! the same or a newer index, so repeated sweeps are harmless.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::lock_pick::LockPick;
use crate::repository::LockDb;
use crate::signal::shutdown_requested;
use crate::types::TypeFilter;

/// Default time between sweeps.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(1);

/// Shorter intervals are raised to this; a tokio interval cannot be zero.
pub const MIN_RECONCILE_INTERVAL: Duration = Duration::from_millis(1);

pub struct Burglar<D> {
    db: Arc<D>,
    lock_pick: LockPick<D>,
    interval: Duration,
}

impl<D: LockDb + 'static> Burglar<D> {
    pub fn new(db: Arc<D>, lock_pick: LockPick<D>, interval: Duration) -> Self {
        if interval < MIN_RECONCILE_INTERVAL {
            warn!(interval_ms = interval.as_millis() as u64, "raising-reconcile-interval");
        }
        Self {
            db,
            lock_pick,
            interval: interval.max(MIN_RECONCILE_INTERVAL),
        }
    }

    /// Loads every held lease and registers its TTL. Returns how many leases
    /// were seen, or `None` when the store could not be read.
    pub fn sweep(&self) -> Option<usize> {
        match self.db.fetch_all(&TypeFilter::any()) {
            Ok(leases) => {
                for lease in &leases {
                    self.lock_pick.register_ttl(lease);
                }
                debug!(count = leases.len(), "swept-locks");
                Some(leases.len())
            }
            Err(err) => {
                error!(error = %err, "failed-to-fetch-locks");
                None
            }
        }
    }

    /// Sweeps once, signals `ready`, then sweeps on every tick until
    /// `shutdown` fires.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>, ready: oneshot::Sender<()>) {
        info!(interval_ms = self.interval.as_millis() as u64, "burglar-starting");
        self.sweep();
        let _ = ready.send(());
        info!("burglar-started");

        let start = tokio::time::Instant::now() + self.interval;
        let mut ticker = tokio::time::interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => {
                    info!("burglar-stopped");
                    return;
                }
                _ = ticker.tick() => {
                    self.sweep();
                }
            }
        }
    }
}
