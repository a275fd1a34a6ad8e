//! Client-side lease holder.
//!
//! A [`LockRunner`] acquires a lease, renews it every retry interval and
//! releases it when asked to shut down. In lock mode losing a held lease
//! ends the run with the error; in presence mode the runner keeps retrying.

use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::client::LockClient;
use crate::error::{LockError, LockResult};
use crate::signal::shutdown_requested;
use crate::types::Resource;

/// Default lease TTL for runners.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(15);
/// Default delay between acquire attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound on the best-effort release performed at shutdown.
pub const RELEASE_TIMEOUT: Duration = Duration::from_secs(5);

/// Retry intervals are raised to this so the runner never spins on the server.
pub const MIN_RETRY_INTERVAL: Duration = Duration::from_millis(1);

pub struct LockRunner<C> {
    client: C,
    resource: Resource,
    ttl_in_seconds: i64,
    retry_interval: Duration,
    exit_on_lost_lock: bool,
}

impl<C: LockClient> LockRunner<C> {
    pub fn new(
        client: C,
        resource: Resource,
        ttl_in_seconds: i64,
        retry_interval: Duration,
        exit_on_lost_lock: bool,
    ) -> Self {
        Self {
            client,
            resource,
            ttl_in_seconds,
            retry_interval: retry_interval.max(MIN_RETRY_INTERVAL),
            exit_on_lost_lock,
        }
    }

    /// A mutual-exclusion runner: losing the lease is fatal.
    pub fn lock(
        client: C,
        key: impl Into<String>,
        owner: impl Into<String>,
        value: impl Into<String>,
        ttl_in_seconds: i64,
        retry_interval: Duration,
    ) -> Self {
        Self::new(
            client,
            Resource::lock(key, owner, value),
            ttl_in_seconds,
            retry_interval,
            true,
        )
    }

    /// A liveness runner: losing the lease is logged and retried.
    pub fn presence(
        client: C,
        key: impl Into<String>,
        owner: impl Into<String>,
        value: impl Into<String>,
        ttl_in_seconds: i64,
        retry_interval: Duration,
    ) -> Self {
        Self::new(
            client,
            Resource::presence(key, owner, value),
            ttl_in_seconds,
            retry_interval,
            false,
        )
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// Holds the lease until `shutdown` fires. `ready` is signalled once, the
    /// first time the lease is acquired.
    pub async fn run(
        self,
        shutdown: watch::Receiver<bool>,
        ready: oneshot::Sender<()>,
    ) -> LockResult<()> {
        let span = info_span!(
            "lock-runner",
            key = %self.resource.key,
            owner = %self.resource.owner,
            lock_type = %self.resource.resource_type,
        );
        self.run_inner(shutdown, ready).instrument(span).await
    }

    async fn run_inner(
        self,
        mut shutdown: watch::Receiver<bool>,
        ready: oneshot::Sender<()>,
    ) -> LockResult<()> {
        let mut ready = Some(ready);
        let mut acquired = false;

        match self.client.acquire(&self.resource, self.ttl_in_seconds).await {
            Ok(()) => {
                info!("acquired-lock");
                acquired = true;
                signal_ready(&mut ready);
            }
            Err(err) => log_acquire_failure(&err),
        }

        let retry = tokio::time::sleep(self.retry_interval);
        tokio::pin!(retry);

        loop {
            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => {
                    self.release().await;
                    return Ok(());
                }
                _ = &mut retry => {
                    match self.client.acquire(&self.resource, self.ttl_in_seconds).await {
                        Err(err) if acquired => {
                            error!(error = %err, "lost-lock");
                            if self.exit_on_lost_lock {
                                return Err(err);
                            }
                            acquired = false;
                        }
                        Err(err) => log_acquire_failure(&err),
                        Ok(()) if !acquired => {
                            info!("acquired-lock");
                            signal_ready(&mut ready);
                            acquired = true;
                        }
                        Ok(()) => {}
                    }
                }
            }

            retry.as_mut().reset(Instant::now() + self.retry_interval);
        }
    }

    async fn release(&self) {
        match tokio::time::timeout(RELEASE_TIMEOUT, self.client.release(&self.resource)).await {
            Ok(Ok(())) => info!("released-lock"),
            Ok(Err(err)) => warn!(error = %err, "failed-to-release-lock"),
            Err(_) => warn!("timed-out-releasing-lock"),
        }
    }
}

fn signal_ready(ready: &mut Option<oneshot::Sender<()>>) {
    if let Some(ready) = ready.take() {
        let _ = ready.send(());
    }
}

fn log_acquire_failure(err: &LockError) {
    if *err == LockError::LockCollision {
        debug!("failed-to-acquire-lock");
    } else {
        error!(error = %err, "failed-to-acquire-lock");
    }
}
