use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::client::LockClient;
use crate::error::{LockError, LockResult};
use crate::infrastructure_in_memory::InMemoryLeaseStore;
use crate::repository::{LockDb, LockRepository};
use crate::types::{Lease, Resource, TypeFilter};

pub type MemoryRepository = LockRepository<InMemoryLeaseStore>;

pub fn memory_repository() -> Arc<MemoryRepository> {
    Arc::new(LockRepository::new(InMemoryLeaseStore::new()))
}

pub fn lease(key: &str, owner: &str, lease_type: &str, index: i64, id: &str, ttl: i64) -> Lease {
    Lease {
        resource: Resource::new(key, owner, "value", lease_type),
        ttl_in_seconds: ttl,
        modified_index: index,
        modified_id: id.to_string(),
    }
}

/// Lets spawned tasks run and paused time auto-advance by `ms`.
pub async fn advance_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// A scripted [`LockDb`] that records the calls made against it.
pub struct FakeLockDb {
    pub acquire_result: Mutex<LockResult<Lease>>,
    pub fetch_result: Mutex<LockResult<Lease>>,
    pub fetch_all_result: Mutex<LockResult<Vec<Lease>>>,
    pub release_result: Mutex<LockResult<()>>,
    pub fetch_calls: AtomicUsize,
    pub fetch_all_calls: AtomicUsize,
    pub released: Mutex<Vec<Resource>>,
}

impl FakeLockDb {
    pub fn new() -> Self {
        Self {
            acquire_result: Mutex::new(Err(LockError::ResourceNotFound)),
            fetch_result: Mutex::new(Err(LockError::ResourceNotFound)),
            fetch_all_result: Mutex::new(Ok(Vec::new())),
            release_result: Mutex::new(Ok(())),
            fetch_calls: AtomicUsize::new(0),
            fetch_all_calls: AtomicUsize::new(0),
            released: Mutex::new(Vec::new()),
        }
    }

    pub fn set_fetch(&self, result: LockResult<Lease>) {
        *self.fetch_result.lock().unwrap() = result;
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn release_calls(&self) -> usize {
        self.released.lock().unwrap().len()
    }
}

impl LockDb for FakeLockDb {
    fn acquire(&self, _resource: &Resource, _ttl_in_seconds: i64) -> LockResult<Lease> {
        self.acquire_result.lock().unwrap().clone()
    }

    fn release(&self, resource: &Resource) -> LockResult<()> {
        self.released.lock().unwrap().push(resource.clone());
        self.release_result.lock().unwrap().clone()
    }

    fn fetch(&self, _key: &str) -> LockResult<Lease> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.fetch_result.lock().unwrap().clone()
    }

    fn fetch_all(&self, _filter: &TypeFilter) -> LockResult<Vec<Lease>> {
        self.fetch_all_calls.fetch_add(1, Ordering::SeqCst);
        self.fetch_all_result.lock().unwrap().clone()
    }

    fn count(&self, _filter: &TypeFilter) -> LockResult<usize> {
        self.fetch_all_result.lock().unwrap().clone().map(|l| l.len())
    }
}

/// A scripted [`LockClient`]. Acquire results are consumed in order; once
/// the script runs out every acquire succeeds. Release returns
/// `release_result`, or never completes when `release_hangs` is set.
#[derive(Default)]
pub struct FakeLockClient {
    pub acquire_script: Mutex<VecDeque<LockResult<()>>>,
    pub acquire_calls: AtomicUsize,
    pub release_calls: AtomicUsize,
    pub release_result: Mutex<Option<LockResult<()>>>,
    pub release_hangs: AtomicBool,
}

impl FakeLockClient {
    pub fn scripted(results: Vec<LockResult<()>>) -> Arc<Self> {
        Arc::new(Self {
            acquire_script: Mutex::new(results.into()),
            ..Self::default()
        })
    }

    pub fn fail_release(&self, err: LockError) {
        *self.release_result.lock().unwrap() = Some(Err(err));
    }

    pub fn hang_release(&self) {
        self.release_hangs.store(true, Ordering::SeqCst);
    }

    pub fn acquire_calls(&self) -> usize {
        self.acquire_calls.load(Ordering::SeqCst)
    }

    pub fn release_calls(&self) -> usize {
        self.release_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LockClient for FakeLockClient {
    async fn acquire(&self, _resource: &Resource, _ttl_in_seconds: i64) -> LockResult<()> {
        self.acquire_calls.fetch_add(1, Ordering::SeqCst);
        self.acquire_script.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }

    async fn release(&self, _resource: &Resource) -> LockResult<()> {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
        if self.release_hangs.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.release_result.lock().unwrap().clone().unwrap_or(Ok(()))
    }

    async fn fetch(&self, _key: &str) -> LockResult<Resource> {
        Err(LockError::ResourceNotFound)
    }

    async fn fetch_all(&self, _filter: &TypeFilter) -> LockResult<Vec<Resource>> {
        Ok(Vec::new())
    }

    async fn count(&self, _filter: &TypeFilter) -> LockResult<usize> {
        Ok(0)
    }
}
