//! The client-side view of the lock service.
//! The lock runner talks through [`LockClient`]; the CLI provides an HTTP
//! implementation and [`LocalLockClient`] serves in-process callers.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::LockResult;
use crate::handler::LockHandler;
use crate::repository::LockDb;
use crate::types::{Resource, TypeFilter};

#[async_trait]
pub trait LockClient: Send + Sync {
    async fn acquire(&self, resource: &Resource, ttl_in_seconds: i64) -> LockResult<()>;

    async fn release(&self, resource: &Resource) -> LockResult<()>;

    async fn fetch(&self, key: &str) -> LockResult<Resource>;

    async fn fetch_all(&self, filter: &TypeFilter) -> LockResult<Vec<Resource>>;

    async fn count(&self, filter: &TypeFilter) -> LockResult<usize>;
}

#[async_trait]
impl<T: LockClient + ?Sized> LockClient for Arc<T> {
    async fn acquire(&self, resource: &Resource, ttl_in_seconds: i64) -> LockResult<()> {
        (**self).acquire(resource, ttl_in_seconds).await
    }

    async fn release(&self, resource: &Resource) -> LockResult<()> {
        (**self).release(resource).await
    }

    async fn fetch(&self, key: &str) -> LockResult<Resource> {
        (**self).fetch(key).await
    }

    async fn fetch_all(&self, filter: &TypeFilter) -> LockResult<Vec<Resource>> {
        (**self).fetch_all(filter).await
    }

    async fn count(&self, filter: &TypeFilter) -> LockResult<usize> {
        (**self).count(filter).await
    }
}

/// Calls a [`LockHandler`] in the same process, skipping any transport.
pub struct LocalLockClient<D> {
    handler: Arc<LockHandler<D>>,
}

impl<D> LocalLockClient<D> {
    pub fn new(handler: Arc<LockHandler<D>>) -> Self {
        Self { handler }
    }
}

impl<D> Clone for LocalLockClient<D> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
        }
    }
}

#[async_trait]
impl<D: LockDb + 'static> LockClient for LocalLockClient<D> {
    async fn acquire(&self, resource: &Resource, ttl_in_seconds: i64) -> LockResult<()> {
        self.handler.acquire(resource, ttl_in_seconds)
    }

    async fn release(&self, resource: &Resource) -> LockResult<()> {
        self.handler.release(resource)
    }

    async fn fetch(&self, key: &str) -> LockResult<Resource> {
        self.handler.fetch(key)
    }

    async fn fetch_all(&self, filter: &TypeFilter) -> LockResult<Vec<Resource>> {
        self.handler.fetch_all(filter)
    }

    async fn count(&self, filter: &TypeFilter) -> LockResult<usize> {
        self.handler.count(filter)
    }
}
