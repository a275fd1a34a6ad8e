#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use crate::error::{LockError, StoreError};
    use crate::handler::LockHandler;
    use crate::lock_pick::LockPick;
    use crate::test_support::{memory_repository, FakeLockDb, MemoryRepository};
    use crate::types::{Resource, TypeCode, TypeFilter, LOCK_TYPE, PRESENCE_TYPE};

    fn handler() -> (Arc<MemoryRepository>, LockHandler<MemoryRepository>) {
        let repo = memory_repository();
        let handler = LockHandler::new(repo.clone(), LockPick::new(repo.clone()));
        (repo, handler)
    }

    fn unrecoverable() -> LockError {
        StoreError::Unrecoverable("no such table: locks".to_string()).into()
    }

    #[tokio::test]
    async fn test_acquire_writes_and_arms_expiry() {
        let (repo, handler) = handler();

        handler.acquire(&Resource::lock("k", "A", "addr"), 10).unwrap();

        assert_eq!(repo.store().len(), 1);
        assert_eq!(handler.lock_pick().watcher_count(), 1);
        assert_eq!(handler.fetch("k").unwrap(), Resource::lock("k", "A", "addr"));
    }

    #[tokio::test]
    async fn test_acquire_rejects_missing_ttl_before_store_access() {
        let (repo, handler) = handler();

        assert_eq!(
            handler.acquire(&Resource::lock("k", "A", ""), 0),
            Err(LockError::InvalidTtl)
        );
        assert_eq!(
            handler.acquire(&Resource::lock("k", "A", ""), -5),
            Err(LockError::InvalidTtl)
        );
        assert!(repo.store().is_empty());
    }

    #[tokio::test]
    async fn test_acquire_rejects_missing_owner_before_store_access() {
        let (repo, handler) = handler();

        assert_eq!(
            handler.acquire(&Resource::lock("k", "", ""), 10),
            Err(LockError::InvalidOwner)
        );
        assert!(repo.store().is_empty());
        assert_eq!(handler.lock_pick().watcher_count(), 0);
    }

    #[tokio::test]
    async fn test_acquire_validates_type() {
        let (_repo, handler) = handler();

        let cases = [
            (Resource::new("k", "A", "", "banana"), Err(LockError::InvalidType)),
            (Resource::new("k", "A", "", ""), Err(LockError::InvalidType)),
            (
                Resource::new("k", "A", "", LOCK_TYPE).with_type_code(TypeCode::Presence),
                Err(LockError::InvalidType),
            ),
            (Resource::new("k1", "A", "", PRESENCE_TYPE), Ok(())),
            (
                Resource::new("k2", "A", "", LOCK_TYPE).with_type_code(TypeCode::Lock),
                Ok(()),
            ),
            (Resource::new("k3", "A", "", "").with_type_code(TypeCode::Presence), Ok(())),
        ];

        for (resource, expected) in cases {
            assert_eq!(handler.acquire(&resource, 10), expected, "{resource:?}");
        }
    }

    #[tokio::test]
    async fn test_collision_is_returned_without_arming_expiry() {
        let (_repo, handler) = handler();
        handler.acquire(&Resource::lock("k", "A", ""), 10).unwrap();

        assert_eq!(
            handler.acquire(&Resource::lock("k", "B", ""), 10),
            Err(LockError::LockCollision)
        );
        assert_eq!(handler.lock_pick().watcher_count(), 1);
    }

    #[tokio::test]
    async fn test_release_fetch_and_count() {
        let (_repo, handler) = handler();
        handler.acquire(&Resource::lock("l", "A", ""), 10).unwrap();
        handler.acquire(&Resource::presence("p", "A", "addr"), 10).unwrap();

        assert_eq!(handler.count(&TypeFilter::any()).unwrap(), 2);
        assert_eq!(handler.count(&TypeFilter::of(PRESENCE_TYPE)).unwrap(), 1);

        handler.release(&Resource::lock("l", "A", "")).unwrap();

        assert_eq!(handler.fetch("l"), Err(LockError::ResourceNotFound));
        assert_eq!(
            handler.release(&Resource::lock("l", "A", "")),
            Err(LockError::ResourceNotFound)
        );
        assert_eq!(handler.count(&TypeFilter::any()).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_fetch_all_by_type_and_type_code() {
        let (_repo, handler) = handler();
        handler.acquire(&Resource::lock("l", "A", ""), 10).unwrap();
        handler.acquire(&Resource::presence("p", "A", "addr"), 10).unwrap();

        let presence = handler.fetch_all(&TypeFilter::of(PRESENCE_TYPE)).unwrap();
        assert_eq!(presence, vec![Resource::presence("p", "A", "addr")]);

        let locks = handler.fetch_all(&TypeFilter::of_code(TypeCode::Lock)).unwrap();
        assert_eq!(locks, vec![Resource::lock("l", "A", "")]);

        assert_eq!(handler.fetch_all(&TypeFilter::any()).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_all_rejects_invalid_type() {
        let (_repo, handler) = handler();

        assert_eq!(
            handler.fetch_all(&TypeFilter::of("banana")),
            Err(LockError::InvalidType)
        );
        let mismatched = TypeFilter {
            resource_type: LOCK_TYPE.to_string(),
            type_code: TypeCode::Presence,
        };
        assert_eq!(handler.fetch_all(&mismatched), Err(LockError::InvalidType));
    }

    #[tokio::test]
    async fn test_unrecoverable_error_signals_exit() {
        let db = Arc::new(FakeLockDb::new());
        *db.acquire_result.lock().unwrap() = Err(unrecoverable());
        db.set_fetch(Err(unrecoverable()));
        let (exit_tx, mut exit_rx) = mpsc::channel(1);
        let handler = LockHandler::new(db.clone(), LockPick::new(db.clone())).with_exit_channel(exit_tx);

        assert!(handler.acquire(&Resource::lock("k", "A", ""), 10).is_err());
        assert!(exit_rx.try_recv().is_ok());

        // The channel is full until the server drains it; the handler must not block.
        assert!(handler.fetch("k").is_err());
        assert!(handler.fetch("k").is_err());
        assert!(exit_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_ordinary_store_error_does_not_signal_exit() {
        let db = Arc::new(FakeLockDb::new());
        db.set_fetch(Err(StoreError::Backend("timeout".to_string()).into()));
        let (exit_tx, mut exit_rx) = mpsc::channel(1);
        let handler = LockHandler::new(db.clone(), LockPick::new(db.clone())).with_exit_channel(exit_tx);

        assert!(handler.fetch("k").is_err());
        assert!(exit_rx.try_recv().is_err());
    }
}
