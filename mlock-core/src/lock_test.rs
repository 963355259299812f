#[cfg(test)]
mod tests {
    use crate::config::LockConfig;
    use crate::error::{LockError, LockErrorKind, StoreError};
    use crate::infrastructure::LockStore;
    use crate::infrastructure_in_memory::{Fault, InMemoryLockStore, Operation};
    use crate::lock::{LockingMechanism, StoreLock};
    use crate::retry::RetryPolicy;
    use crate::types::{
        AcquireOutcome, ConditionalDelete, ConditionalInsert, LockRow, ReleaseOutcome,
    };
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    const KEYSPACE: &str = "accounts";
    const LOCK_NAME: &str = "accounts.schema_migration";

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::default().with_interval(Duration::from_millis(1))
    }

    fn lock_for(store: &InMemoryLockStore, client_id: &str) -> StoreLock<InMemoryLockStore> {
        StoreLock::for_keyspace(store.clone(), KEYSPACE, &LockConfig::new(client_id))
            .with_retry_policy(fast_retry())
    }

    fn initialized_lock(store: &InMemoryLockStore, client_id: &str) -> StoreLock<InMemoryLockStore> {
        let mut lock = lock_for(store, client_id);
        lock.init().unwrap();
        lock
    }

    #[test]
    fn test_lock_name_is_derived_from_keyspace() {
        let store = InMemoryLockStore::new();
        let lock = lock_for(&store, "client-a");
        assert_eq!(lock.identity().name, LOCK_NAME);
        assert_eq!(lock.identity().client_id, "client-a");
        assert_eq!(lock.namespace(), "locks");
        assert!(!lock.is_initialized());
    }

    #[test]
    fn test_acquire_before_init_is_an_acquisition_error() {
        let store = InMemoryLockStore::new();
        let mut lock = lock_for(&store, "client-a");

        let err = lock.acquire().unwrap_err();
        assert!(matches!(err, LockError::NotInitialized { .. }));
        assert_eq!(err.kind(), LockErrorKind::Acquisition);
    }

    #[test]
    fn test_acquire_creates_row_owned_by_client() {
        let store = InMemoryLockStore::new();
        let mut lock = initialized_lock(&store, "client-a");

        assert_eq!(lock.try_acquire().unwrap(), AcquireOutcome::Acquired);
        assert_eq!(store.rows("locks"), vec![LockRow::new(LOCK_NAME, "client-a")]);
        assert_eq!(lock.current_owner().unwrap().as_deref(), Some("client-a"));
    }

    #[test]
    fn test_second_client_is_refused() {
        let store = InMemoryLockStore::new();
        let mut a = initialized_lock(&store, "client-a");
        let mut b = initialized_lock(&store, "client-b");

        assert!(a.acquire().unwrap());
        assert_eq!(
            b.try_acquire().unwrap(),
            AcquireOutcome::HeldBy {
                owner: "client-a".to_string()
            }
        );
        assert!(!b.acquire().unwrap());
    }

    #[test]
    fn test_reacquire_by_same_client_is_idempotent() {
        let store = InMemoryLockStore::new();
        let mut lock = initialized_lock(&store, "client-a");
        assert!(lock.acquire().unwrap());

        // A restarted process reusing the same client id
        let mut restarted = initialized_lock(&store, "client-a");
        assert_eq!(restarted.try_acquire().unwrap(), AcquireOutcome::AlreadyHeld);
        assert!(lock.acquire().unwrap());
        assert_eq!(store.rows("locks").len(), 1);
    }

    #[test]
    fn test_concurrent_acquire_grants_at_most_one_client() {
        let store = InMemoryLockStore::new();
        let clients = 8;
        let barrier = Arc::new(Barrier::new(clients));

        let handles: Vec<_> = (0..clients)
            .map(|i| {
                let mut lock = lock_for(&store, &format!("client-{}", i));
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    lock.init().unwrap();
                    barrier.wait();
                    lock.acquire().unwrap()
                })
            })
            .collect();

        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|acquired| *acquired)
            .count();

        assert_eq!(granted, 1);
        assert_eq!(store.rows("locks").len(), 1);
    }

    #[test]
    fn test_acquire_timeout_reports_not_acquired() {
        let store = InMemoryLockStore::new();
        let mut lock = initialized_lock(&store, "client-a");

        store.inject(Operation::Insert, Fault::Timeout { applied: false });
        assert_eq!(lock.try_acquire().unwrap(), AcquireOutcome::Indeterminate);
        assert!(store.rows("locks").is_empty());

        // Retrying after the timeout succeeds normally
        assert!(lock.acquire().unwrap());
    }

    #[test]
    fn test_acquire_timeout_after_landing_is_recovered_by_retry() {
        let store = InMemoryLockStore::new();
        let mut lock = initialized_lock(&store, "client-a");

        store.inject(Operation::Insert, Fault::Timeout { applied: true });
        assert!(!lock.acquire().unwrap());
        assert_eq!(store.rows("locks"), vec![LockRow::new(LOCK_NAME, "client-a")]);

        assert_eq!(lock.try_acquire().unwrap(), AcquireOutcome::AlreadyHeld);
    }

    #[test]
    fn test_acquire_store_failure_is_fatal() {
        let store = InMemoryLockStore::new();
        let mut lock = initialized_lock(&store, "client-a");

        store.inject(Operation::Insert, Fault::Unavailable("connection reset".to_string()));
        match lock.acquire() {
            Err(LockError::Acquire {
                name,
                client_id,
                source: StoreError::Unavailable(_),
            }) => {
                assert_eq!(name, LOCK_NAME);
                assert_eq!(client_id, "client-a");
            }
            other => panic!("Expected acquisition error, got {:?}", other),
        }
    }

    #[test]
    fn test_release_by_owner_removes_row() {
        let store = InMemoryLockStore::new();
        let mut lock = initialized_lock(&store, "client-a");
        assert!(lock.acquire().unwrap());

        assert_eq!(lock.try_release().unwrap(), ReleaseOutcome::Released);
        assert!(store.rows("locks").is_empty());
        assert_eq!(lock.current_owner().unwrap(), None);
    }

    #[test]
    fn test_release_without_row_succeeds() {
        let store = InMemoryLockStore::new();
        let mut lock = initialized_lock(&store, "client-a");

        assert_eq!(lock.try_release().unwrap(), ReleaseOutcome::AlreadyReleased);
        assert!(lock.release().unwrap());
    }

    #[test]
    fn test_release_by_non_owner_names_true_owner() {
        let store = InMemoryLockStore::new();
        let mut a = initialized_lock(&store, "client-a");
        let mut b = initialized_lock(&store, "client-b");
        assert!(a.acquire().unwrap());

        let err = b.release().unwrap_err();
        assert_eq!(err.kind(), LockErrorKind::Release);
        match &err {
            LockError::NotOwner {
                name,
                client_id,
                owner,
            } => {
                assert_eq!(name, LOCK_NAME);
                assert_eq!(client_id, "client-b");
                assert_eq!(owner, "client-a");
            }
            other => panic!("Expected NotOwner, got {:?}", other),
        }
        assert!(err.to_string().contains("Current lock holder: client-a"));
        assert_eq!(store.rows("locks"), vec![LockRow::new(LOCK_NAME, "client-a")]);
    }

    #[test]
    fn test_release_retries_after_timeout_that_did_not_land() {
        let store = InMemoryLockStore::new();
        let mut lock = initialized_lock(&store, "client-a");
        assert!(lock.acquire().unwrap());

        store.inject(Operation::Delete, Fault::Timeout { applied: false });
        store.inject(Operation::Delete, Fault::Timeout { applied: false });
        assert_eq!(lock.try_release().unwrap(), ReleaseOutcome::Released);
        assert_eq!(store.pending_faults(), 0);
        assert!(store.rows("locks").is_empty());
    }

    #[test]
    fn test_release_retries_after_timeout_that_landed() {
        let store = InMemoryLockStore::new();
        let mut lock = initialized_lock(&store, "client-a");
        assert!(lock.acquire().unwrap());

        store.inject(Operation::Delete, Fault::Timeout { applied: true });
        assert_eq!(lock.try_release().unwrap(), ReleaseOutcome::AlreadyReleased);
        assert!(store.rows("locks").is_empty());
    }

    /// Lets another client grab the lock right after a delete times out.
    struct InterleavingStore {
        inner: InMemoryLockStore,
        acquirer: Option<String>,
    }

    impl LockStore for InterleavingStore {
        fn namespace_exists(&self, namespace: &str) -> Result<bool, StoreError> {
            self.inner.namespace_exists(namespace)
        }

        fn create_namespace(&mut self, namespace: &str, replication: &str) -> Result<(), StoreError> {
            self.inner.create_namespace(namespace, replication)
        }

        fn create_table(&mut self, namespace: &str) -> Result<(), StoreError> {
            self.inner.create_table(namespace)
        }

        fn prepare(&mut self, namespace: &str) -> Result<(), StoreError> {
            self.inner.prepare(namespace)
        }

        fn insert_if_absent(
            &mut self,
            namespace: &str,
            row: &LockRow,
        ) -> Result<ConditionalInsert, StoreError> {
            self.inner.insert_if_absent(namespace, row)
        }

        fn delete_if_owner(
            &mut self,
            namespace: &str,
            name: &str,
            owner: &str,
        ) -> Result<ConditionalDelete, StoreError> {
            let result = self.inner.delete_if_owner(namespace, name, owner);
            if matches!(result, Err(StoreError::WriteTimeout(_))) {
                if let Some(acquirer) = self.acquirer.take() {
                    self.inner
                        .insert_if_absent(namespace, &LockRow::new(name, acquirer))?;
                }
            }
            result
        }

        fn current_owner(&self, namespace: &str, name: &str) -> Result<Option<String>, StoreError> {
            self.inner.current_owner(namespace, name)
        }
    }

    #[test]
    fn test_release_after_timeout_accepts_new_owner() {
        let inner = InMemoryLockStore::new();
        let store = InterleavingStore {
            inner: inner.clone(),
            acquirer: Some("client-b".to_string()),
        };
        let mut lock = StoreLock::for_keyspace(store, KEYSPACE, &LockConfig::new("client-a"))
            .with_retry_policy(fast_retry());
        lock.init().unwrap();
        assert!(lock.acquire().unwrap());

        inner.inject(Operation::Delete, Fault::Timeout { applied: true });
        assert_eq!(
            lock.try_release().unwrap(),
            ReleaseOutcome::ReleasedAfterTimeout {
                current_owner: "client-b".to_string()
            }
        );
        assert_eq!(inner.rows("locks"), vec![LockRow::new(LOCK_NAME, "client-b")]);
    }

    #[test]
    fn test_timeout_state_does_not_leak_into_next_release() {
        let store = InMemoryLockStore::new();
        let mut a = initialized_lock(&store, "client-a");
        let mut b = initialized_lock(&store, "client-b");

        assert!(a.acquire().unwrap());
        store.inject(Operation::Delete, Fault::Timeout { applied: true });
        assert!(a.release().unwrap());

        assert!(b.acquire().unwrap());
        // A fresh call on the same handle must not inherit the earlier timeout
        assert!(matches!(a.release(), Err(LockError::NotOwner { .. })));
    }

    #[test]
    fn test_release_store_failure_is_fatal() {
        let store = InMemoryLockStore::new();
        let mut lock = initialized_lock(&store, "client-a");
        assert!(lock.acquire().unwrap());

        store.inject(Operation::Delete, Fault::Unavailable("node down".to_string()));
        let err = lock.release().unwrap_err();
        assert!(matches!(
            err,
            LockError::Release {
                source: StoreError::Unavailable(_),
                ..
            }
        ));
        assert_eq!(store.rows("locks").len(), 1);
    }

    #[test]
    fn test_release_gives_up_after_max_attempts() {
        let store = InMemoryLockStore::new();
        let mut lock = initialized_lock(&store, "client-a")
            .with_retry_policy(fast_retry().with_max_attempts(3));
        assert!(lock.acquire().unwrap());

        for _ in 0..5 {
            store.inject(Operation::Delete, Fault::Timeout { applied: false });
        }

        match lock.release() {
            Err(LockError::ReleaseAbandoned { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("Expected ReleaseAbandoned, got {:?}", other),
        }
        assert_eq!(store.pending_faults(), 2);
        assert_eq!(store.rows("locks").len(), 1);
    }

    /// Rejects the first `rejections` deletes while naming the caller as owner.
    struct SelfOwnedRejectionStore {
        inner: InMemoryLockStore,
        rejections: u32,
    }

    impl LockStore for SelfOwnedRejectionStore {
        fn namespace_exists(&self, namespace: &str) -> Result<bool, StoreError> {
            self.inner.namespace_exists(namespace)
        }

        fn create_namespace(&mut self, namespace: &str, replication: &str) -> Result<(), StoreError> {
            self.inner.create_namespace(namespace, replication)
        }

        fn create_table(&mut self, namespace: &str) -> Result<(), StoreError> {
            self.inner.create_table(namespace)
        }

        fn prepare(&mut self, namespace: &str) -> Result<(), StoreError> {
            self.inner.prepare(namespace)
        }

        fn insert_if_absent(
            &mut self,
            namespace: &str,
            row: &LockRow,
        ) -> Result<ConditionalInsert, StoreError> {
            self.inner.insert_if_absent(namespace, row)
        }

        fn delete_if_owner(
            &mut self,
            namespace: &str,
            name: &str,
            owner: &str,
        ) -> Result<ConditionalDelete, StoreError> {
            if self.rejections > 0 {
                self.rejections -= 1;
                return Ok(ConditionalDelete::Rejected {
                    owner: Some(owner.to_string()),
                });
            }
            self.inner.delete_if_owner(namespace, name, owner)
        }

        fn current_owner(&self, namespace: &str, name: &str) -> Result<Option<String>, StoreError> {
            self.inner.current_owner(namespace, name)
        }
    }

    fn self_rejecting_lock(
        inner: &InMemoryLockStore,
        rejections: u32,
        policy: RetryPolicy,
    ) -> StoreLock<SelfOwnedRejectionStore> {
        let store = SelfOwnedRejectionStore {
            inner: inner.clone(),
            rejections,
        };
        let mut lock = StoreLock::for_keyspace(store, KEYSPACE, &LockConfig::new("client-a"))
            .with_retry_policy(policy);
        lock.init().unwrap();
        lock
    }

    #[test]
    fn test_release_retries_rejection_naming_self() {
        let inner = InMemoryLockStore::new();
        let mut lock = self_rejecting_lock(&inner, 1, fast_retry());
        assert!(lock.acquire().unwrap());

        assert_eq!(lock.try_release().unwrap(), ReleaseOutcome::Released);
        assert_eq!(lock.store().rejections, 0);
        assert!(inner.rows("locks").is_empty());
    }

    #[test]
    fn test_rejections_naming_self_count_against_max_attempts() {
        let inner = InMemoryLockStore::new();
        let mut lock = self_rejecting_lock(&inner, 5, fast_retry().with_max_attempts(2));
        assert!(lock.acquire().unwrap());

        match lock.try_release() {
            Err(LockError::ReleaseAbandoned { attempts, .. }) => assert_eq!(attempts, 2),
            other => panic!("Expected ReleaseAbandoned, got {:?}", other),
        }
        assert_eq!(lock.store().rejections, 3);
        assert_eq!(inner.rows("locks"), vec![LockRow::new(LOCK_NAME, "client-a")]);
    }

    #[test]
    fn test_lock_works_through_boxed_store() {
        let store = InMemoryLockStore::new();
        let boxed: Box<dyn LockStore + Send> = Box::new(store.clone());
        let mut lock = StoreLock::for_keyspace(boxed, KEYSPACE, &LockConfig::new("client-a"));
        lock.init().unwrap();

        assert!(lock.acquire().unwrap());
        assert!(lock.release().unwrap());
        assert!(store.rows("locks").is_empty());
    }
}
