#[cfg(test)]
mod tests {
    use crate::config::LockConfig;
    use crate::error::{LockError, LockErrorKind};
    use crate::infrastructure::LockStore;
    use crate::infrastructure_in_memory::{Fault, InMemoryLockStore, Operation};
    use crate::lock::{LockingMechanism, StoreLock};
    use crate::schema::ensure_schema;
    use std::sync::{Arc, Barrier};
    use std::thread;

    const POLICY: &str = "'class': 'SimpleStrategy', 'replication_factor': 1";

    #[test]
    fn test_bootstrap_creates_namespace_and_table() {
        let mut store = InMemoryLockStore::new();
        ensure_schema(&mut store, "locks", POLICY).unwrap();

        assert_eq!(store.namespaces(), vec![("locks".to_string(), POLICY.to_string())]);
        assert!(store.has_table("locks"));
    }

    #[test]
    fn test_bootstrap_keeps_existing_namespace() {
        let mut store = InMemoryLockStore::new();
        store.create_namespace("locks", "original").unwrap();
        store.create_table("locks").unwrap();

        ensure_schema(&mut store, "locks", POLICY).unwrap();

        assert_eq!(store.namespaces(), vec![("locks".to_string(), "original".to_string())]);
        assert!(store.has_table("locks"));
    }

    #[test]
    fn test_init_completes_namespace_left_without_table() {
        // Another process created the namespace and has not created the table yet
        let mut store = InMemoryLockStore::new();
        store.create_namespace("locks", "original").unwrap();
        assert!(!store.has_table("locks"));

        let mut lock = StoreLock::for_keyspace(store.clone(), "ks", &LockConfig::new("client-a"));
        lock.init().unwrap();

        assert!(lock.is_initialized());
        assert!(store.has_table("locks"));
        assert_eq!(store.namespaces(), vec![("locks".to_string(), "original".to_string())]);
        assert!(lock.acquire().unwrap());
    }

    #[test]
    fn test_init_is_idempotent() {
        let store = InMemoryLockStore::new();
        let mut lock = StoreLock::for_keyspace(store.clone(), "ks", &LockConfig::new("client-a"));

        for _ in 0..3 {
            lock.init().unwrap();
        }
        assert!(lock.is_initialized());
        assert_eq!(store.namespaces().len(), 1);
    }

    #[test]
    fn test_concurrent_init_leaves_single_namespace() {
        let store = InMemoryLockStore::new();
        let processes = 8;
        let barrier = Arc::new(Barrier::new(processes));

        let handles: Vec<_> = (0..processes)
            .map(|i| {
                let mut lock = StoreLock::for_keyspace(
                    store.clone(),
                    "ks",
                    &LockConfig::new(format!("client-{}", i)),
                );
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    lock.init()
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap().is_ok());
        }
        assert_eq!(store.namespaces().len(), 1);
        assert!(store.has_table("locks"));
    }

    #[test]
    fn test_bootstrap_failure_is_acquisition_error() {
        let store = InMemoryLockStore::new();
        store.inject(Operation::Schema, Fault::Unavailable("no quorum".to_string()));
        let mut lock = StoreLock::for_keyspace(store.clone(), "ks", &LockConfig::new("client-a"));

        let err = lock.init().unwrap_err();
        assert!(matches!(err, LockError::Bootstrap { ref namespace, .. } if namespace == "locks"));
        assert_eq!(err.kind(), LockErrorKind::Acquisition);
        assert!(!lock.is_initialized());

        // The fault is spent; a second init goes through
        lock.init().unwrap();
        assert!(lock.is_initialized());
    }

    #[test]
    fn test_custom_namespace_and_replication() {
        let store = InMemoryLockStore::new();
        let config = LockConfig::new("client-a")
            .with_namespace("migration_locks")
            .with_replication(crate::config::ReplicationStrategy::Simple {
                replication_factor: 3,
            });
        let mut lock = StoreLock::for_keyspace(store.clone(), "ks", &config);
        lock.init().unwrap();

        assert_eq!(
            store.namespaces(),
            vec![(
                "migration_locks".to_string(),
                "'class': 'SimpleStrategy', 'replication_factor': 3".to_string()
            )]
        );
    }
}
