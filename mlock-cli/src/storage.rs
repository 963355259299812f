use mlock_core::infrastructure::LockStore;
use mlock_core::infrastructure_in_memory::InMemoryLockStore;

pub type DynStore = Box<dyn LockStore + Send>;

/// Opens the backend named by `storage`: `memory` or `sqlite:<path>`.
///
/// There is no fallback: an unusable backend is an error.
pub fn open_store(storage: &str, write_timeout_ms: u64) -> Result<DynStore, String> {
    if storage == "memory" {
        tracing::warn!("💾 Storage backend: in-memory (only this process sees the lock)");
        Ok(Box::new(InMemoryLockStore::new()))
    } else if let Some(path) = storage.strip_prefix("sqlite:") {
        #[cfg(feature = "sqlite")]
        {
            use mlock_core::infrastructure_sqlite::SqliteLockStore;
            use std::time::Duration;

            tracing::info!("💾 Storage backend: SQLite ({})", path);
            let store = SqliteLockStore::open_with_timeout(path, Duration::from_millis(write_timeout_ms))
                .map_err(|e| format!("Failed to open SQLite database at '{}': {}", path, e))?;
            Ok(Box::new(store))
        }
        #[cfg(not(feature = "sqlite"))]
        {
            let _ = (path, write_timeout_ms);
            Err("SQLite storage requested but the `sqlite` feature is not enabled. \
                 Rebuild with: cargo build --features sqlite"
                .to_string())
        }
    } else {
        Err(format!(
            "Unknown storage backend: '{}'. Use 'memory' or 'sqlite:<path>'",
            storage
        ))
    }
}
