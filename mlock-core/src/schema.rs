//! Bootstrap of the namespace and table the lock rows live in.

use crate::error::StoreError;
use crate::infrastructure::LockStore;

/// Makes sure `namespace` and its lock table exist.
///
/// The existence check and the creation are not atomic across processes.
/// Both creations are "if not exists", so a concurrent bootstrap only
/// repeats work that is already done. The table is created even when the
/// namespace exists: a peer may have created the namespace and not yet
/// its table.
pub fn ensure_schema<S: LockStore + ?Sized>(
    store: &mut S,
    namespace: &str,
    replication: &str,
) -> Result<(), StoreError> {
    if store.namespace_exists(namespace)? {
        tracing::debug!(namespace, "Locks namespace already exists");
    } else {
        tracing::info!(namespace, replication, "Creating locks namespace");
        store.create_namespace(namespace, replication)?;
    }

    store.create_table(namespace)?;
    Ok(())
}
