use crate::error::StoreError;
use crate::types::{ConditionalDelete, ConditionalInsert, LockRow};

/// Defines the contract for lock storage backends.
///
/// Implementations must apply `insert_if_absent` and `delete_if_owner`
/// atomically and linearizably per lock name. Mutual exclusion rests
/// entirely on that guarantee.
pub trait LockStore {
    /// Whether the locks namespace has been created
    fn namespace_exists(&self, namespace: &str) -> Result<bool, StoreError>;

    /// Create the namespace if it does not exist
    fn create_namespace(&mut self, namespace: &str, replication: &str) -> Result<(), StoreError>;

    /// Create the lock table inside `namespace` if it does not exist
    fn create_table(&mut self, namespace: &str) -> Result<(), StoreError>;

    /// Prepare the conditional insert and delete statements
    fn prepare(&mut self, namespace: &str) -> Result<(), StoreError>;

    /// Write `row` only if no row with the same name exists
    fn insert_if_absent(
        &mut self,
        namespace: &str,
        row: &LockRow,
    ) -> Result<ConditionalInsert, StoreError>;

    /// Delete the row called `name` only if its owner equals `owner`
    fn delete_if_owner(
        &mut self,
        namespace: &str,
        name: &str,
        owner: &str,
    ) -> Result<ConditionalDelete, StoreError>;

    /// Read the current owner of `name`, if any
    fn current_owner(&self, namespace: &str, name: &str) -> Result<Option<String>, StoreError>;
}

impl<S: LockStore + ?Sized> LockStore for Box<S> {
    fn namespace_exists(&self, namespace: &str) -> Result<bool, StoreError> {
        (**self).namespace_exists(namespace)
    }

    fn create_namespace(&mut self, namespace: &str, replication: &str) -> Result<(), StoreError> {
        (**self).create_namespace(namespace, replication)
    }

    fn create_table(&mut self, namespace: &str) -> Result<(), StoreError> {
        (**self).create_table(namespace)
    }

    fn prepare(&mut self, namespace: &str) -> Result<(), StoreError> {
        (**self).prepare(namespace)
    }

    fn insert_if_absent(
        &mut self,
        namespace: &str,
        row: &LockRow,
    ) -> Result<ConditionalInsert, StoreError> {
        (**self).insert_if_absent(namespace, row)
    }

    fn delete_if_owner(
        &mut self,
        namespace: &str,
        name: &str,
        owner: &str,
    ) -> Result<ConditionalDelete, StoreError> {
        (**self).delete_if_owner(namespace, name, owner)
    }

    fn current_owner(&self, namespace: &str, name: &str) -> Result<Option<String>, StoreError> {
        (**self).current_owner(namespace, name)
    }
}

/// Checks that `namespace` can be used as a plain identifier
/// (ASCII letter or underscore, then letters, digits, underscores).
pub fn validate_identifier(namespace: &str) -> Result<(), StoreError> {
    let mut chars = namespace.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(namespace.to_string()))
    }
}
