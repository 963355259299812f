use serde::{Deserialize, Serialize};

/// Suffix appended to a protected keyspace to name its migration lock.
pub const SCHEMA_MIGRATION_SUFFIX: &str = "schema_migration";

/// Derives the lock name guarding schema migrations of `keyspace`.
pub fn lock_name_for(keyspace: &str) -> String {
    format!("{}.{}", keyspace, SCHEMA_MIGRATION_SUFFIX)
}

/// The two values that identify a lock from the point of view of one process.
///
/// `name` selects the row in the store, `client_id` is the ownership token
/// written into it. Both are fixed for the lifetime of a handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockIdentity {
    pub name: String,
    pub client_id: String,
}

impl LockIdentity {
    pub fn new(name: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            client_id: client_id.into(),
        }
    }

    /// The row this identity writes when it takes the lock.
    pub fn row(&self) -> LockRow {
        LockRow::new(self.name.clone(), self.client_id.clone())
    }

    pub fn is_owner(&self, owner: &str) -> bool {
        self.client_id == owner
    }
}

impl std::fmt::Display for LockIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.client_id)
    }
}

/// A store-resident lock row. At most one exists per `name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockRow {
    /// Primary key
    pub name: String,
    /// Client id of the current holder
    pub owner: String,
}

impl LockRow {
    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
        }
    }
}
