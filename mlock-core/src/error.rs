//! Error types for the lock and its backing stores.

use thiserror::Error;

/// Failures reported by a [`LockStore`](crate::infrastructure::LockStore).
#[derive(Error, Debug)]
pub enum StoreError {
    /// The write deadline elapsed before the store acknowledged the write.
    /// The mutation may or may not have been applied.
    #[error("write timed out before acknowledgement: {0}")]
    WriteTimeout(String),

    /// The store could not be reached or refused the request.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A namespace name the store cannot use as an identifier.
    #[error("invalid namespace identifier '{0}'")]
    InvalidIdentifier(String),

    /// A conditional write targeted a namespace whose lock table does not exist.
    #[error("lock table for namespace '{0}' does not exist")]
    MissingTable(String),

    /// Any other driver-level failure.
    #[error(transparent)]
    Backend(Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn is_write_timeout(&self) -> bool {
        matches!(self, StoreError::WriteTimeout(_))
    }
}

/// The two categories a [`LockError`] falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockErrorKind {
    Acquisition,
    Release,
}

/// Fatal lock failures. Contention and write timeouts are not errors.
#[derive(Error, Debug)]
pub enum LockError {
    /// The locks namespace or table could not be created or prepared.
    #[error("query to create locks schema in namespace '{namespace}' failed to execute")]
    Bootstrap {
        namespace: String,
        #[source]
        source: StoreError,
    },

    /// `acquire` or `release` was called before `init`.
    #[error("lock {name} used by client {client_id} before init")]
    NotInitialized { name: String, client_id: String },

    #[error("query to acquire lock {name} for client {client_id} failed to execute")]
    Acquire {
        name: String,
        client_id: String,
        #[source]
        source: StoreError,
    },

    /// Release attempted by a client that does not hold the lock.
    #[error(
        "lock {name} attempted to be released by a non lock holder ({client_id}). Current lock holder: {owner}"
    )]
    NotOwner {
        name: String,
        client_id: String,
        owner: String,
    },

    #[error("query to release lock {name} for client {client_id} failed to execute")]
    Release {
        name: String,
        client_id: String,
        #[source]
        source: StoreError,
    },

    /// The release retry policy gave up before a definitive answer.
    #[error("gave up releasing lock {name} for client {client_id} after {attempts} attempts: {reason}")]
    ReleaseAbandoned {
        name: String,
        client_id: String,
        attempts: u32,
        reason: String,
    },
}

impl LockError {
    pub fn kind(&self) -> LockErrorKind {
        match self {
            LockError::Bootstrap { .. }
            | LockError::NotInitialized { .. }
            | LockError::Acquire { .. } => LockErrorKind::Acquisition,
            LockError::NotOwner { .. }
            | LockError::Release { .. }
            | LockError::ReleaseAbandoned { .. } => LockErrorKind::Release,
        }
    }
}
