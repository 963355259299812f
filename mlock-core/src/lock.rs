//! The lock contract and its store-backed driver.
//!
//! Acquisition is a single insert-if-absent of `{name, client_id}`. Release
//! is a delete guarded by `owner == client_id`, repeated until the store
//! gives a definitive answer. A write timeout leaves the outcome unknown:
//! acquisition reports it as "not acquired", release retries it.

use crate::config::LockConfig;
use crate::error::{LockError, StoreError};
use crate::infrastructure::LockStore;
use crate::retry::RetryPolicy;
use crate::schema::ensure_schema;
use crate::types::{
    AcquireOutcome, ConditionalDelete, ConditionalInsert, LockIdentity, ReleaseOutcome,
    lock_name_for,
};

/// What every lock driver exposes, whatever store backs it.
pub trait LockingMechanism {
    fn identity(&self) -> &LockIdentity;

    fn is_initialized(&self) -> bool;

    /// Prepare the backing store. Idempotent and safe to run from many
    /// processes at once.
    fn init(&mut self) -> Result<(), LockError>;

    /// One attempt to take the lock. `true` if this client holds it now.
    fn acquire(&mut self) -> Result<bool, LockError>;

    /// Give the lock up. `true` once it is known not to be held by this
    /// client any more.
    fn release(&mut self) -> Result<bool, LockError>;
}

/// Ambiguity state of one `release` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReleaseState {
    Fresh,
    AfterTimeout,
}

/// Lock driver that maps acquire/release onto a [`LockStore`]'s
/// conditional writes.
pub struct StoreLock<S: LockStore> {
    identity: LockIdentity,
    namespace: String,
    replication: String,
    retry: RetryPolicy,
    store: S,
    initialized: bool,
}

impl<S: LockStore> StoreLock<S> {
    /// Lock guarding schema migrations of `keyspace`.
    pub fn for_keyspace(store: S, keyspace: &str, config: &LockConfig) -> Self {
        Self::named(store, lock_name_for(keyspace), config)
    }

    pub fn named(store: S, name: impl Into<String>, config: &LockConfig) -> Self {
        Self {
            identity: LockIdentity::new(name, config.client_id.clone()),
            namespace: config.namespace.clone(),
            replication: config.replication.to_policy_string(),
            retry: config.release_retry.to_policy(),
            store,
            initialized: false,
        }
    }

    /// Replaces the release retry policy, e.g. to attach a cancellation token.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Reads who holds the lock right now, without taking it.
    pub fn current_owner(&self) -> Result<Option<String>, LockError> {
        self.ensure_initialized()?;
        self.store
            .current_owner(&self.namespace, &self.identity.name)
            .map_err(|source| self.acquire_error(source))
    }

    /// Single acquisition attempt with the full outcome.
    pub fn try_acquire(&mut self) -> Result<AcquireOutcome, LockError> {
        self.ensure_initialized()?;
        let row = self.identity.row();

        match self.store.insert_if_absent(&self.namespace, &row) {
            Ok(ConditionalInsert::Applied) => {
                tracing::info!(lock = %self.identity.name, client_id = %self.identity.client_id, "Lock acquired");
                Ok(AcquireOutcome::Acquired)
            }
            Ok(ConditionalInsert::Rejected { owner }) if self.identity.is_owner(&owner) => {
                tracing::info!(lock = %self.identity.name, client_id = %self.identity.client_id, "Lock already held by this client");
                Ok(AcquireOutcome::AlreadyHeld)
            }
            Ok(ConditionalInsert::Rejected { owner }) => {
                tracing::info!(lock = %self.identity.name, owner = %owner, "Lock currently held by another client");
                Ok(AcquireOutcome::HeldBy { owner })
            }
            Err(StoreError::WriteTimeout(msg)) => {
                tracing::warn!(
                    lock = %self.identity.name,
                    client_id = %self.identity.client_id,
                    "Query to acquire lock timed out, treating as not acquired: {}",
                    msg
                );
                Ok(AcquireOutcome::Indeterminate)
            }
            Err(source) => Err(self.acquire_error(source)),
        }
    }

    /// Release with the full outcome, retrying per the retry policy.
    pub fn try_release(&mut self) -> Result<ReleaseOutcome, LockError> {
        self.ensure_initialized()?;
        let mut state = ReleaseState::Fresh;
        let mut budget = self.retry.start();

        loop {
            budget
                .begin_attempt()
                .map_err(|reason| self.abandoned(budget.attempts(), reason))?;

            let result = self.store.delete_if_owner(
                &self.namespace,
                &self.identity.name,
                &self.identity.client_id,
            );

            match result {
                Ok(ConditionalDelete::Applied) => {
                    tracing::info!(lock = %self.identity.name, client_id = %self.identity.client_id, "Lock released");
                    return Ok(ReleaseOutcome::Released);
                }
                Ok(ConditionalDelete::Rejected { owner: None }) => {
                    tracing::info!(lock = %self.identity.name, client_id = %self.identity.client_id, "Lock already released");
                    return Ok(ReleaseOutcome::AlreadyReleased);
                }
                Ok(ConditionalDelete::Rejected { owner: Some(owner) })
                    if self.identity.is_owner(&owner) =>
                {
                    // The guard should have matched; treat as a race and go again.
                    tracing::debug!(lock = %self.identity.name, "Conditional delete rejected for own row, retrying");
                }
                Ok(ConditionalDelete::Rejected { owner: Some(owner) }) => {
                    return match state {
                        // Cannot tell "our timed-out delete landed and someone
                        // re-acquired" from "someone took a lock we still held".
                        ReleaseState::AfterTimeout => {
                            tracing::warn!(
                                lock = %self.identity.name,
                                client_id = %self.identity.client_id,
                                current_owner = %owner,
                                "Assuming lock was released by an earlier attempt that timed out"
                            );
                            Ok(ReleaseOutcome::ReleasedAfterTimeout {
                                current_owner: owner,
                            })
                        }
                        ReleaseState::Fresh => {
                            tracing::error!(
                                lock = %self.identity.name,
                                client_id = %self.identity.client_id,
                                owner = %owner,
                                "Release attempted by a non lock holder"
                            );
                            Err(LockError::NotOwner {
                                name: self.identity.name.clone(),
                                client_id: self.identity.client_id.clone(),
                                owner,
                            })
                        }
                    };
                }
                Err(StoreError::WriteTimeout(msg)) => {
                    tracing::warn!(
                        lock = %self.identity.name,
                        attempt = budget.attempts(),
                        "Query to release lock timed out, retrying: {}",
                        msg
                    );
                    state = ReleaseState::AfterTimeout;
                }
                Err(source) => {
                    tracing::error!(lock = %self.identity.name, client_id = %self.identity.client_id, "Query to release lock failed: {}", source);
                    return Err(LockError::Release {
                        name: self.identity.name.clone(),
                        client_id: self.identity.client_id.clone(),
                        source,
                    });
                }
            }

            budget
                .backoff()
                .map_err(|reason| self.abandoned(budget.attempts(), reason))?;
        }
    }

    fn ensure_initialized(&self) -> Result<(), LockError> {
        if self.initialized {
            Ok(())
        } else {
            Err(LockError::NotInitialized {
                name: self.identity.name.clone(),
                client_id: self.identity.client_id.clone(),
            })
        }
    }

    fn acquire_error(&self, source: StoreError) -> LockError {
        LockError::Acquire {
            name: self.identity.name.clone(),
            client_id: self.identity.client_id.clone(),
            source,
        }
    }

    fn abandoned(&self, attempts: u32, reason: impl std::fmt::Display) -> LockError {
        tracing::error!(lock = %self.identity.name, attempts, "Giving up on lock release: {}", reason);
        LockError::ReleaseAbandoned {
            name: self.identity.name.clone(),
            client_id: self.identity.client_id.clone(),
            attempts,
            reason: reason.to_string(),
        }
    }
}

impl<S: LockStore> LockingMechanism for StoreLock<S> {
    fn identity(&self) -> &LockIdentity {
        &self.identity
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn init(&mut self) -> Result<(), LockError> {
        let bootstrap = |source| LockError::Bootstrap {
            namespace: self.namespace.clone(),
            source,
        };

        ensure_schema(&mut self.store, &self.namespace, &self.replication).map_err(bootstrap)?;
        self.store.prepare(&self.namespace).map_err(bootstrap)?;
        self.initialized = true;
        Ok(())
    }

    fn acquire(&mut self) -> Result<bool, LockError> {
        self.try_acquire().map(|outcome| outcome.is_held())
    }

    fn release(&mut self) -> Result<bool, LockError> {
        self.try_release().map(|_| true)
    }
}
