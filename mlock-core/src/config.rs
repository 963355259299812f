//! Configuration consumed by the lock driver.
//!
//! Deserializes with serde so callers can load it from any format they
//! already use. Missing fields fall back to defaults.

use crate::infrastructure::validate_identifier;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_NAMESPACE: &str = "locks";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("client_id must not be empty")]
    EmptyClientId,

    #[error("namespace '{0}' is not a valid identifier")]
    InvalidNamespace(String),

    #[error("replication factor must be at least 1")]
    ZeroReplication,

    #[error("release_retry.max_attempts must be at least 1")]
    ZeroAttempts,
}

/// Replication policy applied when the locks namespace is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum ReplicationStrategy {
    Simple { replication_factor: u32 },
    NetworkTopology { datacenters: BTreeMap<String, u32> },
}

impl Default for ReplicationStrategy {
    fn default() -> Self {
        ReplicationStrategy::Simple {
            replication_factor: 1,
        }
    }
}

impl ReplicationStrategy {
    /// The policy string handed to the store.
    pub fn to_policy_string(&self) -> String {
        match self {
            ReplicationStrategy::Simple { replication_factor } => format!(
                "'class': 'SimpleStrategy', 'replication_factor': {}",
                replication_factor
            ),
            ReplicationStrategy::NetworkTopology { datacenters } => {
                let mut policy = String::from("'class': 'NetworkTopologyStrategy'");
                for (dc, factor) in datacenters {
                    policy.push_str(&format!(", '{}': {}", dc, factor));
                }
                policy
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let zero = match self {
            ReplicationStrategy::Simple { replication_factor } => *replication_factor == 0,
            ReplicationStrategy::NetworkTopology { datacenters } => {
                datacenters.is_empty() || datacenters.values().any(|f| *f == 0)
            }
        };
        if zero {
            Err(ConfigError::ZeroReplication)
        } else {
            Ok(())
        }
    }
}

/// Serializable form of [`RetryPolicy`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseRetryConfig {
    pub interval_ms: u64,
    pub max_attempts: Option<u32>,
    pub deadline_ms: Option<u64>,
}

impl Default for ReleaseRetryConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            max_attempts: None,
            deadline_ms: None,
        }
    }
}

impl ReleaseRetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            interval: Duration::from_millis(self.interval_ms),
            max_attempts: self.max_attempts,
            deadline: self.deadline_ms.map(Duration::from_millis),
            cancellation: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Ownership token. Reuse it across restarts to re-enter a held lock.
    pub client_id: String,
    /// Namespace holding the lock table
    pub namespace: String,
    pub replication: ReplicationStrategy,
    pub release_retry: ReleaseRetryConfig,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            client_id: nanoid::nanoid!(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            replication: ReplicationStrategy::default(),
            release_retry: ReleaseRetryConfig::default(),
        }
    }
}

impl LockConfig {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Self::default()
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_replication(mut self, replication: ReplicationStrategy) -> Self {
        self.replication = replication;
        self
    }

    pub fn with_release_retry(mut self, release_retry: ReleaseRetryConfig) -> Self {
        self.release_retry = release_retry;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::EmptyClientId);
        }
        validate_identifier(&self.namespace)
            .map_err(|_| ConfigError::InvalidNamespace(self.namespace.clone()))?;
        self.replication.validate()?;
        if self.release_retry.max_attempts == Some(0) {
            return Err(ConfigError::ZeroAttempts);
        }
        Ok(())
    }
}
