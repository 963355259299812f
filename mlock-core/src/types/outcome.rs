use serde::{Deserialize, Serialize};

/// Answer of an insert-if-absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionalInsert {
    /// The row did not exist and has been written.
    Applied,
    /// A row already existed; carries its owner.
    Rejected { owner: String },
}

impl ConditionalInsert {
    pub fn applied(&self) -> bool {
        matches!(self, ConditionalInsert::Applied)
    }
}

/// Answer of a delete-if-owner-matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionalDelete {
    /// The row existed with the expected owner and is gone.
    Applied,
    /// The guard did not hold. `owner` is `None` when no row exists.
    Rejected { owner: Option<String> },
}

impl ConditionalDelete {
    pub fn applied(&self) -> bool {
        matches!(self, ConditionalDelete::Applied)
    }
}

/// Result of a single acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AcquireOutcome {
    /// This call created the row.
    Acquired,
    /// The row already named this client as owner.
    AlreadyHeld,
    /// Another client owns the lock.
    HeldBy { owner: String },
    /// The insert timed out; it may or may not have landed.
    Indeterminate,
}

impl AcquireOutcome {
    /// Whether this client owns the lock after the attempt.
    pub fn is_held(&self) -> bool {
        matches!(self, AcquireOutcome::Acquired | AcquireOutcome::AlreadyHeld)
    }
}

/// Result of a release that reached a definitive answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReleaseOutcome {
    /// The conditional delete removed our row.
    Released,
    /// No row existed any more.
    AlreadyReleased,
    /// An earlier attempt timed out and the row now names someone else.
    /// Assumed to mean our delete landed and `current_owner` acquired since.
    ReleasedAfterTimeout { current_owner: String },
}
