//! Retry policy for releasing the lock after ambiguous writes.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Interval between release attempts unless configured otherwise.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(1000);

/// Lets another thread stop a release that is waiting to retry.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (cancelled, signal) = &*self.inner;
        *cancelled.lock() = true;
        signal.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Blocks for up to `timeout`. Returns `true` if cancelled meanwhile.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (cancelled, signal) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut guard = cancelled.lock();
        while !*guard {
            if signal.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        *guard
    }
}

/// How `release` keeps retrying after a write timeout.
///
/// The default never gives up and waits one second between attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub interval: Duration,
    /// Total attempts allowed, including the first one.
    pub max_attempts: Option<u32>,
    /// Wall-clock budget measured from the first attempt.
    pub deadline: Option<Duration>,
    pub cancellation: Option<CancellationToken>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RETRY_INTERVAL,
            max_attempts: None,
            deadline: None,
            cancellation: None,
        }
    }
}

impl RetryPolicy {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Caps the number of attempts. A cap below 1 is treated as 1.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Starts the budget for one release call.
    pub fn start(&self) -> RetryBudget<'_> {
        RetryBudget {
            policy: self,
            attempts: 0,
            started: Instant::now(),
        }
    }
}

/// Why a [`RetryBudget`] stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GiveUp {
    Cancelled,
    AttemptsExhausted(u32),
    DeadlineElapsed(Duration),
}

impl std::fmt::Display for GiveUp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GiveUp::Cancelled => write!(f, "cancelled"),
            GiveUp::AttemptsExhausted(n) => write!(f, "attempt limit of {} reached", n),
            GiveUp::DeadlineElapsed(d) => write!(f, "deadline of {:?} elapsed", d),
        }
    }
}

/// Attempt counter and clock for a single release call.
#[derive(Debug)]
pub struct RetryBudget<'a> {
    policy: &'a RetryPolicy,
    attempts: u32,
    started: Instant,
}

impl RetryBudget<'_> {
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Counts an attempt about to be made. The first attempt always runs.
    pub fn begin_attempt(&mut self) -> Result<(), GiveUp> {
        if let Some(max) = self.policy.max_attempts {
            // A limit of zero still allows the first attempt
            let max = max.max(1);
            if self.attempts >= max {
                return Err(GiveUp::AttemptsExhausted(max));
            }
        }
        if self.attempts > 0 && self.is_cancelled() {
            return Err(GiveUp::Cancelled);
        }
        self.attempts += 1;
        Ok(())
    }

    /// Waits the retry interval, cut short by cancellation or the deadline.
    pub fn backoff(&mut self) -> Result<(), GiveUp> {
        let mut wait = self.policy.interval;
        if let Some(deadline) = self.policy.deadline {
            let elapsed = self.started.elapsed();
            if elapsed >= deadline {
                return Err(GiveUp::DeadlineElapsed(deadline));
            }
            wait = wait.min(deadline - elapsed);
        }

        let cancelled = match &self.policy.cancellation {
            Some(token) => token.wait_timeout(wait),
            None => {
                std::thread::sleep(wait);
                false
            }
        };
        if cancelled {
            return Err(GiveUp::Cancelled);
        }

        match self.policy.deadline {
            Some(deadline) if self.started.elapsed() >= deadline => {
                Err(GiveUp::DeadlineElapsed(deadline))
            }
            _ => Ok(()),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.policy
            .cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}
