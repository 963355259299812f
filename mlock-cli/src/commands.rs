use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;

use mlock_core::config::LockConfig;
use mlock_core::lock::{LockingMechanism, StoreLock};
use mlock_core::types::{lock_name_for, AcquireOutcome, ReleaseOutcome};
use mlock_core::LockError;

use crate::storage::{open_store, DynStore};

// ─── Exit Codes ─────────────────────────────────────────────────────────────

pub const SUCCESS: i32 = 0;
pub const NOT_ACQUIRED: i32 = 1;
pub const LOCK_FAILURE: i32 = 2;
pub const USAGE_ERROR: i32 = 3;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("{0}")]
    Usage(String),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("failed to run command '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl CommandError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CommandError::Usage(_) => USAGE_ERROR,
            CommandError::Lock(_) | CommandError::Spawn { .. } => LOCK_FAILURE,
        }
    }
}

pub type CommandResult = Result<i32, CommandError>;

// ─── Context ────────────────────────────────────────────────────────────────

/// Everything a command needs to build a lock handle.
pub struct Context {
    pub config: LockConfig,
    pub storage: String,
    pub write_timeout_ms: u64,
}

impl Context {
    fn lock(&self, name: String) -> Result<StoreLock<DynStore>, CommandError> {
        let store = open_store(&self.storage, self.write_timeout_ms).map_err(CommandError::Usage)?;
        Ok(StoreLock::named(store, name, &self.config))
    }

    fn initialized_lock(&self, name: String) -> Result<StoreLock<DynStore>, CommandError> {
        let mut lock = self.lock(name)?;
        lock.init()?;
        Ok(lock)
    }
}

/// Resolves `--keyspace` / `--lock-name` into a lock name.
pub fn resolve_lock_name(keyspace: Option<&str>, lock_name: Option<&str>) -> Result<String, CommandError> {
    match (keyspace, lock_name) {
        (_, Some(name)) if !name.is_empty() => Ok(name.to_string()),
        (Some(keyspace), _) if !keyspace.is_empty() => Ok(lock_name_for(keyspace)),
        _ => Err(CommandError::Usage(
            "either --keyspace or --lock-name is required".to_string(),
        )),
    }
}

/// Picks the storage backend for a command.
///
/// The in-memory backend lives and dies with this process, so a lock taken
/// there excludes nobody else. Commands that take or give up a lock
/// (`shares_lock`) must name a shared backend.
pub fn resolve_storage(storage: Option<&str>, shares_lock: bool) -> Result<String, CommandError> {
    match storage {
        None | Some("") => Err(CommandError::Usage(
            "--storage (or MLOCK_STORAGE) is required, e.g. --storage sqlite:/var/lib/mlock/locks.db"
                .to_string(),
        )),
        Some("memory") if shares_lock => Err(CommandError::Usage(
            "the 'memory' backend is private to this process and cannot share a lock; \
             use --storage sqlite:<path>"
                .to_string(),
        )),
        Some(storage) => Ok(storage.to_string()),
    }
}

// ─── Output Types ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct InitReport<'a> {
    namespace: &'a str,
    initialized: bool,
}

#[derive(Serialize)]
struct LockReport<'a, T: Serialize> {
    lock: &'a str,
    client_id: &'a str,
    #[serde(flatten)]
    outcome: T,
}

#[derive(Serialize)]
struct StatusReport<'a> {
    lock: &'a str,
    owner: Option<String>,
    held_by_me: bool,
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => tracing::error!("Failed to serialize output: {}", e),
    }
}

// ─── Commands ───────────────────────────────────────────────────────────────

pub fn init(ctx: &Context) -> CommandResult {
    // The lock name plays no part in bootstrapping
    let lock = ctx.initialized_lock(String::new())?;
    print_json(&InitReport {
        namespace: lock.namespace(),
        initialized: lock.is_initialized(),
    });
    Ok(SUCCESS)
}

/// Polls `acquire` every `poll` until held or `wait` has elapsed.
fn acquire_within(
    lock: &mut StoreLock<DynStore>,
    wait: Duration,
    poll: Duration,
) -> Result<AcquireOutcome, LockError> {
    let started = Instant::now();
    loop {
        let outcome = lock.try_acquire()?;
        let elapsed = started.elapsed();
        if outcome.is_held() || elapsed >= wait {
            return Ok(outcome);
        }
        tracing::debug!(lock = %lock.identity().name, ?outcome, "Lock not acquired, polling again");
        thread::sleep(poll.min(wait - elapsed));
    }
}

pub fn acquire(ctx: &Context, name: String, wait: Duration, poll: Duration) -> CommandResult {
    let mut lock = ctx.initialized_lock(name)?;
    let outcome = acquire_within(&mut lock, wait, poll)?;
    let held = outcome.is_held();

    print_json(&LockReport {
        lock: &lock.identity().name,
        client_id: &lock.identity().client_id,
        outcome,
    });
    Ok(if held { SUCCESS } else { NOT_ACQUIRED })
}

pub fn release(ctx: &Context, name: String) -> CommandResult {
    let mut lock = ctx.initialized_lock(name)?;
    let outcome: ReleaseOutcome = lock.try_release()?;

    print_json(&LockReport {
        lock: &lock.identity().name,
        client_id: &lock.identity().client_id,
        outcome,
    });
    Ok(SUCCESS)
}

pub fn status(ctx: &Context, name: String) -> CommandResult {
    let lock = ctx.initialized_lock(name)?;
    let owner = lock.current_owner()?;
    let held_by_me = owner.as_deref() == Some(lock.identity().client_id.as_str());

    print_json(&StatusReport {
        lock: &lock.identity().name,
        owner,
        held_by_me,
    });
    Ok(SUCCESS)
}

/// Takes the lock, runs `argv`, and releases the lock whatever the
/// command's outcome. Exits with the command's status.
pub fn run(ctx: &Context, name: String, wait: Duration, poll: Duration, argv: &[String]) -> CommandResult {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| CommandError::Usage("no command given after --".to_string()))?;

    let mut lock = ctx.initialized_lock(name)?;
    let outcome = acquire_within(&mut lock, wait, poll)?;
    if !outcome.is_held() {
        tracing::warn!(lock = %lock.identity().name, ?outcome, "Lock not acquired, command not run");
        return Ok(NOT_ACQUIRED);
    }

    tracing::info!(lock = %lock.identity().name, command = %program, "Running command under lock");
    let status = Command::new(program).args(args).status();

    // Released whether or not the command could be spawned
    let released = lock.try_release();

    let status = status.map_err(|source| CommandError::Spawn {
        command: program.clone(),
        source,
    })?;
    let outcome = released?;
    tracing::info!(lock = %lock.identity().name, ?outcome, "Lock released after command");

    Ok(status.code().unwrap_or(LOCK_FAILURE))
}
