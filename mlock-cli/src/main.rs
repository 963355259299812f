mod commands;
mod storage;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use mlock_core::config::{LockConfig, ReplicationStrategy};
use tracing_subscriber::EnvFilter;

use crate::commands::{CommandError, Context};

#[derive(Parser)]
#[command(
    name = "mlock",
    about = "mlock — Distributed lock for one-time operations such as schema migrations",
    version
)]
struct Cli {
    /// Storage backend: "sqlite:<path>", or "memory" for init/status only
    #[arg(long, global = true, env = "MLOCK_STORAGE")]
    storage: Option<String>,

    /// JSON file with lock configuration; flags override its values
    #[arg(long, global = true, env = "MLOCK_CONFIG")]
    config: Option<PathBuf>,

    /// Identity written as lock owner. Reuse it to release or re-enter.
    #[arg(long, global = true, env = "MLOCK_CLIENT_ID")]
    client_id: Option<String>,

    /// Namespace holding the lock table
    #[arg(long, global = true, env = "MLOCK_NAMESPACE")]
    namespace: Option<String>,

    /// Replication factor used when the namespace is created
    #[arg(long, global = true)]
    replication_factor: Option<u32>,

    /// Milliseconds a write may wait before it counts as timed out
    #[arg(long, global = true, default_value = "5000")]
    write_timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Target {
    /// Keyspace being migrated; the lock is "<keyspace>.schema_migration"
    #[arg(long)]
    keyspace: Option<String>,

    /// Explicit lock name, overrides --keyspace
    #[arg(long)]
    lock_name: Option<String>,
}

#[derive(Args)]
struct Polling {
    /// Keep trying to acquire for this many milliseconds
    #[arg(long, default_value = "0")]
    wait_ms: u64,

    /// Pause between acquisition attempts
    #[arg(long, default_value = "1000")]
    poll_ms: u64,
}

#[derive(Args)]
struct ReleaseRetry {
    /// Pause between release attempts after a write timeout
    #[arg(long)]
    retry_interval_ms: Option<u64>,

    /// Give up after this many release attempts
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Give up once releasing has taken this many milliseconds
    #[arg(long)]
    deadline_ms: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the locks namespace and table if missing
    Init,

    /// Try to take the lock
    Acquire {
        #[command(flatten)]
        target: Target,
        #[command(flatten)]
        polling: Polling,
    },

    /// Release the lock held by this client id
    Release {
        #[command(flatten)]
        target: Target,
        #[command(flatten)]
        retry: ReleaseRetry,
    },

    /// Show the current owner of the lock
    Status {
        #[command(flatten)]
        target: Target,
    },

    /// Run a command while holding the lock
    Run {
        #[command(flatten)]
        target: Target,
        #[command(flatten)]
        polling: Polling,
        #[command(flatten)]
        retry: ReleaseRetry,
        /// Command and arguments, after `--`
        #[arg(last = true, required = true)]
        argv: Vec<String>,
    },

    /// Print version information
    Version,
}

fn load_config(cli: &Cli) -> Result<LockConfig, CommandError> {
    let mut config = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path).map_err(|e| {
                CommandError::Usage(format!("failed to read config '{}': {}", path.display(), e))
            })?;
            serde_json::from_str::<LockConfig>(&raw).map_err(|e| {
                CommandError::Usage(format!("failed to parse config '{}': {}", path.display(), e))
            })?
        }
        None => LockConfig::default(),
    };

    match &cli.client_id {
        Some(client_id) => config.client_id = client_id.clone(),
        None if cli.config.is_none() => tracing::warn!(
            client_id = %config.client_id,
            "No client id given, generated one; pass it via --client-id to release later"
        ),
        None => {}
    }
    if let Some(namespace) = &cli.namespace {
        config.namespace = namespace.clone();
    }
    if let Some(replication_factor) = cli.replication_factor {
        config.replication = ReplicationStrategy::Simple { replication_factor };
    }

    Ok(config)
}

fn apply_retry(config: &mut LockConfig, retry: &ReleaseRetry) {
    if let Some(interval_ms) = retry.retry_interval_ms {
        config.release_retry.interval_ms = interval_ms;
    }
    if retry.max_attempts.is_some() {
        config.release_retry.max_attempts = retry.max_attempts;
    }
    if retry.deadline_ms.is_some() {
        config.release_retry.deadline_ms = retry.deadline_ms;
    }
}

fn execute(cli: Cli) -> Result<i32, CommandError> {
    if let Commands::Version = cli.command {
        println!("mlock {}", env!("CARGO_PKG_VERSION"));
        println!("Conditional-write migration lock");
        return Ok(commands::SUCCESS);
    }

    let mut config = load_config(&cli)?;
    if let Commands::Release { retry, .. } | Commands::Run { retry, .. } = &cli.command {
        apply_retry(&mut config, retry);
    }
    config
        .validate()
        .map_err(|e| CommandError::Usage(format!("invalid configuration: {}", e)))?;

    let shares_lock = matches!(
        cli.command,
        Commands::Acquire { .. } | Commands::Release { .. } | Commands::Run { .. }
    );
    let ctx = Context {
        config,
        storage: commands::resolve_storage(cli.storage.as_deref(), shares_lock)?,
        write_timeout_ms: cli.write_timeout_ms,
    };
    let name = |target: &Target| {
        commands::resolve_lock_name(target.keyspace.as_deref(), target.lock_name.as_deref())
    };

    match &cli.command {
        Commands::Init => commands::init(&ctx),
        Commands::Acquire { target, polling } => commands::acquire(
            &ctx,
            name(target)?,
            Duration::from_millis(polling.wait_ms),
            Duration::from_millis(polling.poll_ms),
        ),
        Commands::Release { target, .. } => commands::release(&ctx, name(target)?),
        Commands::Status { target } => commands::status(&ctx, name(target)?),
        Commands::Run {
            target,
            polling,
            argv,
            ..
        } => commands::run(
            &ctx,
            name(target)?,
            Duration::from_millis(polling.wait_ms),
            Duration::from_millis(polling.poll_ms),
            argv,
        ),
        Commands::Version => Ok(commands::SUCCESS),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match execute(cli) {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
