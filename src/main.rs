//! replivault - Redundant object storage with self-healing replicas
//!
//! Usage:
//!   replivault init                  - Write a default config and open the vault
//!   replivault put <file>            - Store a file on every configured backend
//!   replivault get <id>              - Read an object, healing damaged replicas
//!   replivault verify <id>           - Check every replica of an object
//!   replivault sweep                 - Verify (and heal) all objects
//!   replivault daemon                - Run due backups until interrupted

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use replivault::{
    clock::format_millis,
    config::Config,
    engine::{Engine, PutOptions},
    scheduler::{BackupType, Frequency},
    vault::{ProgressCallback, SweepOptions, SweepProgress},
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "replivault")]
#[command(author = "replivault Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Redundant object storage with checksum verification and self-healing replicas")]
struct Cli {
    /// Configuration file path (JSON or YAML)
    #[arg(short, long, default_value = "~/.config/replivault/config.json")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration and initialize the vault
    Init {
        /// Data directory (defaults to the platform data dir)
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Store a file
    Put {
        /// File to store
        file: PathBuf,

        /// Object id (defaults to the file name)
        #[arg(long)]
        id: Option<String>,

        /// Number of replicas
        #[arg(short, long)]
        replicas: Option<usize>,

        /// Expected SHA-256 of the file; a mismatch quarantines the object
        #[arg(long)]
        expected: Option<String>,

        #[arg(long)]
        no_compress: bool,

        #[arg(long)]
        no_encrypt: bool,
    },

    /// Read an object
    Get {
        id: String,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Verify every replica of an object
    Verify { id: String },

    /// Repair damaged or missing replicas of an object
    Heal { id: String },

    /// Delete an object and all its replicas
    Delete { id: String },

    /// Verify every stored object
    Sweep {
        /// Report damage without repairing it
        #[arg(long)]
        no_heal: bool,
    },

    /// Inspect or release quarantined objects
    Quarantine {
        #[command(subcommand)]
        action: QuarantineAction,
    },

    /// List backup schedules
    Schedules,

    /// Change an existing backup schedule
    ScheduleSet {
        id: String,

        #[arg(long)]
        frequency: Option<Frequency>,

        #[arg(long)]
        backup_type: Option<BackupType>,

        #[arg(long)]
        enabled: Option<bool>,

        #[arg(long)]
        retention_days: Option<u64>,

        #[arg(long)]
        replicas: Option<usize>,
    },

    /// Run every due backup job now
    RunDue,

    /// Remove manifests past their retention
    Cleanup,

    /// Show vault, backup and integrity statistics
    Stats,

    /// Run due backups on the configured interval until interrupted
    Daemon,
}

#[derive(Subcommand)]
enum QuarantineAction {
    /// List quarantined objects
    List,

    /// Release one object
    Release { id: String },

    /// Release every object
    Clear,
}

fn main() {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG overrides the default level
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set subscriber: {}", e);
    }

    // Expand ~ in config path
    let config_path = expand_tilde(&cli.config);

    if let Err(e) = run_command(cli.command, &config_path) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run_command(command: Commands, config_path: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Init { data_dir } => cmd_init(config_path, data_dir),
        other => run_engine_command(other, config_path),
    }
}

fn run_engine_command(command: Commands, config_path: &Path) -> anyhow::Result<()> {
    let config = Config::load(config_path)
        .with_context(|| format!("loading {:?} (run 'replivault init' first)", config_path))?;
    let runtime = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
    runtime.block_on(dispatch(command, config))
}

async fn dispatch(command: Commands, config: Config) -> anyhow::Result<()> {
    let engine = Arc::new(Engine::open(config).context("opening vault")?);

    match command {
        Commands::Init { .. } => Ok(()),
        Commands::Put {
            file,
            id,
            replicas,
            expected,
            no_compress,
            no_encrypt,
        } => {
            let options = PutOptions {
                compress: no_compress.then_some(false),
                encrypt: no_encrypt.then_some(false),
                replica_count: replicas,
            };
            cmd_put(&engine, &file, id, expected, options).await
        }
        Commands::Get { id, output } => cmd_get(&engine, &id, output).await,
        Commands::Verify { id } => cmd_verify(&engine, &id).await,
        Commands::Heal { id } => cmd_heal(&engine, &id).await,
        Commands::Delete { id } => {
            engine.delete(&id).await?;
            info!("Deleted {}", id);
            Ok(())
        }
        Commands::Sweep { no_heal } => cmd_sweep(&engine, no_heal).await,
        Commands::Quarantine { action } => cmd_quarantine(&engine, action),
        Commands::Schedules => cmd_schedules(&engine),
        Commands::ScheduleSet {
            id,
            frequency,
            backup_type,
            enabled,
            retention_days,
            replicas,
        } => {
            let mut schedule = engine.scheduler().schedule(&id)?;
            if let Some(frequency) = frequency {
                schedule.frequency = frequency;
            }
            if let Some(backup_type) = backup_type {
                schedule.backup_type = backup_type;
            }
            if let Some(enabled) = enabled {
                schedule.enabled = enabled;
            }
            if let Some(days) = retention_days {
                schedule.retention_days = days;
            }
            if let Some(replicas) = replicas {
                schedule.replica_count = replicas;
            }
            engine.update_schedule(schedule)?;
            info!("Updated schedule {}", id);
            Ok(())
        }
        Commands::RunDue => cmd_run_due(&engine).await,
        Commands::Cleanup => {
            let pruned = engine.cleanup_old_backups()?;
            println!("Pruned {} manifests", pruned);
            Ok(())
        }
        Commands::Stats => cmd_stats(&engine),
        Commands::Daemon => cmd_daemon(&engine).await,
    }
}

fn cmd_init(config_path: &Path, data_dir: Option<PathBuf>) -> anyhow::Result<()> {
    info!("Initializing replivault...");

    if config_path.exists() {
        bail!("{:?} already exists", config_path);
    }

    let mut config = Config::default();
    if let Some(dir) = data_dir {
        config.data_dir = expand_tilde(&dir);
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    config.save(config_path)?;
    config.ensure_directories()?;

    // Opening creates the metadata store, the vault key and default schedules
    let engine = Engine::open(config.clone())?;
    let schedules = engine.list_schedules()?.len();

    info!("Configuration saved to {:?}", config_path);
    info!("Data directory: {:?}", config.data_dir);
    info!("Backends: {}", config.backends.len());
    info!("Backup schedules: {}", schedules);

    Ok(())
}

async fn cmd_put(
    engine: &Engine,
    file: &Path,
    id: Option<String>,
    expected: Option<String>,
    options: PutOptions,
) -> anyhow::Result<()> {
    let name = file
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .with_context(|| format!("{:?} has no usable file name", file))?;
    let id = id.unwrap_or_else(|| name.clone());
    let expected = expected
        .as_deref()
        .map(replivault::checksum::Checksum::parse)
        .transpose()?;

    let reader = std::fs::File::open(file).with_context(|| format!("opening {:?}", file))?;
    let chunks = engine.chunk_reader(reader)?;
    let entry = engine
        .put_chunks(&id, &name, &chunks, expected.as_ref(), options)
        .await?;

    println!("Stored {} ({} bytes)", entry.object_id, entry.original_size);
    println!("  Checksum: {}", entry.primary_checksum);
    println!("  Health:   {}", entry.health);
    for replica in &entry.replicas {
        println!("  Replica:  {} at {}", replica.kind, replica.path);
    }
    if engine.gate().is_quarantined(&id)? {
        println!("  QUARANTINED: post-write verification failed");
    }
    Ok(())
}

async fn cmd_get(engine: &Engine, id: &str, output: Option<PathBuf>) -> anyhow::Result<()> {
    let data = engine.get(id).await?;
    match output {
        Some(path) => {
            tokio::fs::write(&path, &data)
                .await
                .with_context(|| format!("writing {:?}", path))?;
            info!("Wrote {} bytes to {:?}", data.len(), path);
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&data)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

async fn cmd_verify(engine: &Engine, id: &str) -> anyhow::Result<()> {
    let report = engine.verify(id).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn cmd_heal(engine: &Engine, id: &str) -> anyhow::Result<()> {
    let healed = engine.heal(id).await?;
    if healed.is_empty() {
        println!("{}: nothing to heal", id);
    } else {
        let kinds: Vec<&str> = healed.iter().map(|k| k.as_str()).collect();
        println!("{}: healed {}", id, kinds.join(", "));
    }
    Ok(())
}

async fn cmd_sweep(engine: &Engine, no_heal: bool) -> anyhow::Result<()> {
    let progress: ProgressCallback = Box::new(|p: SweepProgress| {
        if p.total > 0 {
            eprint!("\rSweeping: {}/{} ({}%)", p.processed, p.total, p.progress_percent());
        }
    });

    let report = if no_heal {
        let options = SweepOptions {
            concurrency: engine.config().integrity.sweep_concurrency,
            auto_heal: false,
        };
        engine.vault().sweep(options, Some(progress)).await?
    } else {
        engine.sweep(Some(progress)).await?
    };
    eprintln!();

    println!("Integrity Sweep");
    println!("===============");
    println!("Objects:        {}", report.total);
    println!("Verified:       {}", report.verified);
    println!("Corrupted:      {}", report.corrupted);
    println!("Unrecoverable:  {}", report.unrecoverable);
    println!("Healed:         {}", report.healed);
    println!("Duration:       {} ms", report.duration_ms);
    for issue in &report.issues {
        println!(
            "  [{:?}] {} {}: {}",
            issue.severity,
            issue.object_id,
            issue.kind.map(|k| k.as_str()).unwrap_or("-"),
            issue.detail
        );
    }
    Ok(())
}

fn cmd_quarantine(engine: &Engine, action: QuarantineAction) -> anyhow::Result<()> {
    match action {
        QuarantineAction::List => {
            let held = engine.list_quarantined()?;
            if held.is_empty() {
                println!("No quarantined objects");
            }
            for record in held {
                println!(
                    "{} ({}) at {}: {}{}",
                    record.object_id,
                    record.name,
                    format_millis(record.quarantined_at),
                    record.reason,
                    if record.recoverable { "" } else { " [unrecoverable]" }
                );
            }
        }
        QuarantineAction::Release { id } => {
            if engine.clear_quarantine(&id)? {
                println!("Released {}", id);
            } else {
                println!("{} is not quarantined", id);
            }
        }
        QuarantineAction::Clear => {
            let released = engine.clear_all_quarantine()?;
            println!("Released {} objects", released);
        }
    }
    Ok(())
}

fn cmd_schedules(engine: &Engine) -> anyhow::Result<()> {
    println!("Backup Schedules");
    println!("================");
    for status in engine.schedule_status()? {
        println!(
            "{:<24} {:<12} {:<7} {:<8} next {}{}",
            status.id,
            status.backup_type.as_str(),
            status.frequency.as_str(),
            if status.enabled { "enabled" } else { "disabled" },
            format_millis(status.next_run),
            if status.due { " (due)" } else { "" }
        );
        if let (Some(last), Some(state)) = (status.last_run, status.last_status) {
            println!("{:<24} last run {} ({:?})", "", format_millis(last), state);
        }
    }
    Ok(())
}

async fn cmd_run_due(engine: &Engine) -> anyhow::Result<()> {
    let manifests = engine.run_due_jobs().await?;
    if manifests.is_empty() {
        println!("No backups due");
    }
    for manifest in manifests {
        println!(
            "{} {} backup: {:?}, {} objects, {} bytes",
            manifest.schedule_id,
            manifest.backup_type,
            manifest.status,
            manifest.file_count,
            manifest.total_size
        );
        if let Some(err) = manifest.error {
            println!("  {}", err);
        }
    }
    Ok(())
}

fn cmd_stats(engine: &Engine) -> anyhow::Result<()> {
    let entries = engine.entries()?;
    let stored: u64 = entries.iter().map(|e| e.original_size).sum();
    let backups = engine.backup_statistics()?;
    let corruption = engine.corruption_statistics()?;
    let verification = engine.verification_statistics()?;

    println!("replivault Status");
    println!("=================");
    println!();
    println!("Data directory: {:?}", engine.config().data_dir);
    println!("Objects: {} ({} bytes)", entries.len(), stored);
    for (kind, health) in engine.backend_health() {
        println!(
            "Backend {}: {:?} ({} ok, {} failed)",
            kind,
            health.status(),
            health.successes,
            health.failures
        );
    }
    println!();
    println!(
        "Backups: {} ({} incremental, {} full, {} bytes)",
        backups.total, backups.incremental, backups.full, backups.total_size
    );
    if let Some(last) = backups.last_backup {
        println!("Last backup: {}", format_millis(last));
    }
    if let Some(next) = backups.next_scheduled {
        println!("Next scheduled: {}", format_millis(next));
    }
    println!();
    println!(
        "Reports: {} ({} verified, {} corrupted, {:.1}% corruption rate)",
        verification.total, verification.verified, corruption.corrupted, corruption.corruption_rate
    );
    println!("Quarantined: {}", verification.quarantined);
    if !corruption.common_patterns.is_empty() {
        println!("Common patterns: {:?}", corruption.common_patterns);
    }
    Ok(())
}

async fn cmd_daemon(engine: &Arc<Engine>) -> anyhow::Result<()> {
    let daemon = Arc::new(engine.daemon());
    let handle = daemon.spawn();

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    daemon.stop();
    handle.await.context("joining scheduler daemon")?;

    let status = daemon.status().await;
    info!(
        "Daemon ran {} jobs ({} errors, {} manifests pruned)",
        status.run_count, status.error_count, status.manifests_pruned
    );
    Ok(())
}

/// Expand ~ to home directory
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
