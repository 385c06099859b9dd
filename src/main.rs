use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use attendance_window::config::{self, AppConfig};
use attendance_window::logging::init_logging;
use attendance_window::state::{FileStore, Snapshot, SnapshotStore};
use attendance_window::{AdminCredentials, Coordinator, ExportFormat, SystemClock, export, platform, server};

mod cli;

use cli::{Args, Commands};

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Serve { bind } => serve(args.config.as_deref(), bind, args.verbose),
        Commands::Status => status(args.config.as_deref(), args.verbose),
        Commands::Export { format, output } => {
            export_log(args.config.as_deref(), format, output.as_deref(), args.verbose)
        }
        Commands::HashSecret { secret } => {
            println!("{}", AdminCredentials::hash_secret(&secret));
            Ok(())
        }
        Commands::Init { output, force } => init(output, force),
    }
}

/// Resolve and load the configuration, applying environment overrides
fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => config::default_config_path()?,
    };

    let mut config = AppConfig::load_or_default(&path)?;
    config.apply_env_overrides(|key| std::env::var(key).ok());
    Ok(config)
}

/// Run the coordinator until Ctrl-C
fn serve(config_path: Option<&Path>, bind: Option<String>, verbose: bool) -> Result<()> {
    let mut config = load_config(config_path)?;
    init_logging(verbose, Some(&config.logging.level));

    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    config.validate().context("Invalid configuration")?;

    let credentials = config.credentials()?;
    config.forget_secret();

    let state_path = config.state_path()?;
    tracing::info!("State file: {}", state_path.display());

    let coordinator = Coordinator::open(
        Box::new(FileStore::new(state_path)),
        Arc::new(SystemClock),
        credentials,
        config.coordinator_settings(),
    )?;
    let coordinator = Arc::new(coordinator);

    let server_config = config.server_config();
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(async move {
        let listener = server::bind(&server_config).await?;
        server::serve(listener, coordinator, server_config.max_connections, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown requested");
        })
        .await
    })
}

/// Read the persisted snapshot without taking ownership of it
fn read_snapshot(config: &AppConfig) -> Result<(PathBuf, Option<Snapshot>)> {
    let state_path = config.state_path()?;
    let snapshot = FileStore::new(&state_path).load()?;
    Ok((state_path, snapshot))
}

/// Show persisted state
fn status(config_path: Option<&Path>, verbose: bool) -> Result<()> {
    let config = load_config(config_path)?;
    init_logging(verbose, Some(&config.logging.level));

    println!("Attendance Window - Status");
    println!();

    let (state_path, snapshot) = read_snapshot(&config)?;
    println!("State file: {}", state_path.display());

    let Some(snapshot) = snapshot else {
        println!("Status: no state recorded yet");
        return Ok(());
    };

    let window = snapshot.window();
    let remaining = window.remaining_seconds(chrono::Utc::now());

    println!();
    match window.window_start {
        Some(started) if remaining > 0 => {
            println!("Window: OPEN");
            println!("  Started: {}", started.format("%Y-%m-%d %H:%M:%S UTC"));
            println!(
                "  Remaining: {}",
                format_duration(chrono::Duration::seconds(remaining as i64))
            );
        }
        Some(started) => {
            println!("Window: EXPIRED");
            println!("  Started: {}", started.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        None => println!("Window: CLOSED"),
    }

    println!("Records: {}", snapshot.records.len());
    println!(
        "Admin session: {}",
        if snapshot.admin_session_active { "active" } else { "none" }
    );

    Ok(())
}

/// Export the persisted log
fn export_log(
    config_path: Option<&Path>,
    format: ExportFormat,
    output: Option<&Path>,
    verbose: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    init_logging(verbose, Some(&config.logging.level));

    let (_, snapshot) = read_snapshot(&config)?;
    let records = snapshot.map(|s| s.records).unwrap_or_default();
    let body = export::export_records(&records, format)?;

    match output {
        Some(path) => {
            platform::atomic_write(path, body.as_bytes())?;
            println!("Exported {} records to {}", records.len(), path.display());
        }
        None => println!("{}", body),
    }

    Ok(())
}

/// Write an example configuration file
fn init(output: Option<PathBuf>, force: bool) -> Result<()> {
    let path = match output {
        Some(path) => path,
        None => config::default_config_path()?,
    };

    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    platform::atomic_write(&path, config::EXAMPLE_CONFIG.as_bytes())?;

    println!("Wrote example configuration to {}", path.display());
    println!("Set admin.secret (or admin.secret_sha256) before running `attendance-window serve`.");
    Ok(())
}

/// Format duration for display
fn format_duration(duration: chrono::Duration) -> String {
    let secs = duration.num_seconds();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}
