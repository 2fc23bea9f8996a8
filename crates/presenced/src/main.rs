//! presenced - RFID classroom presence daemon
//!
//! Accepts connections from RFID reader devices, routes scans through the
//! coordination core, and broadcasts activity to dashboard clients.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! presenced start
//!
//! # Start the daemon (background/daemonized)
//! presenced start -d
//!
//! # Start with a config file
//! presenced start --config /etc/presenced.toml
//!
//! # Stop the daemon
//! presenced stop
//!
//! # Check daemon status
//! presenced status
//!
//! # Override the listen address
//! PRESENCED_LISTEN=0.0.0.0:7642 presenced start
//!
//! # Enable debug logging
//! RUST_LOG=presenced=debug presenced start
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: graceful shutdown

use std::env;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use presence_core::{DeviceRecord, RoomId};
use presenced::clock::SystemClock;
use presenced::config::DaemonConfig;
use presenced::coordinator::spawn_coordinator;
use presenced::gateway::GatewayServer;
use presenced::notify::LoggingNotifier;
use presenced::schedule::StaticTimetable;
use presenced::store::Stores;

/// presenced - RFID classroom presence daemon
#[derive(Parser, Debug)]
#[command(name = "presenced", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,

        /// Path to the TOML config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
}

fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("presenced")
}

fn pid_file_path() -> PathBuf {
    state_dir().join("presenced.pid")
}

fn log_file_path() -> PathBuf {
    state_dir().join("presenced.log")
}

fn read_pid() -> Option<u32> {
    let path = pid_file_path();
    let mut file = File::open(&path).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

fn remove_pid_file() {
    let path = pid_file_path();
    let _ = fs::remove_file(path);
}

fn is_process_running(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

fn is_daemon_running() -> Option<u32> {
    if let Some(pid) = read_pid() {
        if is_process_running(pid) {
            return Some(pid);
        }
        // Stale PID file - remove it
        remove_pid_file();
    }
    None
}

fn stop_daemon(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        let result = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
        if result != 0 {
            bail!("Failed to send SIGTERM to process {pid}");
        }
    }
    #[cfg(not(unix))]
    {
        bail!("Stop command is only supported on Unix systems");
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let command = args.command.unwrap_or(Command::Start {
        daemon: false,
        config: None,
    });

    match command {
        Command::Start { daemon, config } => {
            if let Some(pid) = is_daemon_running() {
                eprintln!("Daemon is already running (PID {pid})");
                eprintln!("Use 'presenced stop' to stop it first.");
                process::exit(1);
            }

            if daemon {
                daemonize()?;
            }

            write_pid()?;

            let result = run_daemon(config);

            remove_pid_file();

            result
        }
        Command::Stop => {
            if let Some(pid) = is_daemon_running() {
                println!("Stopping daemon (PID {pid})...");
                stop_daemon(pid)?;

                for _ in 0..50 {
                    if !is_process_running(pid) {
                        println!("Daemon stopped.");
                        return Ok(());
                    }
                    std::thread::sleep(std::time::Duration::from_millis(100));
                }

                eprintln!("Daemon did not stop within 5 seconds.");
                process::exit(1);
            } else {
                println!("Daemon is not running.");
                Ok(())
            }
        }
        Command::Status => {
            if let Some(pid) = is_daemon_running() {
                println!("Daemon is running (PID {pid})");
                Ok(())
            } else {
                println!("Daemon is not running.");
                process::exit(1);
            }
        }
    }
}

fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = File::create(&log_path).context("Failed to create log file for stderr")?;

    let daemonize = Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr);

    daemonize.start().context("Failed to daemonize")?;

    Ok(())
}

/// Runs the daemon (async entry point).
#[tokio::main]
async fn run_daemon(config_path: Option<PathBuf>) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("presenced=info".parse()?)
                .add_directive("presence_core=info".parse()?)
                .add_directive("presence_protocol=info".parse()?),
        )
        .init();

    let mut config = match &config_path {
        Some(path) => DaemonConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => DaemonConfig::default(),
    };
    if let Ok(addr) = env::var("PRESENCED_LISTEN") {
        config.listen_addr = addr;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        config = ?config_path,
        "presenced starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    // Seed the in-memory store from the config file
    let (stores, memory) = Stores::in_memory();
    for user in &config.users {
        memory.add_user(user.clone());
    }
    for seed in &config.devices {
        memory.add_device(DeviceRecord::new(
            seed.device_id.clone(),
            RoomId::canonical(&seed.room),
            seed.placement,
        ));
    }
    info!(
        users = config.users.len(),
        devices = config.devices.len(),
        timetable_rows = config.timetable.len(),
        "Store seeded"
    );

    // Canonicalize timetable room labels on the way in
    let mut rows = config.timetable.clone();
    for row in &mut rows {
        row.room = RoomId::canonical(row.room.as_str());
    }
    let config = Arc::new(config);
    let resolver = Arc::new(StaticTimetable::new(rows, config.early_access()));

    let coordinator = spawn_coordinator(
        config.clone(),
        stores,
        resolver,
        Arc::new(LoggingNotifier),
        Arc::new(SystemClock),
        cancel_token.clone(),
    )
    .await
    .context("Failed to start coordinator")?;
    info!("Coordinator started");

    let server = GatewayServer::new(config.listen_addr.clone(), coordinator, cancel_token);

    info!(addr = %config.listen_addr, "Starting gateway");

    if let Err(e) = server.run().await {
        error!(error = %e, "Gateway error");
        return Err(e.into());
    }

    info!("presenced stopped");
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
