//! smux daemon entry point.
//!
//! ```bash
//! # Start the daemon (foreground)
//! smuxd start
//!
//! # Start the daemon (background/daemonized)
//! smuxd start -d
//!
//! # Stop the daemon
//! smuxd stop
//!
//! # Check daemon status
//! smuxd status
//!
//! # Custom socket path
//! smuxd start -S /run/smux.sock
//!
//! # Enable debug logging
//! RUST_LOG=smuxd=debug smuxd start
//! ```
//!
//! Signals: SIGINT/SIGTERM shut down, SIGCHLD reaps children, SIGUSR1
//! recreates the socket, SIGUSR2 toggles verbose logging.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use smuxd::{default_socket_path, logging, Server, ServerOptions};

/// smux daemon - terminal multiplexer server
#[derive(Parser, Debug)]
#[command(name = "smuxd", version, about)]
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

        /// Socket path (defaults to a per-user path under the temp dir)
        #[arg(short = 'S', long)]
        socket: Option<PathBuf>,

        /// Keep running with no sessions
        #[arg(long)]
        no_exit_empty: bool,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
}

/// Returns the path to the PID file.
fn pid_file_path() -> PathBuf {
    let state_dir = dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("smux");
    state_dir.join("smuxd.pid")
}

/// Returns the path to the log file used when daemonized.
fn log_file_path() -> PathBuf {
    let state_dir = dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("smux");
    state_dir.join("smuxd.log")
}

/// Reads the PID from the PID file, if it exists.
fn read_pid() -> Option<u32> {
    let mut file = File::open(pid_file_path()).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

/// Writes the current PID to the PID file.
fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("failed to create state directory")?;
    }
    let mut file = File::create(&path).context("failed to create PID file")?;
    write!(file, "{}", process::id()).context("failed to write PID")?;
    Ok(())
}

fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

/// Checks if a process with the given PID is running.
fn is_process_running(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

/// Checks if the daemon is already running, clearing stale PID files.
fn is_daemon_running() -> Option<u32> {
    if let Some(pid) = read_pid() {
        if is_process_running(pid) {
            return Some(pid);
        }
        remove_pid_file();
    }
    None
}

/// Sends SIGTERM to the daemon process.
fn stop_daemon(pid: u32) -> Result<()> {
    let result = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
    if result != 0 {
        bail!("failed to send SIGTERM to process {pid}");
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let command = args.command.unwrap_or(Command::Start {
        daemon: false,
        socket: None,
        no_exit_empty: false,
    });

    match command {
        Command::Start {
            daemon,
            socket,
            no_exit_empty,
        } => {
            if let Some(pid) = is_daemon_running() {
                eprintln!("Daemon is already running (PID {pid})");
                eprintln!("Use 'smuxd stop' to stop it first.");
                process::exit(1);
            }

            if daemon {
                // Daemonize before starting the tokio runtime.
                daemonize()?;
            }

            write_pid()?;
            let result = run_daemon(socket, no_exit_empty);
            remove_pid_file();
            result
        }
        Command::Stop => {
            if let Some(pid) = is_daemon_running() {
                println!("Stopping daemon (PID {pid})...");
                stop_daemon(pid)?;

                // Wait for the process to exit (up to 5 seconds).
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
                let socket = default_socket_path();
                if socket.exists() {
                    println!("Socket: {}", socket.display());
                }
                Ok(())
            } else {
                println!("Daemon is not running.");
                process::exit(1);
            }
        }
    }
}

/// Daemonizes the current process.
fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("failed to create log file for stdout")?;
    let stderr = File::create(&log_path).context("failed to create log file for stderr")?;

    Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("failed to daemonize")?;

    Ok(())
}

/// Runs the daemon (async entry point).
#[tokio::main]
async fn run_daemon(socket: Option<PathBuf>, no_exit_empty: bool) -> Result<()> {
    let log_control = logging::init("smuxd=info,smux_core=info,smux_protocol=info")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "smux daemon starting"
    );

    let socket_path = socket.unwrap_or_else(default_socket_path);
    let mut options = ServerOptions::default();
    if no_exit_empty {
        options.exit_empty = false;
    }

    let server = Server::new(socket_path, options).with_log_control(log_control);
    server.run().await.context("server failed")?;

    info!("smux daemon stopped");
    Ok(())
}
