//! # fleetmon
//!
//! A live telemetry dashboard for a fleet of database hosts.
//!
//! ## Overview
//!
//! `fleetmon` opens one SSH session per host and runs a small sampling loop
//! remotely (`/proc/stat`, `/proc/diskstats`, `netstat`, the JVM GC log and
//! the application log). The raw counters stream back continuously; every
//! second the dashboard turns the last two samples of each host into rates
//! and prints one colored row per host.
//!
//! A host that stops answering shows a reading error on its row while its
//! session keeps reconnecting in the background.
//!
//! ## Usage
//!
//! ```bash
//! # Run with TUI (default)
//! fleetmon --hosts db1,db2,db3 --user cassandra
//!
//! # Headless, with a CSV dump and diagnostic logs
//! fleetmon --hosts db1,db2 --headless --dump --trace-file fleetmon.log
//! ```
//!
//! ## Module Organization
//!
//! - [`config`]: CLI argument parsing and configuration
//! - [`metrics`]: Raw counter snapshots
//! - [`parser`]: Line classifiers and the cycle decoder
//! - [`session`]: Remote sessions and their reconnect loop
//! - [`ssh`]: The `ssh` transport
//! - [`store`]: Per-host state shared between sessions and the renderer
//! - [`aggregator`]: Rates and percentages between two snapshots
//! - [`report`]: The dashboard table
//! - [`export`]: CSV dump
//! - [`app`]: One refresh of the dashboard
//! - [`ui`]: Terminal user interface

mod aggregator;
mod app;
mod config;
mod error;
mod export;
mod format;
mod metrics;
mod parser;
mod report;
mod session;
mod ssh;
mod store;
mod thresholds;
mod ui;

use std::fs::OpenOptions;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use app::App;
use config::Config;
use ssh::SshTransport;
use store::HostStore;

/// The dashboard refresh period.
const REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// How long exit waits for sessions to notice the stop flag.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

fn main() -> std::io::Result<()> {
    let config = Config::parse();

    // Check if stdout is a TTY - if not, force headless mode
    let terminal = is_terminal();
    let use_headless = config.headless || !terminal;
    if !config.headless && !terminal {
        eprintln!("Warning: stdout is not a TTY, running in headless mode");
    }

    init_logging(&config, use_headless)?;

    let hosts = config.host_list();
    if hosts.is_empty() {
        eprintln!("error: no host to monitor, check --hosts");
        std::process::exit(2);
    }

    let store = Arc::new(HostStore::new(hosts));
    let app = App::new(config.clone(), Arc::clone(&store))?;

    // Setup Ctrl+C / SIGTERM handler
    let running = Arc::new(AtomicBool::new(true));
    setup_signal_handler(running.clone());

    let transport = Arc::new(SshTransport {
        user: config.user.clone(),
        key: config.key_path(),
        port: config.port,
    });
    let sessions = session::spawn_all(store.hosts(), transport, &config.session_settings())?;
    info!(hosts = sessions.len(), "sessions started");

    if use_headless {
        ui::run_headless(app, running, REFRESH_INTERVAL, terminal)?;
    } else {
        ui::run(app, running, REFRESH_INTERVAL)?;
    }

    let left = session::shutdown(sessions, SHUTDOWN_GRACE);
    if left > 0 {
        info!(sessions = left, "sessions still blocked on a read, not joined");
    }
    info!("stopped");
    Ok(())
}

/// Install the tracing subscriber.
///
/// Logs go to `--trace-file` when given, to stderr in headless mode, and
/// nowhere while the TUI owns the screen.
fn init_logging(config: &Config, headless: bool) -> std::io::Result<()> {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fleetmon=info"));

    if let Some(path) = &config.trace_file {
        let file = OpenOptions::new().append(true).create(true).open(path)?;
        tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    } else if headless {
        tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

/// Global flag for signal handler (must be static for signal safety).
static SIGNAL_RECEIVED: AtomicBool = AtomicBool::new(false);

/// Set up signal handlers for graceful shutdown.
fn setup_signal_handler(running: Arc<AtomicBool>) {
    // Spawn a thread to monitor the signal flag and propagate to running
    let running_clone = running.clone();
    std::thread::spawn(move || {
        while running_clone.load(Ordering::Relaxed) {
            if SIGNAL_RECEIVED.load(Ordering::Relaxed) {
                running_clone.store(false, Ordering::Relaxed);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(50));
        }
    });

    unsafe {
        libc::signal(
            libc::SIGINT,
            signal_handler as *const () as libc::sighandler_t,
        );
        libc::signal(
            libc::SIGTERM,
            signal_handler as *const () as libc::sighandler_t,
        );
    }
}

/// Signal handler that sets the signal flag (async-signal-safe).
extern "C" fn signal_handler(_: i32) {
    SIGNAL_RECEIVED.store(true, Ordering::Relaxed);
}

/// Check if stdout is connected to a terminal.
fn is_terminal() -> bool {
    unsafe { libc::isatty(libc::STDOUT_FILENO) != 0 }
}
