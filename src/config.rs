//! Command-line configuration for fleetmon.
//!
//! This module defines all CLI arguments using `clap` for parsing, and
//! derives the plain settings consumed by the sessions and the renderer.

use std::time::Duration;

use clap::Parser;

use crate::parser::DecodeOptions;
use crate::session::SessionSettings;

/// Default dump file name, stamped with the local start time.
fn default_dump_path() -> String {
    format!(
        "./monitoring-{}.csv",
        chrono::Local::now().format("%Y-%m-%d_%H:%M:%S")
    )
}

/// Live telemetry dashboard for a fleet of database hosts.
///
/// fleetmon opens one SSH session per host and runs a small sampling loop
/// on each of them. Every second it prints one row per host with:
///
/// - CPU busy/user/nice fractions
/// - Disk queue size, throughput and latency
/// - Network packet rates and new TCP connections
/// - The last JVM stop-the-world pause
/// - New ERROR/WARN lines in the application log
///
/// # Examples
///
/// ```bash
/// # Watch three nodes with the default key
/// fleetmon --hosts 10.0.0.1,10.0.0.2,10.0.0.3
///
/// # Wide layout, no loopback traffic, dump every row to CSV
/// fleetmon --hosts db1,db2 --big-screen --exclude-lo --dump
/// ```
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Monitor CPU, disk, network, GC and logs of many hosts over SSH")]
pub struct Config {
    /// Comma-separated list of hosts to monitor.
    #[arg(long, value_delimiter = ',', default_value = "127.0.0.1")]
    pub hosts: Vec<String>,

    /// Remote user for SSH.
    #[arg(short, long, default_value = "root")]
    pub user: String,

    /// Private key passed to `ssh -i`.
    ///
    /// When empty, ssh picks its default identity.
    #[arg(short, long, default_value = "")]
    pub key: String,

    /// SSH port.
    #[arg(short, long, default_value_t = 22)]
    pub port: u16,

    /// Append every computed row to a CSV file.
    #[arg(long)]
    pub dump: bool,

    /// Path of the CSV dump.
    ///
    /// Rows are appended if the file exists (headers are only written once).
    #[arg(long, default_value_t = default_dump_path())]
    pub dump_to: String,

    /// Print each host on a single wide line.
    ///
    /// By default a row is split in two halves to fit narrow terminals.
    #[arg(long)]
    pub big_screen: bool,

    /// Ignore the loopback interface in network rates.
    #[arg(long)]
    pub exclude_lo: bool,

    /// GC log scanned for the last stop-the-world pause. Empty disables it.
    #[arg(long, default_value = "/var/log/cassandra/gc.log")]
    pub gc_log_file: String,

    /// Application log grepped for ERROR and WARN lines. Empty disables it.
    #[arg(long, default_value = "/var/log/system.log")]
    pub log_file: String,

    /// Grep the application log every this many cycles.
    ///
    /// Grepping a large log every second is expensive on the remote host.
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u32).range(1..))]
    pub log_grep_freq: u32,

    /// Seconds between two remote measurements.
    #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
    pub measure_frequency: u64,

    /// Run in headless mode (no TUI, the table is printed each refresh).
    ///
    /// Forced when stdout is not a terminal.
    #[arg(long)]
    pub headless: bool,

    /// Write diagnostic logs to this file.
    ///
    /// Verbosity follows `RUST_LOG` (default `fleetmon=info`).
    #[arg(long)]
    pub trace_file: Option<String>,
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_owned())
}

impl Config {
    /// Hosts with surrounding blanks and empty entries removed.
    pub fn host_list(&self) -> Vec<String> {
        self.hosts.iter().filter_map(|h| non_empty(h)).collect()
    }

    pub fn key_path(&self) -> Option<String> {
        non_empty(&self.key)
    }

    pub fn decode_options(&self) -> DecodeOptions {
        DecodeOptions {
            exclude_loopback: self.exclude_lo,
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            measure_interval_secs: self.measure_frequency,
            gc_log_file: non_empty(&self.gc_log_file),
            log_file: non_empty(&self.log_file),
            log_grep_freq: self.log_grep_freq,
            backoff: Duration::from_secs(1),
            decode: self.decode_options(),
        }
    }
}
