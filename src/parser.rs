//! Counter parsers and snapshot decoder.
//!
//! The remote loop (see [`crate::session::remote_command`]) prints raw
//! kernel files mixed with sentinel lines. Each line is classified by
//! [`classify`] into exactly one [`Line`] variant, trying the patterns in a
//! fixed order, and [`decode_cycle`] folds one cycle worth of lines into a
//! [`Snapshot`].
//!
//! # Precedence
//!
//! 1. Sentinels (`__DATE__`, `__ERROR__`, `__WARN__`, `__NETSTAT_START__`,
//!    `__NETSTAT_END__`, `__END__`) by prefix.
//! 2. Inside the network section: connection-opening count, failed
//!    connection count, `netstat -i` interface line.
//! 3. Outside it: GC stop line, `/proc/diskstats` line, `/proc/stat` cpu
//!    line.
//!
//! The first match wins. Anything else is [`Line::Unrecognized`] and dropped.

use std::sync::LazyLock;

use regex::Regex;

use crate::metrics::{Cpu, Device, Interface, Snapshot};

pub const DATE_PREFIX: &str = "__DATE__";
pub const ERROR_PREFIX: &str = "__ERROR__";
pub const WARN_PREFIX: &str = "__WARN__";
pub const NETSTAT_START: &str = "__NETSTAT_START__";
pub const NETSTAT_END: &str = "__NETSTAT_END__";
pub const CYCLE_END: &str = "__END__";

static CPU_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^cpu\s{1,10}(\d{1,20})\s{1,20}(\d{1,20})\s{1,20}(\d{1,20})\s{1,20}(\d{1,20})",
        r"\s{1,20}(\d{1,20})\s{1,20}(\d{1,20})\s{1,20}(\d{1,20})(?:\s{1,20}(\d{1,20}))?",
    ))
    .expect("CPU_LINE is a valid regex pattern")
});

// major minor name, then the 11 classic counters. Newer kernels append
// discard/flush counters which are ignored.
static DEVICE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    let counters = r"\s{1,20}(\d{1,20})".repeat(11);
    Regex::new(&format!(
        r"^\s{{1,10}}\d{{1,10}}\s{{1,10}}\d{{1,10}}\s([0-9a-zA-Z]{{1,20}}){counters}"
    ))
    .expect("DEVICE_LINE is a valid regex pattern")
});

// Iface MTU [Met] RX-OK RX-ERR RX-DRP RX-OVR TX-OK TX-ERR TX-DRP TX-OVR Flg
static INTERFACE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    let counters = r"\s{1,20}(\d{1,20})".repeat(8);
    Regex::new(&format!(
        r"^(\w{{1,20}})\s{{1,20}}(\d{{1,20}})(?:\s{{1,20}}\d{{1,20}})?{counters}\s{{1,20}}(\w{{1,20}})$"
    ))
    .expect("INTERFACE_LINE is a valid regex pattern")
});

static CONNECTIONS_ACTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d{1,20}) active connections? opening")
        .expect("CONNECTIONS_ACTIVE is a valid regex pattern")
});

static CONNECTIONS_FAILED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d{1,20}) failed connection attempts")
        .expect("CONNECTIONS_FAILED is a valid regex pattern")
});

static GC_STOP_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"threads were stopped: (\d{1,10})[,.](\d{1,10}) seconds")
        .expect("GC_STOP_LINE is a valid regex pattern")
});

/// Options that change how a cycle is decoded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Drop the `lo` interface from the interface list
    pub exclude_loopback: bool,
}

/// Classification of a single line of remote output.
#[derive(Clone, Debug, PartialEq)]
pub enum Line {
    Date(i64),
    ErrorCount(u64),
    WarnCount(u64),
    NetworkStart,
    NetworkEnd,
    CycleEnd,
    ConnectionsActive(u64),
    ConnectionsFailed(u64),
    Interface(Interface),
    GcStop(f64),
    Device(Device),
    Cpu(Cpu),
    Unrecognized,
}

/// Remote epoch milliseconds of a `__DATE__` line.
pub fn parse_date(line: &str) -> Option<i64> {
    line.trim_end().strip_prefix(DATE_PREFIX)?.trim().parse().ok()
}

/// Classify one line. `in_network` selects the pattern set used for
/// unprefixed lines.
pub fn classify(line: &str, in_network: bool) -> Line {
    let line = line.trim_end();

    if line.starts_with(DATE_PREFIX) {
        return parse_date(line).map_or(Line::Unrecognized, Line::Date);
    }
    if let Some(rest) = line.strip_prefix(ERROR_PREFIX) {
        return rest.trim().parse().map_or(Line::Unrecognized, Line::ErrorCount);
    }
    if let Some(rest) = line.strip_prefix(WARN_PREFIX) {
        return rest.trim().parse().map_or(Line::Unrecognized, Line::WarnCount);
    }
    if line.starts_with(NETSTAT_START) {
        return Line::NetworkStart;
    }
    if line.starts_with(NETSTAT_END) {
        return Line::NetworkEnd;
    }
    if line.starts_with(CYCLE_END) {
        return Line::CycleEnd;
    }

    let parsed = if in_network {
        parse_connections_active(line)
            .map(Line::ConnectionsActive)
            .or_else(|| parse_connections_failed(line).map(Line::ConnectionsFailed))
            .or_else(|| parse_interface(line).map(Line::Interface))
    } else {
        parse_gc_stop(line)
            .map(Line::GcStop)
            .or_else(|| parse_device(line).map(Line::Device))
            .or_else(|| parse_cpu(line).map(Line::Cpu))
    };
    parsed.unwrap_or(Line::Unrecognized)
}

/// Parse the aggregate `cpu` line of `/proc/stat`.
///
/// Per-core lines (`cpu0`, `cpu1`, ...) do not match.
pub fn parse_cpu(line: &str) -> Option<Cpu> {
    let caps = CPU_LINE.captures(line)?;
    let n = |i: usize| -> Option<u64> { caps.get(i)?.as_str().parse().ok() };
    Some(Cpu {
        user: n(1)?,
        nice: n(2)?,
        system: n(3)?,
        idle: n(4)?,
        iowait: n(5)?,
        irq: n(6)?,
        softirq: n(7)?,
        steal: caps.get(8).map_or(Some(0), |m| m.as_str().parse().ok())?,
    })
}

/// Parse one `/proc/diskstats` line.
pub fn parse_device(line: &str) -> Option<Device> {
    let caps = DEVICE_LINE.captures(line)?;
    let n = |i: usize| -> Option<u64> { caps.get(i)?.as_str().parse().ok() };
    Some(Device {
        name: caps.get(1)?.as_str().to_string(),
        read_completed: n(2)?,
        read_merged: n(3)?,
        sectors_read: n(4)?,
        time_spent_reading: n(5)?,
        write_completed: n(6)?,
        write_merged: n(7)?,
        sectors_written: n(8)?,
        time_spent_writing: n(9)?,
        io_in_progress: n(10)?,
        io_time: n(11)?,
        weighted_io_time: n(12)?,
    })
}

/// Parse one `netstat -i` interface line (with or without the `Met` column).
pub fn parse_interface(line: &str) -> Option<Interface> {
    let caps = INTERFACE_LINE.captures(line)?;
    let n = |i: usize| -> Option<u64> { caps.get(i)?.as_str().parse().ok() };
    Some(Interface {
        name: caps.get(1)?.as_str().to_string(),
        mtu: n(2)?,
        rx_ok: n(3)?,
        rx_error: n(4)?,
        rx_dropped: n(5)?,
        rx_overrun: n(6)?,
        tx_ok: n(7)?,
        tx_error: n(8)?,
        tx_dropped: n(9)?,
        tx_overrun: n(10)?,
        flags: caps.get(11)?.as_str().to_string(),
    })
}

/// Parse `<n> active connections openings` from `netstat -s`.
pub fn parse_connections_active(line: &str) -> Option<u64> {
    CONNECTIONS_ACTIVE.captures(line)?.get(1)?.as_str().parse().ok()
}

/// Parse `<n> failed connection attempts` from `netstat -s`.
pub fn parse_connections_failed(line: &str) -> Option<u64> {
    CONNECTIONS_FAILED.captures(line)?.get(1)?.as_str().parse().ok()
}

/// Parse a GC log safepoint line into milliseconds.
///
/// `Total time for which application threads were stopped: 0,0123 seconds`
pub fn parse_gc_stop(line: &str) -> Option<f64> {
    let caps = GC_STOP_LINE.captures(line)?;
    let seconds: f64 = format!("{}.{}", caps.get(1)?.as_str(), caps.get(2)?.as_str())
        .parse()
        .ok()?;
    Some(seconds * 1000.0)
}

/// Decode the lines of one cycle (everything before an `__END__`).
///
/// If no `__DATE__` sentinel is present nothing else is trusted and the
/// result is [`Snapshot::missing_timestamp`]. Fields whose lines are absent
/// stay `None`/empty; the store decides what to carry over.
pub fn decode_cycle<S: AsRef<str>>(lines: &[S], options: &DecodeOptions) -> Snapshot {
    // The date must be known before anything else is kept. Last one wins.
    let timestamp = lines.iter().rev().find_map(|l| parse_date(l.as_ref()));

    let Some(timestamp) = timestamp else {
        return Snapshot::missing_timestamp();
    };

    let mut snapshot = Snapshot {
        timestamp,
        ..Snapshot::default()
    };
    let mut in_network = false;

    for line in lines {
        match classify(line.as_ref(), in_network) {
            Line::NetworkStart => in_network = true,
            Line::NetworkEnd => in_network = false,
            Line::ErrorCount(n) => snapshot.error_count = Some(n),
            Line::WarnCount(n) => snapshot.warn_count = Some(n),
            Line::ConnectionsActive(n) => snapshot.connection_active = Some(n),
            Line::ConnectionsFailed(n) => snapshot.connection_failed = Some(n),
            Line::Interface(iface) => {
                if !(options.exclude_loopback && iface.name == "lo") {
                    snapshot.interfaces.push(iface);
                }
            }
            Line::GcStop(ms) => snapshot.gc_stop_ms = Some(ms),
            Line::Device(device) => snapshot.devices.push(device),
            Line::Cpu(cpu) => snapshot.cpu = Some(cpu),
            Line::Date(_) | Line::CycleEnd | Line::Unrecognized => {}
        }
    }

    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::TIMESTAMP_MISSING;

    const DISK_SDA: &str = "   8       0 sda 200 3 4096 120 50 7 800 60 0 150 180";
    const DISK_SDA1: &str = "   8       1 sda1 20 0 160 12 5 0 80 6 0 15 18 0 0 0 0";

    fn sample_cycle() -> Vec<&'static str> {
        vec![
            "__ERROR__12",
            "__WARN__40",
            DISK_SDA,
            "cpu  100 10 50 800 5 1 1 1 0 0",
            "cpu0 50 5 25 400 2 0 0 0 0 0",
            "intr 123456 0 0",
            "__NETSTAT_START__",
            "Kernel Interface table",
            "Iface      MTU    RX-OK RX-ERR RX-DRP RX-OVR    TX-OK TX-ERR TX-DRP TX-OVR Flg",
            "eth0      1500  1000000      1      2      0   900000      0      0      0 BMRU",
            "lo       65536    5000      0      0      0     5000      0      0      0 LRU",
            "    1234 active connections openings",
            "    56 failed connection attempts",
            "__NETSTAT_END__",
            "__DATE__1700000000000",
            "2024-01-01T00:00:00.000+0000: 12.345: Total time for which application threads were stopped: 0,0123000 seconds, Stopping threads took: 0,0000100 seconds",
        ]
    }

    #[test]
    fn test_decode_full_cycle() {
        let snap = decode_cycle(&sample_cycle(), &DecodeOptions::default());

        assert_eq!(snap.timestamp, 1_700_000_000_000);
        let cpu = snap.cpu.expect("cpu line parsed");
        assert_eq!(cpu.user, 100);
        assert_eq!(cpu.idle, 800);
        assert_eq!(cpu.steal, 1);
        assert_eq!(snap.devices.len(), 1);
        assert_eq!(snap.devices[0].name, "sda");
        assert_eq!(snap.devices[0].read_completed, 200);
        assert_eq!(snap.devices[0].weighted_io_time, 180);
        assert_eq!(snap.interfaces.len(), 2);
        assert_eq!(snap.interfaces[0].name, "eth0");
        assert_eq!(snap.interfaces[0].rx_ok, 1_000_000);
        assert_eq!(snap.interfaces[0].tx_ok, 900_000);
        assert_eq!(snap.interfaces[0].flags, "BMRU");
        assert_eq!(snap.connection_active, Some(1234));
        assert_eq!(snap.connection_failed, Some(56));
        assert_eq!(snap.error_count, Some(12));
        assert_eq!(snap.warn_count, Some(40));
        let gc = snap.gc_stop_ms.expect("gc line parsed");
        assert!((gc - 12.3).abs() < 1e-9);
    }

    #[test]
    fn test_decode_is_deterministic() {
        let options = DecodeOptions::default();
        let first = decode_cycle(&sample_cycle(), &options);
        let second = decode_cycle(&sample_cycle(), &options);
        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_date_marks_cycle_non_authoritative() {
        let lines: Vec<&str> = sample_cycle()
            .into_iter()
            .filter(|l| !l.starts_with(DATE_PREFIX))
            .collect();
        let snap = decode_cycle(&lines, &DecodeOptions::default());
        assert_eq!(snap.timestamp, TIMESTAMP_MISSING);
        assert!(snap.cpu.is_none());
        assert!(snap.devices.is_empty());
        assert!(snap.error_count.is_none());
    }

    #[test]
    fn test_exclude_loopback() {
        let options = DecodeOptions {
            exclude_loopback: true,
        };
        let snap = decode_cycle(&sample_cycle(), &options);
        assert_eq!(snap.interfaces.len(), 1);
        assert_eq!(snap.interfaces[0].name, "eth0");
    }

    #[test]
    fn test_log_counts_absent_on_unsampled_cycle() {
        let snap = decode_cycle(
            &["__DATE__5", "cpu  1 2 3 4 5 6 7 8"],
            &DecodeOptions::default(),
        );
        assert_eq!(snap.timestamp, 5);
        assert!(snap.error_count.is_none());
        assert!(snap.warn_count.is_none());
        assert!(snap.connection_active.is_none());
    }

    #[test]
    fn test_device_line_with_extended_counters() {
        let device = parse_device(DISK_SDA1).expect("partition line parsed");
        assert_eq!(device.name, "sda1");
        assert_eq!(device.sectors_written, 80);
        assert_eq!(device.weighted_io_time, 18);
    }

    #[test]
    fn test_cpu_line_without_steal() {
        let cpu = parse_cpu("cpu  1 2 3 4 5 6 7").expect("seven counters accepted");
        assert_eq!(cpu.softirq, 7);
        assert_eq!(cpu.steal, 0);
        assert!(parse_cpu("cpu0 1 2 3 4 5 6 7 8").is_none());
    }

    #[test]
    fn test_interface_line_with_metric_column() {
        let iface =
            parse_interface("eth1  9000 0   77   1   2   3   88   4   5   6 BMRU").expect("parsed");
        assert_eq!(iface.mtu, 9000);
        assert_eq!(iface.rx_ok, 77);
        assert_eq!(iface.tx_ok, 88);
        assert_eq!(iface.tx_overrun, 6);
        assert!(parse_interface("Iface MTU RX-OK RX-ERR").is_none());
    }

    #[test]
    fn test_network_lines_only_match_inside_section() {
        let line = "    1234 active connections openings";
        assert_eq!(classify(line, true), Line::ConnectionsActive(1234));
        assert_eq!(classify(line, false), Line::Unrecognized);
        assert!(matches!(classify(DISK_SDA, true), Line::Unrecognized));
        assert!(matches!(classify(DISK_SDA, false), Line::Device(_)));
    }

    #[test]
    fn test_gc_stop_accepts_dot_separator() {
        let ms = parse_gc_stop("threads were stopped: 1.5 seconds").expect("parsed");
        assert!((ms - 1500.0).abs() < 1e-9);
    }

    #[test]
    fn test_garbage_is_discarded() {
        let snap = decode_cycle(
            &[
                "__DATE__42",
                "\u{fffd}\u{fffd}garbled",
                "bash: netstat: command not found",
                "__ERROR__",
                "cpu  x y z",
                "",
            ],
            &DecodeOptions::default(),
        );
        assert_eq!(snap.timestamp, 42);
        assert!(snap.cpu.is_none());
        assert!(snap.error_count.is_none());
    }

    #[test]
    fn test_trailing_carriage_return_is_ignored() {
        assert_eq!(classify("__DATE__99\r", false), Line::Date(99));
        assert!(matches!(
            classify("lo 65536 1 0 0 0 1 0 0 0 LRU\r", true),
            Line::Interface(_)
        ));
    }

    #[test]
    fn test_parse_date_only_reads_date_lines() {
        assert_eq!(parse_date("__DATE__1700000000000\r"), Some(1_700_000_000_000));
        assert_eq!(parse_date("__DATE__later"), None);
        assert_eq!(parse_date("cpu  1 2 3 4 5 6 7 8"), None);
        assert_eq!(parse_date("x__DATE__12"), None);
    }

    #[test]
    fn test_last_valid_date_wins() {
        let lines = ["__DATE__100", "cpu  1 2 3 4 5 6 7 8", "__DATE__200", "__DATE__bad", "__END__"];
        let snap = decode_cycle(&lines, &DecodeOptions::default());
        assert_eq!(snap.timestamp, 200);
        assert!(snap.cpu.is_some());
    }
}
