//! Rate and percentage computations over a pair of snapshots.
//!
//! Everything here is a pure function of `(current, previous)`. `None`
//! means "unknown": a missing counter, a non-authoritative snapshot, a
//! zero/negative elapsed time, or a sum of garbled counters overflowing.
//! Nothing in this module can panic or return NaN/infinity.
//!
//! Counter regressions (a device swapped, an interface reset) are clamped:
//! a counter that went backwards contributes a delta of 0.

use crate::metrics::{CpuField, DeviceField, InterfaceField, Snapshot};
use crate::store::HostView;

/// Milliseconds between two authoritative snapshots of the remote clock.
pub fn elapsed_ms(current: &Snapshot, previous: &Snapshot) -> Option<f64> {
    if !current.is_authoritative() || !previous.is_authoritative() {
        return None;
    }
    let elapsed = current.timestamp - previous.timestamp;
    (elapsed > 0).then_some(elapsed as f64)
}

fn comparable(current: &Snapshot, previous: &Snapshot) -> bool {
    current.is_authoritative() && previous.is_authoritative()
}

/// Fraction of CPU time that was not idle/iowait, in `[0, 1]`.
pub fn cpu_busy(current: &Snapshot, previous: &Snapshot) -> Option<f64> {
    if !comparable(current, previous) {
        return None;
    }
    let (cur, prev) = (current.cpu?, previous.cpu?);
    let total = cur.total()?.saturating_sub(prev.total()?);
    if total == 0 {
        return None;
    }
    let idle = cur.total_idle()?.saturating_sub(prev.total_idle()?).min(total);
    Some(1.0 - idle as f64 / total as f64)
}

/// Share of CPU time spent in one category, in `[0, 1]`.
pub fn cpu_share(current: &Snapshot, previous: &Snapshot, field: CpuField) -> Option<f64> {
    if !comparable(current, previous) {
        return None;
    }
    let (cur, prev) = (current.cpu?, previous.cpu?);
    let total = cur.total()?.saturating_sub(prev.total()?);
    if total == 0 {
        return None;
    }
    let category = cur.get(field).saturating_sub(prev.get(field)).min(total);
    Some(1.0 - (total - category) as f64 / total as f64)
}

// Devices and interfaces are summed per list, not matched by name. The
// monitored fleets have a small, stable device set, so summing all slots of
// each side is equivalent and keeps a disappearing device from dropping the
// whole column.
fn list_delta<T>(current: &[T], previous: &[T], value: impl Fn(&T) -> u64) -> Option<u64> {
    if current.is_empty() || previous.is_empty() {
        return None;
    }
    let sum = |list: &[T]| list.iter().map(&value).try_fold(0u64, u64::checked_add);
    Some(sum(current)?.saturating_sub(sum(previous)?))
}

/// Aggregate delta of one counter across all devices.
pub fn device_delta(current: &Snapshot, previous: &Snapshot, field: DeviceField) -> Option<u64> {
    if !comparable(current, previous) {
        return None;
    }
    list_delta(&current.devices, &previous.devices, |d| d.get(field))
}

/// Aggregate delta of one counter across all interfaces.
pub fn interface_delta(
    current: &Snapshot,
    previous: &Snapshot,
    field: InterfaceField,
) -> Option<u64> {
    if !comparable(current, previous) {
        return None;
    }
    list_delta(&current.interfaces, &previous.interfaces, |i| i.get(field))
}

/// Aggregate device delta per millisecond of remote time.
pub fn device_rate_per_ms(current: &Snapshot, previous: &Snapshot, field: DeviceField) -> Option<f64> {
    let elapsed = elapsed_ms(current, previous)?;
    Some(device_delta(current, previous, field)? as f64 / elapsed)
}

/// Aggregate device delta per second of remote time.
pub fn device_rate_per_sec(current: &Snapshot, previous: &Snapshot, field: DeviceField) -> Option<f64> {
    device_rate_per_ms(current, previous, field).map(|r| r * 1000.0)
}

/// Sum of several interface counters per second of remote time.
pub fn interface_rate_per_sec(
    current: &Snapshot,
    previous: &Snapshot,
    fields: &[InterfaceField],
) -> Option<f64> {
    let elapsed = elapsed_ms(current, previous)?;
    let mut total = 0u64;
    for field in fields {
        total = total.checked_add(interface_delta(current, previous, *field)?)?;
    }
    Some(total as f64 / elapsed * 1000.0)
}

/// Average request queue size (`avgqu-sz`): weighted I/O time per elapsed ms.
pub fn avg_queue_size(current: &Snapshot, previous: &Snapshot) -> Option<f64> {
    device_rate_per_ms(current, previous, DeviceField::WeightedIoTime)
}

fn await_ms(current: &Snapshot, previous: &Snapshot, time: DeviceField, completed: DeviceField) -> Option<f64> {
    let elapsed = elapsed_ms(current, previous)?;
    let completed = device_delta(current, previous, completed)?;
    let time = device_delta(current, previous, time)?;
    if completed == 0 {
        // No request finished: 0 by definition, not a measured latency.
        return Some(0.0);
    }
    Some(time as f64 / completed as f64 / elapsed * 1000.0)
}

/// Read wait indicator (`r_await`).
pub fn read_await(current: &Snapshot, previous: &Snapshot) -> Option<f64> {
    await_ms(current, previous, DeviceField::TimeSpentReading, DeviceField::ReadCompleted)
}

/// Write wait indicator (`w_await`).
pub fn write_await(current: &Snapshot, previous: &Snapshot) -> Option<f64> {
    await_ms(current, previous, DeviceField::TimeSpentWriting, DeviceField::WriteCompleted)
}

/// Cycle-to-cycle delta of a connection counter (not time normalised).
pub fn counter_delta(
    current: &Snapshot,
    previous: &Snapshot,
    value: impl Fn(&Snapshot) -> Option<u64>,
) -> Option<u64> {
    if !comparable(current, previous) {
        return None;
    }
    Some(value(current)?.saturating_sub(value(previous)?))
}

const RX_FAILURES: [InterfaceField; 3] = [
    InterfaceField::RxError,
    InterfaceField::RxDropped,
    InterfaceField::RxOverrun,
];
const TX_FAILURES: [InterfaceField; 3] = [
    InterfaceField::TxError,
    InterfaceField::TxDropped,
    InterfaceField::TxOverrun,
];

/// Every metric shown for one host during one refresh.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HostReport {
    pub cpu_busy: Option<f64>,
    pub cpu_user: Option<f64>,
    pub cpu_nice: Option<f64>,
    pub avg_queue_size: Option<f64>,
    pub reads_per_sec: Option<f64>,
    pub sectors_read_per_sec: Option<f64>,
    pub read_await: Option<f64>,
    pub writes_per_sec: Option<f64>,
    pub sectors_written_per_sec: Option<f64>,
    pub write_await: Option<f64>,
    pub rx_ok_per_sec: Option<f64>,
    pub rx_failed_per_sec: Option<f64>,
    pub tx_ok_per_sec: Option<f64>,
    pub tx_failed_per_sec: Option<f64>,
    pub connections_opened: Option<u64>,
    pub connections_failed: Option<u64>,
    pub gc_stop_ms: Option<f64>,
    pub new_warnings: Option<u64>,
    pub new_errors: Option<u64>,
}

impl HostReport {
    pub fn from_view(view: &HostView) -> Self {
        let (cur, prev) = (&view.current, &view.previous);
        Self {
            cpu_busy: cpu_busy(cur, prev),
            cpu_user: cpu_share(cur, prev, CpuField::User),
            cpu_nice: cpu_share(cur, prev, CpuField::Nice),
            avg_queue_size: avg_queue_size(cur, prev),
            reads_per_sec: device_rate_per_sec(cur, prev, DeviceField::ReadCompleted),
            sectors_read_per_sec: device_rate_per_sec(cur, prev, DeviceField::SectorsRead),
            read_await: read_await(cur, prev),
            writes_per_sec: device_rate_per_sec(cur, prev, DeviceField::WriteCompleted),
            sectors_written_per_sec: device_rate_per_sec(cur, prev, DeviceField::SectorsWritten),
            write_await: write_await(cur, prev),
            rx_ok_per_sec: interface_rate_per_sec(cur, prev, &[InterfaceField::RxOk]),
            rx_failed_per_sec: interface_rate_per_sec(cur, prev, &RX_FAILURES),
            tx_ok_per_sec: interface_rate_per_sec(cur, prev, &[InterfaceField::TxOk]),
            tx_failed_per_sec: interface_rate_per_sec(cur, prev, &TX_FAILURES),
            connections_opened: counter_delta(cur, prev, |s| s.connection_active),
            connections_failed: counter_delta(cur, prev, |s| s.connection_failed),
            gc_stop_ms: cur.gc_stop_ms.filter(|_| cur.is_authoritative()),
            new_warnings: view.warnings.delta(),
            new_errors: view.errors.delta(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{Cpu, Device, Interface};
    use crate::parser::{decode_cycle, DecodeOptions};
    use crate::store::{LogCounter, SessionStatus};

    fn cpu(user: u64, idle: u64, iowait: u64) -> Cpu {
        Cpu {
            user,
            nice: 10,
            system: 50,
            idle,
            iowait,
            irq: 1,
            softirq: 1,
            steal: 1,
        }
    }

    fn disk(reads: u64, read_ms: u64, writes: u64, write_ms: u64, weighted: u64) -> Device {
        Device {
            name: "sda".into(),
            read_completed: reads,
            sectors_read: reads * 8,
            time_spent_reading: read_ms,
            write_completed: writes,
            sectors_written: writes * 8,
            time_spent_writing: write_ms,
            weighted_io_time: weighted,
            ..Device::default()
        }
    }

    fn iface(rx: u64, tx: u64, rx_err: u64) -> Interface {
        Interface {
            name: "eth0".into(),
            mtu: 1500,
            rx_ok: rx,
            rx_error: rx_err,
            tx_ok: tx,
            flags: "BMRU".into(),
            ..Interface::default()
        }
    }

    fn assert_close(actual: Option<f64>, expected: f64) {
        let actual = actual.expect("value should be known");
        assert!((actual - expected).abs() < 1e-9, "{actual} != {expected}");
    }

    fn pair() -> (Snapshot, Snapshot) {
        let previous = Snapshot {
            timestamp: 1_000,
            cpu: Some(cpu(100, 800, 0)),
            devices: vec![disk(100, 500, 50, 100, 1_000)],
            interfaces: vec![iface(1_000, 2_000, 0)],
            connection_active: Some(10),
            connection_failed: Some(1),
            ..Snapshot::default()
        };
        let current = Snapshot {
            timestamp: 3_000,
            cpu: Some(cpu(150, 1_000, 50)),
            devices: vec![disk(300, 900, 50, 100, 3_000)],
            interfaces: vec![iface(5_000, 2_400, 6)],
            connection_active: Some(25),
            connection_failed: Some(1),
            gc_stop_ms: Some(12.5),
            ..Snapshot::default()
        };
        (current, previous)
    }

    #[test]
    fn test_cpu_busy_and_share() {
        let (cur, prev) = pair();
        // total delta = 50 + 200 + 50 = 300, idle delta = 250
        let busy = cpu_busy(&cur, &prev).expect("known");
        assert!((busy - 50.0 / 300.0).abs() < 1e-12);
        let user = cpu_share(&cur, &prev, CpuField::User).expect("known");
        assert!((user - 50.0 / 300.0).abs() < 1e-12);
        let nice = cpu_share(&cur, &prev, CpuField::Nice).expect("known");
        assert!(nice.abs() < 1e-12);
    }

    #[test]
    fn test_cpu_busy_stays_in_unit_interval() {
        let (_, prev) = pair();
        for (user, idle, iowait) in [(100, 800, 0), (100, 5_000, 7), (9_000, 800, 0), (100, 799, 0)] {
            let cur = Snapshot {
                timestamp: 2_000,
                cpu: Some(cpu(user, idle, iowait)),
                ..Snapshot::default()
            };
            if let Some(busy) = cpu_busy(&cur, &prev) {
                assert!((0.0..=1.0).contains(&busy), "busy={busy}");
            }
        }
    }

    #[test]
    fn test_cpu_unknown_without_cpu_line() {
        let (mut cur, prev) = pair();
        cur.cpu = None;
        assert_eq!(cpu_busy(&cur, &prev), None);
        assert_eq!(cpu_share(&cur, &prev, CpuField::User), None);
    }

    #[test]
    fn test_disk_rates() {
        let (cur, prev) = pair();
        // 200 reads in 2 s
        assert_close(device_rate_per_sec(&cur, &prev, DeviceField::ReadCompleted), 100.0);
        assert_close(device_rate_per_sec(&cur, &prev, DeviceField::SectorsRead), 800.0);
        // 2000 weighted ms over 2000 ms
        assert_close(avg_queue_size(&cur, &prev), 1.0);
        // 400 ms / 200 reads / 2000 ms * 1000
        assert_close(read_await(&cur, &prev), 1.0);
    }

    #[test]
    fn test_await_is_zero_without_completed_requests() {
        let (cur, prev) = pair();
        assert_eq!(device_delta(&cur, &prev, DeviceField::WriteCompleted), Some(0));
        assert_eq!(write_await(&cur, &prev), Some(0.0));
    }

    #[test]
    fn test_network_and_connections() {
        let (cur, prev) = pair();
        assert_close(interface_rate_per_sec(&cur, &prev, &[InterfaceField::RxOk]), 2_000.0);
        assert_close(interface_rate_per_sec(&cur, &prev, &RX_FAILURES), 3.0);
        assert_eq!(counter_delta(&cur, &prev, |s| s.connection_active), Some(15));
        assert_eq!(counter_delta(&cur, &prev, |s| s.connection_failed), Some(0));
    }

    #[test]
    fn test_missing_timestamp_makes_everything_unknown() {
        let (_, prev) = pair();
        let view = HostView {
            name: "db1".into(),
            current: Snapshot::missing_timestamp(),
            previous: prev,
            errors: LogCounter::default(),
            warnings: LogCounter::default(),
            status: SessionStatus::Streaming,
            cycles: 2,
        };
        assert_eq!(HostReport::from_view(&view), HostReport::default());
    }

    #[test]
    fn test_zero_elapsed_is_unknown() {
        let (mut cur, prev) = pair();
        cur.timestamp = prev.timestamp;
        assert_eq!(elapsed_ms(&cur, &prev), None);
        assert_eq!(read_await(&cur, &prev), None);
        assert_eq!(device_rate_per_sec(&cur, &prev, DeviceField::ReadCompleted), None);
    }

    #[test]
    fn test_counter_regression_is_clamped() {
        let (mut cur, prev) = pair();
        cur.devices = vec![disk(1, 1, 1, 1, 1)];
        cur.interfaces = vec![iface(0, 0, 0)];
        cur.connection_active = Some(0);
        assert_eq!(device_delta(&cur, &prev, DeviceField::ReadCompleted), Some(0));
        assert_eq!(interface_delta(&cur, &prev, InterfaceField::RxOk), Some(0));
        assert_eq!(counter_delta(&cur, &prev, |s| s.connection_active), Some(0));
    }

    #[test]
    fn test_empty_device_list_is_unknown() {
        let (mut cur, prev) = pair();
        cur.devices.clear();
        assert_eq!(device_delta(&cur, &prev, DeviceField::ReadCompleted), None);
        assert_eq!(read_await(&cur, &prev), None);
    }

    #[test]
    fn test_report_from_view() {
        let (cur, prev) = pair();
        let view = HostView {
            name: "db1".into(),
            current: cur,
            previous: prev,
            errors: LogCounter {
                current: Some(5),
                previous: Some(2),
            },
            warnings: LogCounter {
                current: Some(1),
                previous: None,
            },
            status: SessionStatus::Streaming,
            cycles: 2,
        };
        let report = HostReport::from_view(&view);
        assert_close(report.reads_per_sec, 100.0);
        assert_close(report.tx_ok_per_sec, 200.0);
        assert_eq!(report.connections_opened, Some(15));
        assert_eq!(report.gc_stop_ms, Some(12.5));
        assert_eq!(report.new_errors, Some(3));
        assert_eq!(report.new_warnings, None);
    }

    #[test]
    fn test_garbled_huge_counters_are_unknown() {
        let options = DecodeOptions::default();
        let cycle = |ts: i64, cpu: &str, sda_reads: u64| {
            let lines = vec![
                cpu.to_string(),
                format!("   8       0 sda {sda_reads} 0 8 5 1 0 8 1 0 10 20"),
                format!("   8      16 sdb {sda_reads} 0 8 5 1 0 8 1 0 10 20"),
                format!("__DATE__{ts}"),
            ];
            decode_cycle(&lines, &options)
        };
        let previous = cycle(1_000, "cpu  1 1 1 1 1 1 1 1", 1);
        let current = cycle(2_000, "cpu  18446744073709551615 1 1 1 1 1 1 1", u64::MAX);
        assert_eq!(current.cpu.map(|c| c.user), Some(u64::MAX));
        assert_eq!(current.devices.len(), 2);

        let view = HostView {
            name: "db1".into(),
            current,
            previous,
            errors: LogCounter::default(),
            warnings: LogCounter::default(),
            status: SessionStatus::Streaming,
            cycles: 2,
        };
        let report = HostReport::from_view(&view);
        assert_eq!(report.cpu_busy, None);
        assert_eq!(report.cpu_user, None);
        assert_eq!(report.reads_per_sec, None);
        assert_eq!(report.read_await, None);
        // Counters that did not overflow are still reported.
        assert_close(report.writes_per_sec, 0.0);
    }

    #[test]
    fn test_interface_rate_sum_overflow_is_unknown() {
        let (mut cur, prev) = pair();
        cur.interfaces[0].rx_error = u64::MAX;
        cur.interfaces[0].rx_dropped = u64::MAX;
        assert_eq!(interface_rate_per_sec(&cur, &prev, &RX_FAILURES), None);
        assert!(interface_rate_per_sec(&cur, &prev, &[InterfaceField::RxOk]).is_some());
    }
}
