//! Counter data structures for fleetmon.
//!
//! This module defines the [`Snapshot`] struct which holds everything parsed
//! from one cycle of a host's remote output, together with the raw kernel
//! counters it is made of.
//!
//! All counters are cumulative totals as reported by the kernel. Rates are
//! only ever derived from the difference between two snapshots, see
//! [`crate::aggregator`].

/// Timestamp of a snapshot that has never been filled by a cycle.
pub const TIMESTAMP_UNSET: i64 = -1;

/// Timestamp of a cycle whose `__DATE__` sentinel was not found.
pub const TIMESTAMP_MISSING: i64 = -2;

/// CPU time breakdown from the aggregate `cpu` line of `/proc/stat`.
///
/// Only raw jiffies are stored. Totals are recomputed on every call so that
/// a consumer never holds a derived value across refresh cycles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cpu {
    /// Time spent in user mode (jiffies)
    pub user: u64,
    /// Time spent in user mode with low priority (jiffies)
    pub nice: u64,
    /// Time spent in system mode (jiffies)
    pub system: u64,
    /// Time spent idle (jiffies)
    pub idle: u64,
    /// Time spent waiting for I/O (jiffies)
    pub iowait: u64,
    /// Time spent servicing hardware interrupts (jiffies)
    pub irq: u64,
    /// Time spent servicing software interrupts (jiffies)
    pub softirq: u64,
    /// Time stolen by the hypervisor (jiffies, 0 on kernels that omit it)
    pub steal: u64,
}

/// One of the jiffie categories of [`Cpu`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CpuField {
    User,
    Nice,
}

impl Cpu {
    /// Sum of every category. `None` if a garbled counter overflows.
    pub fn total(&self) -> Option<u64> {
        self.total_idle()?.checked_add(self.total_non_idle()?)
    }

    /// Idle plus iowait.
    pub fn total_idle(&self) -> Option<u64> {
        self.idle.checked_add(self.iowait)
    }

    /// Every category that is not idle or iowait.
    pub fn total_non_idle(&self) -> Option<u64> {
        [self.nice, self.system, self.irq, self.softirq, self.steal]
            .into_iter()
            .try_fold(self.user, u64::checked_add)
    }

    /// Read one category by name.
    pub fn get(&self, field: CpuField) -> u64 {
        match field {
            CpuField::User => self.user,
            CpuField::Nice => self.nice,
        }
    }
}

/// Block device counters from one `/proc/diskstats` line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Device {
    /// Kernel device name (e.g. `sda`, `nvme0n1`)
    pub name: String,
    /// Reads completed successfully
    pub read_completed: u64,
    /// Adjacent reads merged
    pub read_merged: u64,
    /// Sectors read (512 bytes each)
    pub sectors_read: u64,
    /// Milliseconds spent by all reads
    pub time_spent_reading: u64,
    /// Writes completed successfully
    pub write_completed: u64,
    /// Adjacent writes merged
    pub write_merged: u64,
    /// Sectors written
    pub sectors_written: u64,
    /// Milliseconds spent by all writes
    pub time_spent_writing: u64,
    /// I/Os currently in flight (the only field that goes back to zero)
    pub io_in_progress: u64,
    /// Milliseconds spent doing I/Os
    pub io_time: u64,
    /// Weighted milliseconds spent doing I/Os (queue depth x time)
    pub weighted_io_time: u64,
}

/// Numeric counters of [`Device`] that can be aggregated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceField {
    ReadCompleted,
    SectorsRead,
    TimeSpentReading,
    WriteCompleted,
    SectorsWritten,
    TimeSpentWriting,
    WeightedIoTime,
}

impl Device {
    pub fn get(&self, field: DeviceField) -> u64 {
        match field {
            DeviceField::ReadCompleted => self.read_completed,
            DeviceField::SectorsRead => self.sectors_read,
            DeviceField::TimeSpentReading => self.time_spent_reading,
            DeviceField::WriteCompleted => self.write_completed,
            DeviceField::SectorsWritten => self.sectors_written,
            DeviceField::TimeSpentWriting => self.time_spent_writing,
            DeviceField::WeightedIoTime => self.weighted_io_time,
        }
    }
}

/// Network interface counters from one `netstat -i` line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Interface {
    /// Interface name (e.g. `eth0`, `lo`)
    pub name: String,
    pub mtu: u64,
    /// Packets received
    pub rx_ok: u64,
    pub rx_error: u64,
    pub rx_dropped: u64,
    pub rx_overrun: u64,
    /// Packets transmitted
    pub tx_ok: u64,
    pub tx_error: u64,
    pub tx_dropped: u64,
    pub tx_overrun: u64,
    /// Interface flags column (e.g. `BMRU`)
    pub flags: String,
}

/// Numeric counters of [`Interface`] that can be aggregated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterfaceField {
    RxOk,
    RxError,
    RxDropped,
    RxOverrun,
    TxOk,
    TxError,
    TxDropped,
    TxOverrun,
}

impl Interface {
    pub fn get(&self, field: InterfaceField) -> u64 {
        match field {
            InterfaceField::RxOk => self.rx_ok,
            InterfaceField::RxError => self.rx_error,
            InterfaceField::RxDropped => self.rx_dropped,
            InterfaceField::RxOverrun => self.rx_overrun,
            InterfaceField::TxOk => self.tx_ok,
            InterfaceField::TxError => self.tx_error,
            InterfaceField::TxDropped => self.tx_dropped,
            InterfaceField::TxOverrun => self.tx_overrun,
        }
    }
}

/// Everything parsed from one cycle of one host.
///
/// A snapshot whose `timestamp` is [`TIMESTAMP_MISSING`] is not
/// authoritative: none of its other fields may be used to compute a rate.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    /// Remote clock in epoch milliseconds, or one of the sentinels
    pub timestamp: i64,
    /// Aggregate CPU line, absent when not seen this cycle
    pub cpu: Option<Cpu>,
    /// Block devices in the order they were reported
    pub devices: Vec<Device>,
    /// Network interfaces in the order they were reported
    pub interfaces: Vec<Interface>,
    /// Cumulative "active connections openings" counter
    pub connection_active: Option<u64>,
    /// Cumulative "failed connection attempts" counter
    pub connection_failed: Option<u64>,
    /// Latest stop-the-world pause length in milliseconds seen this cycle
    pub gc_stop_ms: Option<f64>,
    /// `ERROR` line count of the application log, only on sampled cycles
    pub error_count: Option<u64>,
    /// `WARN` line count of the application log, only on sampled cycles
    pub warn_count: Option<u64>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            timestamp: TIMESTAMP_UNSET,
            cpu: None,
            devices: Vec::new(),
            interfaces: Vec::new(),
            connection_active: None,
            connection_failed: None,
            gc_stop_ms: None,
            error_count: None,
            warn_count: None,
        }
    }
}

impl Snapshot {
    /// An empty snapshot for a cycle without `__DATE__`.
    pub fn missing_timestamp() -> Self {
        Self {
            timestamp: TIMESTAMP_MISSING,
            ..Self::default()
        }
    }

    /// Whether the remote clock was observed for this cycle.
    pub fn is_authoritative(&self) -> bool {
        self.timestamp >= 0
    }
}
