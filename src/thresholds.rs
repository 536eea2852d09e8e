//! Threshold definitions for fleetmon.
//!
//! This module defines severity levels and the warn/error limits used to
//! highlight each column of the dashboard.

/// Severity level for a metric.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Severity {
    /// Normal operating range
    #[default]
    Normal,
    /// Above the warn limit
    Warning,
    /// Above the error limit
    Critical,
}

/// A pair of independent limits. A value strictly above `error` is
/// critical, strictly above `warn` is a warning.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Threshold {
    pub warn: f64,
    pub error: f64,
}

impl Threshold {
    pub const fn new(warn: f64, error: f64) -> Self {
        Self { warn, error }
    }

    /// Evaluate the severity of a value.
    pub fn severity(&self, value: f64) -> Severity {
        if value > self.error {
            Severity::Critical
        } else if value > self.warn {
            Severity::Warning
        } else {
            Severity::Normal
        }
    }
}

/// Threshold configuration for every dashboard column.
#[derive(Clone, Debug)]
pub struct Thresholds {
    /// CPU busy/user/nice fraction (0 -> 1)
    pub cpu: Threshold,
    /// Average request queue size
    pub avg_queue_size: Threshold,
    /// Reads or writes completed per second
    pub iops: Threshold,
    /// Sectors read or written per second
    pub sectors: Threshold,
    /// r_await / w_await
    pub await_ms: Threshold,
    /// Packets received or transmitted per second
    pub packets: Threshold,
    /// Failed (error + dropped + overrun) packets per second
    pub packet_failures: Threshold,
    /// Connections opened since the previous cycle
    pub connections_opened: Threshold,
    /// Failed connection attempts since the previous cycle
    pub connections_failed: Threshold,
    /// Last stop-the-world pause in milliseconds
    pub gc_stop_ms: Threshold,
    /// New WARN lines in the application log
    pub log_warnings: Threshold,
    /// New ERROR lines in the application log
    pub log_errors: Threshold,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu: Threshold::new(0.7, 0.9),
            avg_queue_size: Threshold::new(10.0, 100.0),
            iops: Threshold::new(500.0, 5000.0),
            sectors: Threshold::new(1000.0, 10000.0),
            await_ms: Threshold::new(30.0, 100.0),
            packets: Threshold::new(10000.0, 100000.0),
            packet_failures: Threshold::new(0.0, 10.0),
            connections_opened: Threshold::new(50.0, 100.0),
            connections_failed: Threshold::new(0.0, 10.0),
            gc_stop_ms: Threshold::new(100.0, 500.0),
            log_warnings: Threshold::new(0.0, 1.0),
            log_errors: Threshold::new(0.0, 0.0),
        }
    }
}
