//! CSV dump of every computed row.

use std::fs::{File, OpenOptions};
use std::path::Path;

use serde::Serialize;

use crate::aggregator::HostReport;
use crate::error::DumpError;

/// One dumped line: the host and its computed values.
///
/// Floats are written with three decimals, unknown values as empty cells.
#[derive(Debug, Serialize, PartialEq)]
pub struct DumpRow {
    pub host: String,
    #[serde(rename = "cpu-avg")]
    pub cpu_avg: Option<String>,
    #[serde(rename = "cpu-user")]
    pub cpu_user: Option<String>,
    #[serde(rename = "cpu-nice")]
    pub cpu_nice: Option<String>,
    #[serde(rename = "avgqu-sz")]
    pub avg_queue_size: Option<String>,
    #[serde(rename = "r/s")]
    pub reads_per_sec: Option<String>,
    #[serde(rename = "sector_r")]
    pub sectors_read: Option<String>,
    #[serde(rename = "r_await")]
    pub read_await: Option<String>,
    #[serde(rename = "w/s")]
    pub writes_per_sec: Option<String>,
    #[serde(rename = "sector_w")]
    pub sectors_written: Option<String>,
    #[serde(rename = "w_await")]
    pub write_await: Option<String>,
    pub rx_ok: Option<String>,
    pub rx_ko: Option<String>,
    pub tx_ok: Option<String>,
    pub tx_ko: Option<String>,
    pub connection_active: Option<u64>,
    #[serde(rename = "connection_fail")]
    pub connection_failed: Option<u64>,
    #[serde(rename = "last_gc_duration_ms")]
    pub gc_stop_ms: Option<String>,
    #[serde(rename = "warning")]
    pub warnings: Option<u64>,
    #[serde(rename = "error")]
    pub errors: Option<u64>,
}

fn decimal(value: Option<f64>) -> Option<String> {
    value.map(|v| format!("{v:.3}"))
}

impl DumpRow {
    pub fn new(host: &str, report: &HostReport) -> Self {
        Self {
            host: host.to_owned(),
            cpu_avg: decimal(report.cpu_busy),
            cpu_user: decimal(report.cpu_user),
            cpu_nice: decimal(report.cpu_nice),
            avg_queue_size: decimal(report.avg_queue_size),
            reads_per_sec: decimal(report.reads_per_sec),
            sectors_read: decimal(report.sectors_read_per_sec),
            read_await: decimal(report.read_await),
            writes_per_sec: decimal(report.writes_per_sec),
            sectors_written: decimal(report.sectors_written_per_sec),
            write_await: decimal(report.write_await),
            rx_ok: decimal(report.rx_ok_per_sec),
            rx_ko: decimal(report.rx_failed_per_sec),
            tx_ok: decimal(report.tx_ok_per_sec),
            tx_ko: decimal(report.tx_failed_per_sec),
            connection_active: report.connections_opened,
            connection_failed: report.connections_failed,
            gc_stop_ms: decimal(report.gc_stop_ms),
            warnings: report.new_warnings,
            errors: report.new_errors,
        }
    }
}

/// Append-only CSV dump file.
pub struct CsvDump {
    writer: csv::Writer<File>,
}

impl CsvDump {
    /// Open `path` for appending. The header row is written only if the
    /// file did not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DumpError> {
        let path = path.as_ref();
        let exists = path.exists();
        let file = OpenOptions::new().append(true).create(true).open(path)?;
        let writer = csv::WriterBuilder::new()
            .has_headers(!exists)
            .from_writer(file);
        Ok(Self { writer })
    }

    /// Write the rows of one refresh and flush them.
    pub fn write_rows(&mut self, rows: &[DumpRow]) -> Result<(), DumpError> {
        for row in rows {
            self.writer.serialize(row)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
