//! Dashboard table model.
//!
//! [`Table::build`] turns the copied host views into a backend-neutral list
//! of styled text lines. The TUI and the plain printer in [`crate::ui`] only
//! translate [`Segment`]s into their own styling.
//!
//! In narrow mode the same logical row is split in two halves printed one
//! below the other: system columns (CPU, I/O, disks) first, then network,
//! GC and logs. Each half repeats the host column.

use crate::aggregator::HostReport;
use crate::format::{compact_float, compact_int, UNKNOWN};
use crate::metrics::TIMESTAMP_MISSING;
use crate::store::{HostView, SessionStatus};
use crate::thresholds::{Severity, Threshold, Thresholds};

const HOST_WIDTH: usize = 20;
const SECTION_SEPARATOR: &str = "| ";

/// Number of sections in the first half of a narrow layout.
const NARROW_SPLIT: usize = 4;

/// A run of text with one severity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    pub severity: Severity,
}

impl Segment {
    fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            severity: Severity::Normal,
        }
    }
}

/// One printed line.
pub type Line = Vec<Segment>;

/// How to lay out the table.
#[derive(Clone, Debug)]
pub struct TableOptions {
    pub narrow: bool,
    pub exclude_loopback: bool,
    pub log_grep_freq: u32,
}

struct Column {
    title: &'static str,
    width: usize,
}

struct Section {
    title: String,
    columns: Vec<Column>,
}

impl Section {
    fn inner_width(&self) -> usize {
        self.columns.iter().map(|c| c.width).sum()
    }
}

fn col(title: &'static str, width: usize) -> Column {
    Column { title, width }
}

fn sections(options: &TableOptions) -> Vec<Section> {
    let lo = if options.exclude_loopback { "WITHOUT" } else { "WITH" };
    vec![
        Section {
            title: "CPU (0 -> 1)".into(),
            columns: vec![col("avg", 7), col("user", 7), col("nice", 7)],
        },
        Section {
            title: "I/O (ALL)".into(),
            columns: vec![col("avgqu-sz", 10)],
        },
        Section {
            title: "ALL DISKS READ".into(),
            columns: vec![col("r/s", 10), col("sector_r", 10), col("r_await", 10)],
        },
        Section {
            title: "ALL DISKS WRITE".into(),
            columns: vec![col("w/s", 10), col("sector_w", 10), col("w_await", 10)],
        },
        Section {
            title: format!("NETWORK /s (ALL INTERFACES, {lo} LO)"),
            columns: vec![
                col("rx_ok", 7),
                col("rx_ko", 7),
                col("tx_ok", 7),
                col("tx_ko", 7),
                col("conn_act", 10),
                col("conn_fail", 10),
            ],
        },
        Section {
            title: "JVM".into(),
            columns: vec![col("last_gc_ms", 11)],
        },
        Section {
            title: format!("LOGS (every {} cycles)", options.log_grep_freq),
            columns: vec![col("warn", 10), col("error", 10)],
        },
    ]
}

/// Content of one host row.
#[derive(Clone, Debug, PartialEq)]
pub enum RowBody {
    /// One segment per column, in section order
    Metrics(Vec<Segment>),
    /// The host has nothing to show yet or lost its data
    Message(Segment),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Row {
    pub host: String,
    pub body: RowBody,
    /// Connection problem shown after stale metric values
    pub status: Option<Segment>,
}

fn float_cell(value: Option<f64>, threshold: Threshold) -> Segment {
    match value {
        Some(v) => Segment {
            text: compact_float(v),
            severity: threshold.severity(v),
        },
        None => Segment::plain(UNKNOWN),
    }
}

fn int_cell(value: Option<f64>, threshold: Threshold) -> Segment {
    match value {
        Some(v) => Segment {
            text: compact_int(v),
            severity: threshold.severity(v),
        },
        None => Segment::plain(UNKNOWN),
    }
}

fn count_cell(value: Option<u64>, threshold: Threshold) -> Segment {
    int_cell(value.map(|v| v as f64), threshold)
}

fn status_suffix(status: &SessionStatus) -> String {
    match status {
        SessionStatus::Retrying {
            attempts,
            last_error,
        } => format!(" [retry #{attempts}: {last_error}]"),
        SessionStatus::Connecting => " [connecting]".into(),
        SessionStatus::Streaming => String::new(),
    }
}

impl Row {
    /// Build the row of one host.
    pub fn build(view: &HostView, report: &HostReport, thresholds: &Thresholds) -> Self {
        let host = format!("{}:", view.name);
        let suffix = status_suffix(&view.status);

        if view.current.timestamp == TIMESTAMP_MISSING {
            return Self {
                host,
                body: RowBody::Message(Segment {
                    text: format!(
                        "ERROR reading timestamp. Check connection/errors. Make sure log paths are correct.{suffix}"
                    ),
                    severity: Severity::Critical,
                }),
                status: None,
            };
        }
        if view.current.cpu.is_none() {
            let (text, severity) = if view.cycles == 0 {
                (format!("waiting for first cycle...{suffix}"), Severity::Normal)
            } else {
                (
                    format!("CPU reading error / check connection (will try to reconnect every sec){suffix}"),
                    Severity::Critical,
                )
            };
            return Self {
                host,
                body: RowBody::Message(Segment { text, severity }),
                status: None,
            };
        }

        let t = thresholds;
        let r = report;
        let cells = vec![
            float_cell(r.cpu_busy, t.cpu),
            float_cell(r.cpu_user, t.cpu),
            float_cell(r.cpu_nice, t.cpu),
            float_cell(r.avg_queue_size, t.avg_queue_size),
            float_cell(r.reads_per_sec, t.iops),
            int_cell(r.sectors_read_per_sec, t.sectors),
            float_cell(r.read_await, t.await_ms),
            float_cell(r.writes_per_sec, t.iops),
            int_cell(r.sectors_written_per_sec, t.sectors),
            float_cell(r.write_await, t.await_ms),
            int_cell(r.rx_ok_per_sec, t.packets),
            int_cell(r.rx_failed_per_sec, t.packet_failures),
            int_cell(r.tx_ok_per_sec, t.packets),
            int_cell(r.tx_failed_per_sec, t.packet_failures),
            count_cell(r.connections_opened, t.connections_opened),
            count_cell(r.connections_failed, t.connections_failed),
            float_cell(r.gc_stop_ms, t.gc_stop_ms),
            count_cell(r.new_warnings, t.log_warnings),
            count_cell(r.new_errors, t.log_errors),
        ];

        // The values are stale while the session reconnects.
        let status = match view.status {
            SessionStatus::Streaming => None,
            SessionStatus::Connecting => Some(Segment {
                text: format!("{SECTION_SEPARATOR}reading error{suffix}"),
                severity: Severity::Warning,
            }),
            SessionStatus::Retrying { .. } => Some(Segment {
                text: format!("{SECTION_SEPARATOR}reading error{suffix}"),
                severity: Severity::Critical,
            }),
        };
        Self {
            host,
            body: RowBody::Metrics(cells),
            status,
        }
    }
}

/// A complete refresh, ready to print.
#[derive(Clone, Debug)]
pub struct Table {
    pub rows: Vec<Row>,
    options: TableOptions,
}

fn pad(text: &str, width: usize) -> String {
    format!("{text:<width$}")
}

fn truncate(text: &str, width: usize) -> String {
    text.chars().take(width).collect()
}

impl Table {
    /// Compute every host row of one refresh.
    pub fn build(
        views: &[HostView],
        reports: &[HostReport],
        thresholds: &Thresholds,
        options: TableOptions,
    ) -> Self {
        let rows = views
            .iter()
            .zip(reports)
            .map(|(view, report)| Row::build(view, report, thresholds))
            .collect();
        Self { rows, options }
    }

    /// Render to lines according to the narrow/wide option.
    pub fn lines(&self) -> Vec<Line> {
        let sections = sections(&self.options);
        if !self.options.narrow {
            return self.render(&sections, 0..sections.len());
        }
        let mut lines = self.render(&sections, 0..NARROW_SPLIT);
        lines.push(Vec::new());
        lines.extend(self.render(&sections, NARROW_SPLIT..sections.len()));
        lines
    }

    fn render(&self, sections: &[Section], range: std::ops::Range<usize>) -> Vec<Line> {
        let first = range.start;
        let last = range.end == sections.len();
        let shown = &sections[range];
        let separator = |index: usize| if index > first { SECTION_SEPARATOR } else { "" };

        let mut meta = pad("", HOST_WIDTH);
        let mut header = pad("host", HOST_WIDTH);
        for (offset, section) in shown.iter().enumerate() {
            let sep = separator(first + offset);
            meta.push_str(sep);
            meta.push_str(&pad(&truncate(&section.title, section.inner_width()), section.inner_width()));
            header.push_str(sep);
            for column in &section.columns {
                header.push_str(&pad(column.title, column.width));
            }
        }
        let rule = "-".repeat(header.chars().count());

        let mut lines = vec![
            vec![Segment::plain(meta)],
            vec![Segment::plain(header)],
            vec![Segment::plain(rule)],
        ];

        // Cell offset of the first shown column.
        let skip: usize = sections[..first].iter().map(|s| s.columns.len()).sum();

        for row in &self.rows {
            let mut line = vec![Segment::plain(pad(&row.host, HOST_WIDTH))];
            match &row.body {
                RowBody::Message(message) => {
                    if first == 0 {
                        line.push(message.clone());
                    }
                }
                RowBody::Metrics(cells) => {
                    let mut cells = cells.iter().skip(skip);
                    for (offset, section) in shown.iter().enumerate() {
                        let sep = separator(first + offset);
                        if !sep.is_empty() {
                            line.push(Segment::plain(sep));
                        }
                        for column in &section.columns {
                            if let Some(cell) = cells.next() {
                                line.push(Segment {
                                    text: pad(&cell.text, column.width),
                                    severity: cell.severity,
                                });
                            }
                        }
                    }
                    if let Some(status) = row.status.as_ref().filter(|_| last) {
                        line.push(status.clone());
                    }
                }
            }
            lines.push(line);
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{Cpu, Snapshot};
    use crate::store::LogCounter;

    fn options(narrow: bool) -> TableOptions {
        TableOptions {
            narrow,
            exclude_loopback: false,
            log_grep_freq: 10,
        }
    }

    fn view(name: &str, current: Snapshot, cycles: u64, status: SessionStatus) -> HostView {
        HostView {
            name: name.into(),
            current,
            previous: Snapshot::default(),
            errors: LogCounter::default(),
            warnings: LogCounter::default(),
            status,
            cycles,
        }
    }

    fn text(line: &Line) -> String {
        line.iter().map(|s| s.text.as_str()).collect()
    }

    fn healthy() -> HostView {
        view(
            "db1",
            Snapshot {
                timestamp: 10,
                cpu: Some(Cpu::default()),
                ..Snapshot::default()
            },
            3,
            SessionStatus::Streaming,
        )
    }

    #[test]
    fn test_row_has_one_cell_per_column() {
        let report = HostReport {
            cpu_busy: Some(0.95),
            new_errors: Some(2),
            ..HostReport::default()
        };
        let row = Row::build(&healthy(), &report, &Thresholds::default());
        let RowBody::Metrics(cells) = row.body else {
            panic!("expected metrics row");
        };
        let columns: usize = sections(&options(false)).iter().map(|s| s.columns.len()).sum();
        assert_eq!(cells.len(), columns);
        assert_eq!(cells[0].text, "0.95");
        assert_eq!(cells[0].severity, Severity::Critical);
        assert_eq!(cells[1].text, UNKNOWN);
        assert_eq!(cells[18].severity, Severity::Critical);
    }

    #[test]
    fn test_missing_timestamp_row() {
        let v = view("db2", Snapshot::missing_timestamp(), 4, SessionStatus::Streaming);
        let row = Row::build(&v, &HostReport::default(), &Thresholds::default());
        match row.body {
            RowBody::Message(m) => {
                assert!(m.text.starts_with("ERROR reading timestamp"));
                assert_eq!(m.severity, Severity::Critical);
            }
            RowBody::Metrics(_) => panic!("expected message row"),
        }
    }

    #[test]
    fn test_retrying_host_shows_reading_error() {
        let v = view(
            "db3",
            Snapshot::default(),
            1,
            SessionStatus::Retrying {
                attempts: 4,
                last_error: "remote stream closed".into(),
            },
        );
        let row = Row::build(&v, &HostReport::default(), &Thresholds::default());
        match row.body {
            RowBody::Message(m) => {
                assert!(m.text.contains("CPU reading error"));
                assert!(m.text.contains("retry #4: remote stream closed"));
            }
            RowBody::Metrics(_) => panic!("expected message row"),
        }
    }

    #[test]
    fn test_wide_layout_is_aligned() {
        let reports = vec![HostReport::default()];
        let table = Table::build(&[healthy()], &reports, &Thresholds::default(), options(false));
        let lines = table.lines();
        assert_eq!(lines.len(), 4);
        let header = text(&lines[1]);
        let row = text(&lines[3]);
        assert!(header.starts_with("host"));
        assert!(row.starts_with("db1:"));
        assert_eq!(header.chars().count(), row.chars().count());
        assert_eq!(text(&lines[2]).chars().count(), header.chars().count());
    }

    #[test]
    fn test_narrow_layout_splits_into_two_halves() {
        let reports = vec![HostReport::default()];
        let table = Table::build(&[healthy()], &reports, &Thresholds::default(), options(true));
        let lines = table.lines();
        // two halves of (meta, header, rule, row) and a blank line
        assert_eq!(lines.len(), 9);
        assert!(text(&lines[1]).contains("avgqu-sz"));
        assert!(!text(&lines[1]).contains("rx_ok"));
        assert!(lines[4].is_empty());
        assert!(text(&lines[6]).contains("rx_ok"));
        assert!(text(&lines[8]).starts_with("db1:"));
        assert_eq!(text(&lines[6]).chars().count(), text(&lines[8]).chars().count());
    }

    #[test]
    fn test_retrying_host_with_stale_values_is_flagged() {
        let mut stale = healthy();
        stale.status = SessionStatus::Retrying {
            attempts: 2,
            last_error: "remote stream closed".into(),
        };
        let reports = vec![HostReport::default()];
        let row = Row::build(&stale, &reports[0], &Thresholds::default());
        let status = row.status.clone().expect("status segment");
        assert_eq!(status.severity, Severity::Critical);
        assert!(status.text.contains("reading error [retry #2: remote stream closed]"));

        for narrow in [false, true] {
            let table = Table::build(&[stale.clone()], &reports, &Thresholds::default(), options(narrow));
            let lines = table.lines();
            let last_row = lines.last().expect("row line");
            assert_eq!(last_row.last(), Some(&status));
            let flagged = lines.iter().filter(|l| l.contains(&status)).count();
            assert_eq!(flagged, 1);
        }
    }

    #[test]
    fn test_streaming_host_has_no_status() {
        let row = Row::build(&healthy(), &HostReport::default(), &Thresholds::default());
        assert_eq!(row.status, None);
    }
}
