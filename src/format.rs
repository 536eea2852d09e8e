//! Magnitude-aware number compaction for table cells.

/// Text shown for a value that is unknown.
pub const UNKNOWN: &str = "-";

/// Compact a count: `123`, `4.57k`, `235k`.
pub fn compact_int(value: f64) -> String {
    if value > 100_000.0 {
        format!("{:.0}k", value / 1000.0)
    } else if value > 1000.0 {
        format!("{:.2}k", value / 1000.0)
    } else {
        format!("{}", value.trunc() as i64)
    }
}

/// Compact a measurement: `0.42`, `512`, `4.57k`, `235k`.
///
/// Tiny negative values from float noise print as `0.00`.
pub fn compact_float(value: f64) -> String {
    let value = if value > -0.01 && value < 0.0 { 0.0 } else { value };
    if value > 100_000.0 {
        format!("{:.0}k", value / 1000.0)
    } else if value > 1000.0 {
        format!("{:.2}k", value / 1000.0)
    } else if value > 100.0 {
        format!("{:.0}", value)
    } else {
        format!("{:.2}", value)
    }
}
