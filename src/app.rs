//! Application state for fleetmon.
//!
//! [`App`] is owned by the renderer. Each refresh copies every host slot out
//! of the shared store, computes the reports and the table, and appends the
//! rows to the dump file when one is configured.

use std::sync::Arc;

use tracing::{info, warn};

use crate::aggregator::HostReport;
use crate::config::Config;
use crate::error::DumpError;
use crate::export::{CsvDump, DumpRow};
use crate::report::{Table, TableOptions};
use crate::store::HostStore;
use crate::thresholds::Thresholds;

pub struct App {
    /// Application configuration from CLI
    pub config: Config,

    /// Shared with the session threads
    pub store: Arc<HostStore>,

    pub thresholds: Thresholds,

    /// CSV dump, if enabled
    dump: Option<CsvDump>,
}

impl App {
    /// Create the application.
    ///
    /// # Errors
    ///
    /// Returns an error if the dump file cannot be opened.
    pub fn new(config: Config, store: Arc<HostStore>) -> Result<Self, DumpError> {
        let dump = if config.dump {
            info!(path = %config.dump_to, "dumping rows");
            Some(CsvDump::open(&config.dump_to)?)
        } else {
            None
        };
        Ok(Self {
            config,
            store,
            thresholds: Thresholds::default(),
            dump,
        })
    }

    pub fn table_options(&self) -> TableOptions {
        TableOptions {
            narrow: !self.config.big_screen,
            exclude_loopback: self.config.exclude_lo,
            log_grep_freq: self.config.log_grep_freq,
        }
    }

    /// Compute one refresh.
    ///
    /// A failing dump is logged and does not interrupt the display.
    pub fn refresh(&mut self) -> Table {
        let views = self.store.read_all();
        let reports: Vec<HostReport> = views.iter().map(HostReport::from_view).collect();

        if let Some(dump) = self.dump.as_mut() {
            let rows: Vec<DumpRow> = views
                .iter()
                .zip(&reports)
                .map(|(view, report)| DumpRow::new(&view.name, report))
                .collect();
            if let Err(err) = dump.write_rows(&rows) {
                warn!(error = %err, "failed to write dump rows");
            }
        }

        Table::build(&views, &reports, &self.thresholds, self.table_options())
    }
}
