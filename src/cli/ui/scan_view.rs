use std::fmt::{self, Display, Formatter};

use crate::cli::scan::{ScanRecord, ScanSummary};

use super::painter::Painter;
use super::table::Table;

/// Renders one scan sighting or error.
pub(crate) struct ScanEventView<'a> {
    index: usize,
    record: &'a ScanRecord,
    painter: &'a Painter,
}

impl<'a> ScanEventView<'a> {
    pub(crate) fn new(index: usize, record: &'a ScanRecord, painter: &'a Painter) -> Self {
        Self {
            index,
            record,
            painter,
        }
    }
}

impl Display for ScanEventView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let index_label = self.painter.muted(format!("[{:04}]", self.index));
        match self.record {
            ScanRecord::Discovered { device } => write!(
                f,
                "{index_label} {} {} {}",
                self.painter.value(device.name().unwrap_or("<unnamed>")),
                device.id(),
                self.painter.rssi(device.rssi())
            ),
            ScanRecord::Error { message } => {
                write!(f, "{index_label} {}", self.painter.fault(message))
            }
        }
    }
}

/// Renders the totals of a scan window.
pub(crate) struct ScanSummaryView<'a> {
    summary: &'a ScanSummary,
    painter: &'a Painter,
}

impl<'a> ScanSummaryView<'a> {
    pub(crate) fn new(summary: &'a ScanSummary, painter: &'a Painter) -> Self {
        Self { summary, painter }
    }
}

impl Display for ScanSummaryView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let table = Table::key_value(
            self.painter,
            vec![
                ("registered", self.summary.registered.to_string()),
                (
                    "discoveries",
                    self.painter.value(self.summary.discoveries.to_string()),
                ),
                ("errors", self.painter.fault_count(self.summary.errors)),
            ],
        );

        write!(f, "{}", self.painter.heading("Scan summary:"))?;
        write!(f, "\n{table}")
    }
}
