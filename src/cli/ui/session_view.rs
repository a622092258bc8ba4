use std::fmt::{self, Display, Formatter};

use crate::cli::session::SessionReport;
use crate::relay::RelayMessage;

use super::painter::Painter;
use super::table::Table;

/// Renders the outcome of a scripted spa session.
pub(crate) struct SessionReportView<'a> {
    report: &'a SessionReport,
    painter: &'a Painter,
}

impl<'a> SessionReportView<'a> {
    pub(crate) fn new(report: &'a SessionReport, painter: &'a Painter) -> Self {
        Self { report, painter }
    }
}

impl Display for SessionReportView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let report = self.report;
        let painter = self.painter;
        let temperature = match report.temperature.as_deref() {
            Some(temperature) => painter.value(temperature),
            None => painter.muted("<not written>"),
        };
        let session_table = Table::key_value(
            painter,
            vec![
                ("device", painter.value(report.device.id())),
                (
                    "name",
                    report.device.name().unwrap_or("<unnamed>").to_string(),
                ),
                ("mtu", report.mtu.to_string()),
                ("characteristics", report.characteristics.to_string()),
                ("frames_written", report.frames_written.to_string()),
                ("mode", painter.mode(report.mode)),
                ("temperature", temperature),
                ("mode_notifications", report.mode_notifications.join(" → ")),
            ],
        );

        write!(f, "{}", painter.heading("Session:"))?;
        write!(f, "\n{session_table}")?;
        if report.relay_events.is_empty() {
            return Ok(());
        }
        writeln!(f)?;
        write!(f, "\n{}", painter.heading("Relay events:"))?;
        for (index, message) in report.relay_events.iter().enumerate() {
            write!(f, "\n{}", RelayEventLine::new(index + 1, message, painter))?;
        }
        Ok(())
    }
}

struct RelayEventLine<'a> {
    index: usize,
    message: &'a RelayMessage,
    painter: &'a Painter,
}

impl<'a> RelayEventLine<'a> {
    fn new(index: usize, message: &'a RelayMessage, painter: &'a Painter) -> Self {
        Self {
            index,
            message,
            painter,
        }
    }
}

impl Display for RelayEventLine<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let characteristic = self
            .message
            .characteristic()
            .map_or_else(|| "-".to_string(), |characteristic| characteristic.to_string());
        write!(
            f,
            "{} {} {}={}",
            self.painter.muted(format!("[{:04}]", self.index)),
            self.message.event(),
            characteristic,
            self.painter.value(self.message.value().unwrap_or_default())
        )
    }
}
