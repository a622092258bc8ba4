use std::io;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout_at};
use tracing::{instrument, trace};

use crate::cli::command::parse_duration;
use crate::cli::{OutputFormat, write_json_line};
use crate::error::CliConfigError;
use crate::sim::{BleManager, DiscoverableDevice, ScanEvent, ScanOptions};
use crate::spa::{SPA_SERVICE_UUID, SpaDevice};
use crate::terminal::TerminalClient;

use super::ui::{Painter, ScanEventView, ScanSummaryView};

/// Arguments for the `scan` command.
#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Number of simulated spas to register before scanning.
    #[arg(long, default_value_t = 3)]
    devices: usize,
    /// How long to keep scanning (e.g. `500ms`, `3s`).
    #[arg(long, default_value = "3s", value_parser = parse_duration)]
    duration: Duration,
    /// Report every sighting instead of suppressing repeats.
    #[arg(long)]
    allow_duplicates: bool,
}

impl ScanArgs {
    /// Creates scan arguments for `devices` spas scanned for `duration`.
    #[must_use]
    pub fn new(devices: usize, duration: Duration) -> Self {
        Self {
            devices,
            duration,
            allow_duplicates: false,
        }
    }

    /// Reports a sighting on every tick, duplicates included.
    #[must_use]
    pub fn with_duplicates(mut self) -> Self {
        self.allow_duplicates = true;
        self
    }
}

/// One line of scan output.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub(crate) enum ScanRecord {
    Discovered { device: DiscoverableDevice },
    Error { message: String },
}

impl From<ScanEvent> for ScanRecord {
    fn from(event: ScanEvent) -> Self {
        match event {
            Ok(device) => Self::Discovered { device },
            Err(error) => Self::Error {
                message: error.message().to_string(),
            },
        }
    }
}

/// Totals printed once the scan window closes.
#[derive(Debug, Default, Serialize)]
pub(crate) struct ScanSummary {
    pub(crate) registered: usize,
    pub(crate) discoveries: usize,
    pub(crate) errors: usize,
}

impl ScanSummary {
    fn record(&mut self, record: &ScanRecord) {
        match record {
            ScanRecord::Discovered { .. } => self.discoveries += 1,
            ScanRecord::Error { .. } => self.errors += 1,
        }
    }
}

/// MAC address of the `index`th simulated spa.
pub(crate) fn device_mac(index: usize) -> String {
    format!(
        "AA:BB:CC:DD:{:02X}:{:02X}",
        (index >> 8) & 0xFF,
        index & 0xFF
    )
}

/// Executes the `scan` command.
#[instrument(
    skip(manager, args, out, terminal_client),
    level = "info",
    fields(devices = args.devices, ?output_format)
)]
pub(crate) async fn run<W>(
    manager: &BleManager,
    args: &ScanArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    if args.devices == 0 {
        return Err(CliConfigError::NoDevices.into());
    }
    for index in 0..args.devices {
        manager.attach_spa_device(SpaDevice::with_mac(device_mac(index)));
    }

    let painter = Painter::new(terminal_client.stdout_is_terminal());
    let (sender, mut receiver) = mpsc::unbounded_channel();
    let deadline = Instant::now() + args.duration;
    manager.start_scan(
        vec![SPA_SERVICE_UUID.to_string()],
        ScanOptions {
            allow_duplicates: args.allow_duplicates,
        },
        move |event| {
            if sender.send(event).is_err() {
                trace!("scan output closed");
            }
        },
    )?;

    let mut summary = ScanSummary {
        registered: args.devices,
        ..ScanSummary::default()
    };
    let mut index = 0;
    let printed = loop {
        let Ok(Some(event)) = timeout_at(deadline, receiver.recv()).await else {
            break Ok(());
        };
        index += 1;
        let record = ScanRecord::from(event);
        summary.record(&record);
        let written = match output_format {
            OutputFormat::Pretty => {
                writeln!(out, "{}", ScanEventView::new(index, &record, &painter))
                    .map_err(anyhow::Error::from)
            }
            OutputFormat::Json => write_json_line(out, &record),
        };
        if let Err(error) = written {
            break Err(error);
        }
    };
    manager.stop_scan();
    printed?;

    match output_format {
        OutputFormat::Pretty => {
            writeln!(out)?;
            writeln!(out, "{}", ScanSummaryView::new(&summary, &painter))?;
        }
        OutputFormat::Json => write_json_line(out, &summary)?,
    }
    Ok(())
}
