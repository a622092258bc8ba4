use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::level_filters::LevelFilter;

use crate::cli::scan::ScanArgs;
use crate::cli::session::SessionArgs;
use crate::error::CliConfigError;
use crate::sim::SimulatorConfig;

/// Command-line options for the spa simulator.
#[derive(Debug, Parser)]
#[command(
    name = "spa-sim",
    about = "Drive simulated spa controllers over an emulated BLE stack."
)]
pub struct Args {
    /// Log verbosity; overrides `RUST_LOG`.
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,
    /// Output rendering. Defaults to `pretty` on a terminal and `json` otherwise.
    #[arg(long, global = true, value_enum)]
    output_format: Option<OutputFormat>,
    /// Period of one scan tick (e.g. `250ms`, `1s`).
    #[arg(long, global = true, value_parser = parse_duration)]
    scan_interval: Option<Duration>,
    /// Seed for the emulator's random choices.
    #[arg(long, global = true)]
    seed: Option<u64>,
    /// Probability that a scan tick reports an error instead of a device.
    #[arg(long, global = true)]
    scan_error_probability: Option<f64>,
    /// Probability that a tick sighting is reported when duplicates are off.
    #[arg(long, global = true)]
    duplicate_probability: Option<f64>,
    #[command(subcommand)]
    command: Command,
}

impl Args {
    /// Creates argument values directly without CLI parsing.
    ///
    /// ```
    /// use spa_sim::{Args, Command, ScanArgs};
    ///
    /// let args = Args::new(Command::Scan(ScanArgs::new(2, std::time::Duration::from_secs(1))))
    ///     .with_seed(7);
    /// let _ = args;
    /// ```
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            log_level: None,
            output_format: None,
            scan_interval: None,
            seed: None,
            scan_error_probability: None,
            duplicate_probability: None,
            command,
        }
    }

    /// Fixes the emulator's random seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Overrides the scan tick period.
    #[must_use]
    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = Some(interval);
        self
    }

    /// Overrides the scan error probability.
    #[must_use]
    pub fn with_scan_error_probability(mut self, probability: f64) -> Self {
        self.scan_error_probability = Some(probability);
        self
    }

    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    #[must_use]
    pub fn output_format(&self) -> Option<OutputFormat> {
        self.output_format
    }

    /// Builds the emulator settings described by the global flags.
    ///
    /// # Errors
    ///
    /// Returns an error if a probability lies outside `0..=1`.
    pub fn simulator_config(&self) -> anyhow::Result<SimulatorConfig> {
        let scan_error_probability = self
            .scan_error_probability
            .map(validate_probability)
            .transpose()?;
        let duplicate_probability = self
            .duplicate_probability
            .map(validate_probability)
            .transpose()?;

        Ok(SimulatorConfig::builder()
            .maybe_scan_tick_interval(self.scan_interval)
            .maybe_scan_error_probability(scan_error_probability)
            .maybe_duplicate_admission_probability(duplicate_probability)
            .maybe_rng_seed(self.seed)
            .build())
    }

    /// Splits parsed arguments into the command and the emulator settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the global emulator flags are invalid.
    pub fn into_command_and_config(self) -> anyhow::Result<(Command, SimulatorConfig)> {
        let config = self.simulator_config()?;
        Ok((self.command, config))
    }
}

fn validate_probability(value: f64) -> Result<f64, CliConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(CliConfigError::ProbabilityOutOfRange { value })
    }
}

/// Supported CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Register simulated spas and print what a scan reports.
    Scan(ScanArgs),
    /// Attach one spa, pair with it as master, set the temperature, then disconnect.
    Session(SessionArgs),
}

impl Command {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Scan(_args) => "scan",
            Self::Session(_args) => "session",
        }
    }
}

/// Log verbosity accepted by `--log-level`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub(crate) fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

/// Rendering of command output.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable tables and lines.
    Pretty,
    /// One JSON document per line.
    Json,
}

pub(crate) fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|error| error.to_string())
}
