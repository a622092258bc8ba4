use std::io;

use anyhow::Result;
use tracing::instrument;

use crate::cli::{Command, LogLevel, OutputFormat};
use crate::sim::{BleManager, SimulatorConfig};
use crate::telemetry;
use crate::terminal::{SystemTerminalClient, TerminalClient};

const SERVICE_NAME: &str = "spa-sim";

/// Runs a CLI command against a fresh emulator.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// let args = spa_sim::Args::try_parse_from([
///     "spa-sim",
///     "--seed",
///     "7",
///     "scan",
///     "--devices",
///     "2",
///     "--duration",
///     "100ms",
/// ])?;
/// let (command, config) = args.into_command_and_config()?;
/// let mut out = Vec::new();
/// spa_sim::run(command, &mut out, config, spa_sim::OutputFormat::Json).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the simulated exchange
/// fails, or output writing fails.
pub async fn run<W>(
    command: Command,
    out: &mut W,
    config: SimulatorConfig,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    run_with_log_level(command, out, config, None, output_format).await
}

/// Runs a CLI command with an explicit telemetry log-level override.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the simulated exchange
/// fails, or output writing fails.
pub async fn run_with_log_level<W>(
    command: Command,
    out: &mut W,
    config: SimulatorConfig,
    log_level: Option<LogLevel>,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    run_with_clients_and_log_level(
        command,
        out,
        &SystemTerminalClient,
        config,
        log_level,
        output_format,
    )
    .await
}

/// Runs a CLI command with an injected terminal client.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the simulated exchange
/// fails, or output writing fails.
pub async fn run_with_clients<W>(
    command: Command,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    config: SimulatorConfig,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    run_with_clients_and_log_level(command, out, terminal_client, config, None, output_format)
        .await
}

/// Runs a CLI command with injected clients and explicit telemetry settings.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// struct FakeTerminal;
/// impl spa_sim::TerminalClient for FakeTerminal {
///     fn stdout_is_terminal(&self) -> bool { false }
///     fn stderr_is_terminal(&self) -> bool { false }
/// }
///
/// let args = spa_sim::Args::try_parse_from([
///     "spa-sim",
///     "--log-level",
///     "trace",
///     "session",
///     "--code",
///     "1234",
/// ])?;
/// let log_level = args.log_level();
/// let (command, config) = args.into_command_and_config()?;
/// let mut out = Vec::new();
/// spa_sim::run_with_clients_and_log_level(
///     command,
///     &mut out,
///     &FakeTerminal,
///     config,
///     log_level,
///     spa_sim::OutputFormat::Pretty,
/// ).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the simulated exchange
/// fails, or output writing fails.
#[instrument(
    skip(out, terminal_client, config),
    level = "info",
    fields(command = command.name(), ?log_level)
)]
pub async fn run_with_clients_and_log_level<W>(
    command: Command,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    config: SimulatorConfig,
    log_level: Option<LogLevel>,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    telemetry::initialise_tracing(
        SERVICE_NAME,
        terminal_client.stderr_is_terminal(),
        log_level.map(LogLevel::as_level_filter),
    )?;

    let manager = BleManager::new(config);
    match command {
        Command::Scan(args) => {
            crate::cli::scan::run(&manager, &args, out, terminal_client, output_format).await
        }
        Command::Session(args) => {
            crate::cli::session::run(&manager, &args, out, terminal_client, output_format).await
        }
    }
}
