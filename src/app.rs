use std::io;
use std::sync::Arc;

use anyhow::Result;
use tracing::instrument;

use crate::cli::{Command, FakeArgs, LogLevel, OutputFormat};
use crate::hw::{
    HardwareClient, fake_hardware_client as build_fake_hardware_client,
    real_hardware_client as build_real_hardware_client,
};
use crate::telemetry;
use crate::terminal::{SystemTerminalClient, TerminalClient};

const SERVICE_NAME: &str = "bmspoll";

/// Creates a hardware client backed by the real BLE stack.
#[must_use]
pub fn real_hardware_client() -> Arc<dyn HardwareClient> {
    build_real_hardware_client()
}

/// Creates a hardware client backed by simulated fixture devices.
#[must_use]
pub fn fake_hardware_client(fake_args: FakeArgs) -> Arc<dyn HardwareClient> {
    build_fake_hardware_client(fake_args.into_backend_config())
}

/// Runs a CLI command against the process terminal.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// let args = bmspoll::Args::try_parse_from([
///     "bmspoll",
///     "--fake",
///     "--fake-scan",
///     "hci0|AA:01|xiaoxiang-1|-43",
///     "scan",
/// ])?;
/// let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
/// let hardware_client = match maybe_fake_args {
///     Some(fake_args) => bmspoll::fake_hardware_client(fake_args),
///     None => bmspoll::real_hardware_client(),
/// };
/// let mut out = Vec::new();
/// bmspoll::run(command, &mut out, hardware_client).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, configuration is
/// invalid, BLE interaction fails, or output writing fails.
pub async fn run<W>(command: Command, out: &mut W, hardware_client: Arc<dyn HardwareClient>) -> Result<()>
where
    W: io::Write,
{
    run_with_log_level(command, out, hardware_client, None, None).await
}

/// Runs a CLI command against the process terminal with explicit log and
/// output settings.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, configuration is
/// invalid, BLE interaction fails, or output writing fails.
pub async fn run_with_log_level<W>(
    command: Command,
    out: &mut W,
    hardware_client: Arc<dyn HardwareClient>,
    log_level: Option<LogLevel>,
    output_format: Option<OutputFormat>,
) -> Result<()>
where
    W: io::Write,
{
    run_with_clients(
        command,
        out,
        &SystemTerminalClient,
        hardware_client,
        log_level,
        output_format,
    )
    .await
}

/// Runs a CLI command with injected clients and explicit output settings.
///
/// Without an explicit format, output is `pretty` when stdout is a terminal
/// and `json` otherwise.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// struct FakeTerminal;
/// impl bmspoll::TerminalClient for FakeTerminal {
///     fn stdout_is_terminal(&self) -> bool { false }
///     fn stderr_is_terminal(&self) -> bool { false }
/// }
///
/// let args = bmspoll::Args::try_parse_from([
///     "bmspoll",
///     "--log-level",
///     "debug",
///     "decode",
///     "DD 2A 00 02 0D 16 FF DB 77",
/// ])?;
/// let log_level = args.log_level();
/// let (command, _) = args.into_command_and_fake_args()?;
/// let mut out = Vec::new();
/// bmspoll::run_with_clients(
///     command,
///     &mut out,
///     &FakeTerminal,
///     bmspoll::real_hardware_client(),
///     log_level,
///     None,
/// )
/// .await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, configuration is
/// invalid, BLE interaction fails, or output writing fails.
#[instrument(
    skip(out, terminal_client, hardware_client),
    level = "info",
    fields(command = command.name(), ?log_level)
)]
pub async fn run_with_clients<W>(
    command: Command,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    hardware_client: Arc<dyn HardwareClient>,
    log_level: Option<LogLevel>,
    output_format: Option<OutputFormat>,
) -> Result<()>
where
    W: io::Write,
{
    telemetry::initialise_tracing(
        SERVICE_NAME,
        terminal_client.stderr_is_terminal(),
        log_level.map(LogLevel::as_level_filter),
    )?;
    let output_format = output_format.unwrap_or(if terminal_client.stdout_is_terminal() {
        OutputFormat::Pretty
    } else {
        OutputFormat::Json
    });

    match command {
        Command::Scan(args) => {
            crate::cli::scan::run(hardware_client, &args, out, terminal_client, output_format).await
        }
        Command::Poll(args) => {
            crate::cli::poll::run(hardware_client, &args, out, terminal_client, output_format).await
        }
        Command::Run(args) => {
            crate::cli::run::run(hardware_client, &args, out, terminal_client, output_format).await
        }
        Command::Decode(args) => {
            crate::cli::decode::run(&args, out, terminal_client, output_format)
        }
    }
}
