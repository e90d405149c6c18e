use std::io;
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, instrument};

use crate::acquisition::{AcquisitionOrchestrator, RoundSummary};
use crate::cli::{OutputFormat, RoundArgs};
use crate::hw::HardwareClient;
use crate::terminal::TerminalClient;

use super::shutdown::CtrlCWatcher;
use super::ui::{Painter, ReportView};

/// Executes the `poll` command: one round, then exit.
#[instrument(skip(client, args, out, terminal_client), level = "info", fields(?output_format))]
pub(crate) async fn run<W>(
    client: Arc<dyn HardwareClient>,
    args: &RoundArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let orchestrator = AcquisitionOrchestrator::new(client, args.report_sink()?, args.config()?);
    let watcher = CtrlCWatcher::spawn();

    let Some(summary) = orchestrator.run_round(1, watcher.token()).await else {
        info!("poll cancelled before any device was found");
        return Ok(());
    };
    render_round(&summary, out, terminal_client, output_format)
}

/// Writes one round summary in the requested format.
pub(crate) fn render_round<W>(
    summary: &RoundSummary,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    match output_format {
        OutputFormat::Pretty => {
            let painter = Painter::new(terminal_client.stdout_is_terminal());
            writeln!(
                out,
                "{}",
                ReportView::new(summary.report(), summary.sessions(), painter)
            )?;
        }
        OutputFormat::Json => {
            serde_json::to_writer(&mut *out, summary.report())?;
            writeln!(out)?;
        }
    }
    Ok(())
}
