use std::io;
use std::sync::Arc;

use anyhow::Result;
use tracing::{instrument, warn};

use crate::acquisition::AcquisitionOrchestrator;
use crate::cli::{OutputFormat, RoundArgs};
use crate::hw::HardwareClient;
use crate::terminal::TerminalClient;

use super::poll::render_round;
use super::shutdown::CtrlCWatcher;

/// Executes the `run` command: rounds until Ctrl+C.
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

    orchestrator
        .run_forever(watcher.token().clone(), |summary| {
            if let Err(error) = render_round(summary, &mut *out, terminal_client, output_format) {
                warn!(%error, "failed to write round report");
            }
        })
        .await;
    Ok(())
}
