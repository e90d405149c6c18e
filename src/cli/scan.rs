use std::io;
use std::sync::Arc;

use anyhow::Result;
use tracing::instrument;

use crate::cli::{OutputFormat, ScanArgs};
use crate::hw::HardwareClient;
use crate::terminal::TerminalClient;

use super::ui::{DeviceListView, Painter};

/// Executes the `scan` command.
#[instrument(
    skip(client, args, out, terminal_client),
    level = "info",
    fields(filter = args.name_filter(), ?output_format)
)]
pub(crate) async fn run<W>(
    client: Arc<dyn HardwareClient>,
    args: &ScanArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let devices = client
        .discover(args.name_filter(), args.scan_window())
        .await?;

    match output_format {
        OutputFormat::Pretty => {
            let painter = Painter::new(terminal_client.stdout_is_terminal());
            writeln!(out, "{}", DeviceListView::new(&devices, painter))?;
        }
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, &devices)?;
            writeln!(out)?;
        }
    }

    Ok(())
}
