use std::io;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::cli::{DecodeArgs, OutputFormat};
use crate::codec::{ChecksumCodec, FrameDecoder, FrameOutcome, FrameReassembler};
use crate::error::FrameError;
use crate::protocol::FRAME_HEADER_LEN;
use crate::record::TelemetryRecord;
use crate::terminal::TerminalClient;
use crate::utils::{format_hex, parse_hex};

use super::ui::{Painter, RecordView};

#[derive(Debug, Serialize)]
struct DecodedFrame<'a> {
    command: String,
    status: u8,
    payload_length: usize,
    checksum: String,
    record: &'a TelemetryRecord,
}

/// Executes the `decode` command.
#[instrument(skip(args, out, terminal_client), level = "info", fields(?output_format))]
pub(crate) fn run<W>(
    args: &DecodeArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let bytes = parse_hex(args.frame())?;
    debug!(bytes = %format_hex(&bytes), "decoding captured frame");

    let mut reassembler = FrameReassembler::new();
    let frame = match reassembler.feed(&bytes) {
        FrameOutcome::Complete(frame) => frame,
        FrameOutcome::Error(error) => return Err(error.into()),
        FrameOutcome::Incomplete => {
            return Err(FrameError::Truncated {
                needed: reassembler.expected_len().unwrap_or(FRAME_HEADER_LEN),
                actual: bytes.len(),
            }
            .into());
        }
    };

    let mut record = TelemetryRecord::default();
    record.merge(FrameDecoder::decode(&frame)?);
    let decoded = DecodedFrame {
        command: format!("{:#04x}", frame.command()),
        status: frame.status(),
        payload_length: frame.payload().len(),
        checksum: format!("{:#06x}", ChecksumCodec::stored(frame.as_bytes())?),
        record: &record,
    };

    match output_format {
        OutputFormat::Pretty => {
            let painter = Painter::new(terminal_client.stdout_is_terminal());
            writeln!(
                out,
                "command {}, {} payload bytes, checksum {} ok",
                decoded.command, decoded.payload_length, decoded.checksum
            )?;
            writeln!(out, "{}", RecordView::new(&record, painter))?;
        }
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, &decoded)?;
            writeln!(out)?;
        }
    }
    Ok(())
}
