use tracing::{instrument, trace};

use crate::error::FrameError;
use crate::protocol::{FRAME_HEADER_LEN, FRAME_OVERHEAD, MAX_FRAME_LEN, START_MARKER};

use super::{ChecksumCodec, Frame};

/// Result of feeding one notification chunk into a [`FrameReassembler`].
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum FrameOutcome {
    /// More chunks are needed.
    Incomplete,
    /// A full frame arrived and its checksum matched.
    Complete(Frame),
    /// The frame is unusable; the caller must [`FrameReassembler::reset`].
    Error(FrameError),
}

/// Per-device accumulator that stitches notification chunks into frames.
///
/// After `Complete` or `Error` the caller resets the accumulator before the
/// next request. Once an error is latched no further bytes are accepted.
#[derive(Debug, Default)]
pub struct FrameReassembler {
    buffer: Vec<u8>,
    header: Option<FrameHeader>,
    latched: Option<FrameError>,
}

#[derive(Debug, Clone, Copy)]
struct FrameHeader {
    command: u8,
    status: u8,
    payload_len: usize,
}

impl FrameHeader {
    fn total_len(self) -> usize {
        self.payload_len + FRAME_OVERHEAD
    }
}

impl FrameReassembler {
    /// Creates an empty reassembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns how many bytes have been accumulated for the current frame.
    #[must_use]
    pub fn received_len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the total frame length declared by the header, once known.
    #[must_use]
    pub fn expected_len(&self) -> Option<usize> {
        self.header.map(FrameHeader::total_len)
    }

    /// Returns whether an error is latched.
    #[must_use]
    pub fn is_errored(&self) -> bool {
        self.latched.is_some()
    }

    /// Returns whether nothing has been accumulated since the last reset.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty() && self.latched.is_none()
    }

    /// Discards all accumulated state.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.header = None;
        self.latched = None;
    }

    /// Feeds one notification chunk.
    ///
    /// ```
    /// use bmspoll::{FrameOutcome, FrameReassembler};
    ///
    /// let mut reassembler = FrameReassembler::new();
    /// let frame = [0xDD, 0x04, 0x00, 0x02, 0x0D, 0x48, 0xFF, 0xA9, 0x77];
    ///
    /// assert_eq!(FrameOutcome::Incomplete, reassembler.feed(&frame[..5]));
    /// assert!(matches!(reassembler.feed(&frame[5..]), FrameOutcome::Complete(_)));
    /// ```
    #[instrument(skip(self, chunk), level = "trace", fields(chunk_len = chunk.len(), received = self.buffer.len()))]
    pub fn feed(&mut self, chunk: &[u8]) -> FrameOutcome {
        if let Some(error) = &self.latched {
            return FrameOutcome::Error(error.clone());
        }
        if chunk.is_empty() {
            return FrameOutcome::Incomplete;
        }
        if self.buffer.is_empty() && chunk[0] != START_MARKER {
            return self.latch(FrameError::MissingStartMarker { found: chunk[0] });
        }

        self.buffer.extend_from_slice(chunk);

        if self.header.is_none() && self.buffer.len() >= FRAME_HEADER_LEN {
            let header = FrameHeader {
                command: self.buffer[1],
                status: self.buffer[2],
                payload_len: usize::from(self.buffer[3]),
            };
            trace!(
                command = header.command,
                status = header.status,
                payload_len = header.payload_len,
                "frame header received"
            );
            if header.status != 0 {
                return self.latch(FrameError::DeviceReportedFailure {
                    command: header.command,
                    status: header.status,
                });
            }
            self.header = Some(header);
        }

        let received = self.buffer.len();
        let Some(total) = self.expected_len() else {
            if received >= MAX_FRAME_LEN {
                return self.latch(FrameError::ReassemblyOverflow {
                    received,
                    declared: 0,
                });
            }
            return FrameOutcome::Incomplete;
        };

        if received == total && total <= MAX_FRAME_LEN {
            return match ChecksumCodec::validate(&self.buffer) {
                Ok(()) => FrameOutcome::Complete(Frame::from_validated(std::mem::take(
                    &mut self.buffer,
                ))),
                Err(error) => self.latch(error),
            };
        }

        if received >= MAX_FRAME_LEN || received > total {
            return self.latch(FrameError::ReassemblyOverflow {
                received,
                declared: total,
            });
        }

        FrameOutcome::Incomplete
    }

    fn latch(&mut self, error: FrameError) -> FrameOutcome {
        self.latched = Some(error.clone());
        FrameOutcome::Error(error)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn cell_frame() -> Vec<u8> {
        Frame::encode_response(0x04, 0x00, &[0x0D, 0x48, 0x0D, 0x50, 0x0D, 0x4C, 0x0D, 0x46])
            .into_bytes()
    }

    fn feed_in_chunks(reassembler: &mut FrameReassembler, bytes: &[u8], size: usize) -> FrameOutcome {
        let mut last = FrameOutcome::Incomplete;
        for chunk in bytes.chunks(size) {
            last = reassembler.feed(chunk);
            if !matches!(last, FrameOutcome::Incomplete) {
                break;
            }
        }
        last
    }

    #[rstest]
    #[case::single_chunk(64)]
    #[case::header_split(3)]
    #[case::byte_by_byte(1)]
    #[case::ble_default(20)]
    fn outcome_is_independent_of_chunk_boundaries(#[case] size: usize) {
        let bytes = cell_frame();
        let mut reassembler = FrameReassembler::new();

        let outcome = feed_in_chunks(&mut reassembler, &bytes, size);

        assert_eq!(FrameOutcome::Complete(Frame::from_validated(bytes)), outcome);
    }

    #[test]
    fn nonzero_status_is_reported_immediately() {
        let mut reassembler = FrameReassembler::new();

        let outcome = reassembler.feed(&[0xDD, 0x03, 0x80, 0x00]);

        assert_eq!(
            FrameOutcome::Error(FrameError::DeviceReportedFailure {
                command: 0x03,
                status: 0x80
            }),
            outcome
        );
        assert!(reassembler.is_errored());
    }

    #[test]
    fn missing_start_marker_is_a_transport_anomaly() {
        let mut reassembler = FrameReassembler::new();

        assert_matches!(
            reassembler.feed(&[0x0D, 0x48, 0x77]),
            FrameOutcome::Error(FrameError::MissingStartMarker { found: 0x0D })
        );
    }

    #[test]
    fn checksum_mismatch_reports_both_values() {
        let mut bytes = cell_frame();
        bytes[5] = bytes[5].wrapping_add(1);
        let mut reassembler = FrameReassembler::new();

        assert_matches!(
            reassembler.feed(&bytes),
            FrameOutcome::Error(FrameError::ChecksumMismatch { received, computed })
            if received == computed.wrapping_add(1)
        );
    }

    #[test]
    fn oversized_declared_length_overflows_before_exceeding_limit() {
        let mut reassembler = FrameReassembler::new();
        let mut outcome = reassembler.feed(&[0xDD, 0x03, 0x00, 0xF0]);
        let mut fed = 4;
        while outcome == FrameOutcome::Incomplete {
            outcome = reassembler.feed(&[0x00; 16]);
            fed += 16;
        }

        assert_matches!(
            outcome,
            FrameOutcome::Error(FrameError::ReassemblyOverflow { declared: 247, .. })
        );
        assert!(fed < MAX_FRAME_LEN + 16);
    }

    #[test]
    fn single_chunk_longer_than_limit_never_completes() {
        let payload = vec![0x01; 200];
        let bytes = Frame::encode_response(0x03, 0x00, &payload).into_bytes();
        let mut reassembler = FrameReassembler::new();

        assert_matches!(
            reassembler.feed(&bytes),
            FrameOutcome::Error(FrameError::ReassemblyOverflow { received: 207, declared: 207 })
        );
    }

    #[test]
    fn trailing_bytes_beyond_declared_length_overflow() {
        let mut bytes = cell_frame();
        bytes.push(0x00);
        let mut reassembler = FrameReassembler::new();

        assert_matches!(
            reassembler.feed(&bytes),
            FrameOutcome::Error(FrameError::ReassemblyOverflow { received: 16, declared: 15 })
        );
    }

    #[test]
    fn latched_error_ignores_further_chunks_until_reset() {
        let mut reassembler = FrameReassembler::new();
        let _ = reassembler.feed(&[0xDD, 0x04, 0x01, 0x00]);

        let outcome = reassembler.feed(&cell_frame());
        assert_matches!(
            outcome,
            FrameOutcome::Error(FrameError::DeviceReportedFailure { .. })
        );
        assert_eq!(4, reassembler.received_len());

        reassembler.reset();
        assert!(reassembler.is_empty());
        assert_matches!(reassembler.feed(&cell_frame()), FrameOutcome::Complete(_));
    }
}
