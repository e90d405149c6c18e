use crate::protocol::{END_MARKER, FRAME_HEADER_LEN, START_MARKER};

use super::ChecksumCodec;

/// A complete, checksum-validated response frame.
///
/// Layout: `DD <command> <status> <L> <payload; L> <checksum; 2> 77`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Frame {
    bytes: Vec<u8>,
}

impl Frame {
    /// Wraps bytes that reassembly has already length- and checksum-checked.
    pub(crate) fn from_validated(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Encodes a response frame the way a device would send it.
    ///
    /// ```
    /// use bmspoll::Frame;
    ///
    /// let frame = Frame::encode_response(0x04, 0x00, &[0x0D, 0x48]);
    /// assert_eq!(&[0xDD, 0x04, 0x00, 0x02, 0x0D, 0x48, 0xFF, 0xA9, 0x77], frame.as_bytes());
    /// ```
    ///
    /// Payloads longer than 255 bytes are truncated to fit the length byte.
    #[must_use]
    pub fn encode_response(command: u8, status: u8, payload: &[u8]) -> Self {
        let payload = &payload[..payload.len().min(usize::from(u8::MAX))];
        let payload_len = u8::try_from(payload.len()).unwrap_or(u8::MAX);
        let mut bytes = Vec::with_capacity(payload.len() + crate::protocol::FRAME_OVERHEAD);
        bytes.extend_from_slice(&[START_MARKER, command, status, payload_len]);
        bytes.extend_from_slice(payload);
        bytes.extend_from_slice(&[0x00, 0x00, END_MARKER]);

        let checksum_offset = FRAME_HEADER_LEN + payload.len();
        if let Ok(checksum) = ChecksumCodec::checksum(&bytes) {
            bytes[checksum_offset..checksum_offset + 2].copy_from_slice(&checksum.to_be_bytes());
        }
        Self { bytes }
    }

    /// Returns the command byte echoed by the device.
    #[must_use]
    pub fn command(&self) -> u8 {
        self.bytes[1]
    }

    /// Returns the status byte (`0` means success).
    #[must_use]
    pub fn status(&self) -> u8 {
        self.bytes[2]
    }

    /// Returns the payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        let len = usize::from(self.bytes[3]);
        &self.bytes[FRAME_HEADER_LEN..FRAME_HEADER_LEN + len]
    }

    /// Returns the raw frame bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the frame, returning its raw bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}
