use std::collections::HashMap;
use std::sync::LazyLock;

use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};

/// First byte of every request and response frame.
pub(crate) const START_MARKER: u8 = 0xDD;
/// Last byte of every request and response frame.
pub(crate) const END_MARKER: u8 = 0x77;
/// Request direction byte: read.
pub(crate) const READ_REQUEST: u8 = 0xA5;

/// Command byte echoed by pack-info responses.
pub(crate) const CMD_PACK_INFO: u8 = 0x03;
/// Command byte echoed by cell-voltage responses.
pub(crate) const CMD_CELL_VOLTAGES: u8 = 0x04;
/// Command byte echoed by heating acknowledgements.
pub(crate) const CMD_HEATING_ACK: u8 = 0xFC;
/// Register holding the balancing start voltage, echoed as the response command byte.
pub(crate) const REGISTER_START_VOLTAGE: u8 = 0x2A;

/// Header bytes (start, command, status, length) preceding the payload.
pub(crate) const FRAME_HEADER_LEN: usize = 4;
/// Checksum (2) plus end marker (1) following the payload.
pub(crate) const FRAME_TRAILER_LEN: usize = 3;
/// Fixed bytes surrounding a payload of declared length `L`.
pub(crate) const FRAME_OVERHEAD: usize = FRAME_HEADER_LEN + FRAME_TRAILER_LEN;
/// Accumulated length at which reassembly gives up on a frame.
pub(crate) const MAX_FRAME_LEN: usize = 100;

/// One request the acquisition engine knows how to send.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, derive_more::Display)]
pub enum BmsCommand {
    /// Basic pack information (`0x03`).
    #[display("pack_info")]
    PackInfo,
    /// Per-cell voltages (`0x04`).
    #[display("cell_voltages")]
    CellVoltages,
    /// Read of a single configuration register.
    #[display("read_register({_0:#04x})")]
    ReadRegister(u8),
}

impl BmsCommand {
    /// Register read of the balancing start voltage.
    pub const START_VOLTAGE: Self = Self::ReadRegister(REGISTER_START_VOLTAGE);

    /// Returns the exact 7-byte request written to the device.
    ///
    /// ```
    /// use bmspoll::BmsCommand;
    ///
    /// assert_eq!(
    ///     [0xDD, 0xA5, 0x03, 0x00, 0xFF, 0xFD, 0x77],
    ///     BmsCommand::PackInfo.request_frame()
    /// );
    /// assert_eq!(
    ///     [0xDD, 0xA5, 0x03, 0x00, 0xFF, 0x2A, 0x77],
    ///     BmsCommand::START_VOLTAGE.request_frame()
    /// );
    /// ```
    #[must_use]
    pub const fn request_frame(self) -> [u8; 7] {
        match self {
            Self::PackInfo => [
                START_MARKER,
                READ_REQUEST,
                CMD_PACK_INFO,
                0x00,
                0xFF,
                0xFD,
                END_MARKER,
            ],
            Self::CellVoltages => [
                START_MARKER,
                READ_REQUEST,
                CMD_CELL_VOLTAGES,
                0x00,
                0xFF,
                0xFC,
                END_MARKER,
            ],
            Self::ReadRegister(register) => [
                START_MARKER,
                READ_REQUEST,
                CMD_PACK_INFO,
                0x00,
                0xFF,
                register,
                END_MARKER,
            ],
        }
    }

    /// Recognises a request frame produced by [`BmsCommand::request_frame`].
    #[must_use]
    pub fn from_request_frame(frame: &[u8]) -> Option<Self> {
        let [START_MARKER, READ_REQUEST, command, 0x00, 0xFF, tail, END_MARKER] = *frame else {
            return None;
        };
        match (command, tail) {
            (CMD_PACK_INFO, 0xFD) => Some(Self::PackInfo),
            (CMD_CELL_VOLTAGES, 0xFC) => Some(Self::CellVoltages),
            (CMD_PACK_INFO, register) => Some(Self::ReadRegister(register)),
            _ => None,
        }
    }

    /// Returns the command byte the device echoes in its response.
    #[must_use]
    pub const fn response_command(self) -> u8 {
        match self {
            Self::PackInfo => CMD_PACK_INFO,
            Self::CellVoltages => CMD_CELL_VOLTAGES,
            Self::ReadRegister(register) => register,
        }
    }
}

/// Known JBD BMS GATT endpoints.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, Display)]
pub enum EndpointId {
    /// BMS UART bridge service.
    #[strum(to_string = "bms_service")]
    BmsService,
    /// Characteristic that receives request frames.
    #[strum(to_string = "write_characteristic")]
    WriteCharacteristic,
    /// Characteristic that notifies response chunks.
    #[strum(to_string = "notify_characteristic")]
    NotifyCharacteristic,
}

/// Descriptive metadata for one protocol endpoint.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) struct EndpointMetadata {
    name: &'static str,
    uuid: &'static str,
}

impl EndpointMetadata {
    /// Human-readable endpoint name.
    pub(crate) fn name(self) -> &'static str {
        self.name
    }

    /// Endpoint UUID.
    pub(crate) fn uuid(self) -> &'static str {
        self.uuid
    }
}

static ENDPOINTS_BY_ID: LazyLock<HashMap<EndpointId, EndpointMetadata>> = LazyLock::new(|| {
    EndpointId::iter()
        .map(|endpoint| (endpoint, metadata_for(endpoint)))
        .collect()
});

/// Returns metadata for one endpoint.
pub(crate) fn endpoint_metadata(endpoint: EndpointId) -> EndpointMetadata {
    *ENDPOINTS_BY_ID
        .get(&endpoint)
        .unwrap_or(&metadata_for(endpoint))
}

fn metadata_for(endpoint: EndpointId) -> EndpointMetadata {
    match endpoint {
        EndpointId::BmsService => EndpointMetadata {
            name: "BMS UART service",
            uuid: "0000ff00-0000-1000-8000-00805f9b34fb",
        },
        EndpointId::WriteCharacteristic => EndpointMetadata {
            name: "BMS request write",
            uuid: "0000ff02-0000-1000-8000-00805f9b34fb",
        },
        EndpointId::NotifyCharacteristic => EndpointMetadata {
            name: "BMS response notify",
            uuid: "0000ff01-0000-1000-8000-00805f9b34fb",
        },
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(BmsCommand::PackInfo, [0xDD, 0xA5, 0x03, 0x00, 0xFF, 0xFD, 0x77])]
    #[case(BmsCommand::CellVoltages, [0xDD, 0xA5, 0x04, 0x00, 0xFF, 0xFC, 0x77])]
    #[case(BmsCommand::START_VOLTAGE, [0xDD, 0xA5, 0x03, 0x00, 0xFF, 0x2A, 0x77])]
    fn request_frames_are_bit_exact(#[case] command: BmsCommand, #[case] expected: [u8; 7]) {
        assert_eq!(expected, command.request_frame());
        assert_eq!(
            Some(command),
            BmsCommand::from_request_frame(&command.request_frame())
        );
    }

    #[test]
    fn from_request_frame_rejects_foreign_bytes() {
        assert_eq!(None, BmsCommand::from_request_frame(&[0x01, 0x03, 0x00]));
        assert_eq!(
            None,
            BmsCommand::from_request_frame(&[0xDD, 0x5A, 0x03, 0x00, 0xFF, 0xFD, 0x77])
        );
    }

    #[test]
    fn endpoint_metadata_uses_ff0x_uuids() {
        let write = endpoint_metadata(EndpointId::WriteCharacteristic);
        assert_eq!("0000ff02-0000-1000-8000-00805f9b34fb", write.uuid());

        let notify = endpoint_metadata(EndpointId::NotifyCharacteristic);
        assert_eq!("BMS response notify", notify.name());
    }
}
