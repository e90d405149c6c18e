use tracing::{debug, instrument};

use crate::error::FrameError;
use crate::protocol::{CMD_CELL_VOLTAGES, CMD_HEATING_ACK, CMD_PACK_INFO, REGISTER_START_VOLTAGE};
use crate::record::{
    CellVoltages, ManufactureDate, PackInfo, ProtectionStatus, TelemetryDelta,
};

/// Offset subtracted from raw temperature readings (tenths of a kelvin).
const KELVIN_OFFSET_DECI: i32 = 2731;

/// Fixed pack-info bytes preceding the temperature readings.
const PACK_INFO_FIXED_LEN: usize = 23;

/// Turns validated frames into telemetry deltas.
pub struct FrameDecoder;

impl FrameDecoder {
    /// Decodes a frame by its command byte.
    ///
    /// Unknown commands decode to [`TelemetryDelta::Empty`].
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::PayloadTooShort`] when the payload is shorter
    /// than the layout of a known command requires.
    #[instrument(skip(frame), level = "trace", fields(command = frame.command()))]
    pub fn decode(frame: &super::Frame) -> Result<TelemetryDelta, FrameError> {
        let payload = Payload {
            command: frame.command(),
            bytes: frame.payload(),
        };
        let delta = match frame.command() {
            CMD_PACK_INFO => TelemetryDelta::PackInfo(decode_pack_info(&payload)?),
            CMD_CELL_VOLTAGES => TelemetryDelta::CellVoltages(decode_cell_voltages(&payload)?),
            CMD_HEATING_ACK if frame.status() == 0 => TelemetryDelta::HeatingAcknowledged,
            REGISTER_START_VOLTAGE => {
                TelemetryDelta::StartVoltage(f64::from(payload.u16_at(0)?) / 1000.0)
            }
            other => {
                debug!(command = other, "ignoring response to unknown command");
                TelemetryDelta::Empty
            }
        };
        Ok(delta)
    }
}

struct Payload<'a> {
    command: u8,
    bytes: &'a [u8],
}

impl Payload<'_> {
    fn require(&self, needed: usize) -> Result<(), FrameError> {
        if self.bytes.len() < needed {
            return Err(FrameError::PayloadTooShort {
                command: self.command,
                needed,
                actual: self.bytes.len(),
            });
        }
        Ok(())
    }

    fn u8_at(&self, offset: usize) -> Result<u8, FrameError> {
        self.require(offset + 1)?;
        Ok(self.bytes[offset])
    }

    fn u16_at(&self, offset: usize) -> Result<u16, FrameError> {
        self.require(offset + 2)?;
        Ok(u16::from_be_bytes([self.bytes[offset], self.bytes[offset + 1]]))
    }

    fn i16_at(&self, offset: usize) -> Result<i16, FrameError> {
        self.require(offset + 2)?;
        Ok(i16::from_be_bytes([self.bytes[offset], self.bytes[offset + 1]]))
    }
}

fn hundredths(raw: u16) -> f64 {
    f64::from(raw) / 100.0
}

fn decode_pack_info(payload: &Payload<'_>) -> Result<PackInfo, FrameError> {
    payload.require(PACK_INFO_FIXED_LEN)?;

    let flags = payload.u8_at(20)?;
    let sensor_count = payload.u8_at(22)?;
    payload.require(PACK_INFO_FIXED_LEN + 2 * usize::from(sensor_count))?;
    let temperatures = (0..usize::from(sensor_count))
        .map(|index| {
            let raw = payload.u16_at(PACK_INFO_FIXED_LEN + 2 * index)?;
            Ok(f64::from(i32::from(raw) - KELVIN_OFFSET_DECI) / 10.0)
        })
        .collect::<Result<Vec<_>, FrameError>>()?;

    Ok(PackInfo {
        total_voltage: hundredths(payload.u16_at(0)?),
        current: f64::from(payload.i16_at(2)?) / 100.0,
        remaining_capacity: hundredths(payload.u16_at(4)?),
        nominal_capacity: hundredths(payload.u16_at(6)?),
        cycle_count: payload.u16_at(8)?,
        manufacture_date: ManufactureDate::from_packed(payload.u16_at(10)?),
        balance_status: [
            payload.u8_at(12)?,
            payload.u8_at(13)?,
            payload.u8_at(14)?,
            payload.u8_at(15)?,
        ],
        protection: ProtectionStatus::from_raw(payload.u16_at(16)?),
        firmware_version: f64::from(payload.u8_at(18)?) / 10.0,
        state_of_charge: payload.u8_at(19)?,
        charge_mosfet: flags & 0x01 != 0,
        discharge_mosfet: flags & 0x02 != 0,
        string_count: payload.u8_at(21)?,
        temperature_sensor_count: sensor_count,
        temperatures,
    })
}

fn decode_cell_voltages(payload: &Payload<'_>) -> Result<CellVoltages, FrameError> {
    let count = payload.bytes.len() / 2;
    let millivolts = (0..count)
        .map(|index| payload.u16_at(2 * index))
        .collect::<Result<Vec<_>, FrameError>>()?;
    Ok(CellVoltages::from_millivolts(&millivolts))
}
