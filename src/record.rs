use std::collections::BTreeMap;
use std::fmt;

use bitflags::bitflags;
use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};
use serde_with::SerializeDisplay;
use time::OffsetDateTime;

mod rounding {
    use serde::{Serializer, ser::SerializeSeq};

    pub(super) fn two_digits<S>(value: &f64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64((value * 100.0).round() / 100.0)
    }

    pub(super) fn one_digit<S>(value: &f64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64((value * 10.0).round() / 10.0)
    }

    pub(super) fn option_three_digits<S>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(value) => serializer.serialize_some(&((value * 1000.0).round() / 1000.0)),
            None => serializer.serialize_none(),
        }
    }

    pub(super) fn vec_one_digit<S>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(values.len()))?;
        for value in values {
            seq.serialize_element(&((value * 10.0).round() / 10.0))?;
        }
        seq.end()
    }

    pub(super) fn vec_three_digits<S>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(values.len()))?;
        for value in values {
            seq.serialize_element(&((value * 1000.0).round() / 1000.0))?;
        }
        seq.end()
    }

    pub(super) fn on_off<S>(enabled: &bool, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(if *enabled { "ON" } else { "OFF" })
    }
}

/// Opaque aggregation key for one device: its address and advertised name.
///
/// Ordering is by address first, which keeps report output deterministic.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, derive_more::Display)]
#[display("{name} ({address})")]
pub struct DeviceIdentity {
    address: String,
    name: String,
}

impl DeviceIdentity {
    /// Creates an identity from an address and advertised name.
    pub fn new(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
        }
    }

    /// Returns the device address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns the advertised device name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Packed production date: `year = 2000 + bits 15..9`, `month = bits 8..5`,
/// `day = bits 4..0`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, SerializeDisplay, derive_more::Display)]
#[display("{year:04}/{month:02}/{day:02}")]
pub struct ManufactureDate {
    year: u16,
    month: u8,
    day: u8,
}

impl ManufactureDate {
    /// Unpacks the 16-bit date field.
    ///
    /// ```
    /// use bmspoll::ManufactureDate;
    ///
    /// let date = ManufactureDate::from_packed(0x2E8E);
    /// assert_eq!("2023/04/14", date.to_string());
    /// ```
    #[must_use]
    pub fn from_packed(packed: u16) -> Self {
        Self {
            year: 2000 + (packed >> 9),
            month: ((packed >> 5) & 0x0F) as u8,
            day: (packed & 0x1F) as u8,
        }
    }

    /// Returns the year.
    #[must_use]
    pub fn year(self) -> u16 {
        self.year
    }

    /// Returns the month as transmitted (`1..=12` on sane devices).
    #[must_use]
    pub fn month(self) -> u8 {
        self.month
    }

    /// Returns the day of month as transmitted.
    #[must_use]
    pub fn day(self) -> u8 {
        self.day
    }

    /// Returns the calendar date, or `None` when the device reports an
    /// impossible one (unprogrammed packs commonly send zeroes).
    #[must_use]
    pub fn to_date(self) -> Option<time::Date> {
        let month = time::Month::try_from(self.month).ok()?;
        time::Date::from_calendar_date(i32::from(self.year), month, self.day).ok()
    }
}

bitflags! {
    /// Protection conditions reported in the pack-info protection word.
    #[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Default)]
    pub struct ProtectionFlags: u16 {
        const CELL_OVERVOLTAGE = 1 << 0;
        const CELL_UNDERVOLTAGE = 1 << 1;
        const PACK_OVERVOLTAGE = 1 << 2;
        const PACK_UNDERVOLTAGE = 1 << 3;
        const CHARGE_OVERTEMPERATURE = 1 << 4;
        const CHARGE_UNDERTEMPERATURE = 1 << 5;
        const DISCHARGE_OVERTEMPERATURE = 1 << 6;
        const DISCHARGE_UNDERTEMPERATURE = 1 << 7;
        const CHARGE_OVERCURRENT = 1 << 8;
        const DISCHARGE_OVERCURRENT = 1 << 9;
        const SHORT_CIRCUIT = 1 << 10;
        const FRONT_END_IC_ERROR = 1 << 11;
        const SOFTWARE_MOSFET_LOCK = 1 << 12;
    }
}

/// The raw protection word together with its decoded bits.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct ProtectionStatus {
    raw: u16,
}

impl ProtectionStatus {
    /// Wraps a raw protection word.
    #[must_use]
    pub fn from_raw(raw: u16) -> Self {
        Self { raw }
    }

    /// Returns the word exactly as received, including undefined bits.
    #[must_use]
    pub fn raw(self) -> u16 {
        self.raw
    }

    /// Returns the known protection bits that are set.
    #[must_use]
    pub fn flags(self) -> ProtectionFlags {
        ProtectionFlags::from_bits_truncate(self.raw)
    }

    /// Returns whether `flag` is set.
    #[must_use]
    pub fn is_set(self, flag: ProtectionFlags) -> bool {
        self.flags().contains(flag)
    }

    /// Returns the lowercase names of active flags in bit order.
    #[must_use]
    pub fn active_names(self) -> Vec<String> {
        self.flags()
            .iter_names()
            .map(|(name, _)| name.to_ascii_lowercase())
            .collect()
    }
}

impl fmt::Display for ProtectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016b}", self.raw)
    }
}

impl Serialize for ProtectionStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("ProtectionStatus", 2)?;
        state.serialize_field("protection_status", &self.to_string())?;
        state.serialize_field("protection_flags", &self.active_names())?;
        state.end()
    }
}

/// Decoded `0x03` pack-info response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackInfo {
    /// Pack voltage in volts.
    #[serde(rename = "total_volts", serialize_with = "rounding::two_digits")]
    pub total_voltage: f64,
    /// Pack current in amps; positive while charging, negative while discharging.
    #[serde(serialize_with = "rounding::two_digits")]
    pub current: f64,
    /// Remaining capacity in amp-hours.
    #[serde(serialize_with = "rounding::two_digits")]
    pub remaining_capacity: f64,
    /// Nominal capacity in amp-hours.
    #[serde(serialize_with = "rounding::two_digits")]
    pub nominal_capacity: f64,
    #[serde(rename = "total_cycles")]
    pub cycle_count: u16,
    #[serde(rename = "production_date")]
    pub manufacture_date: ManufactureDate,
    /// Raw balancing bitmap, one bit per cell.
    pub balance_status: [u8; 4],
    #[serde(flatten)]
    pub protection: ProtectionStatus,
    #[serde(rename = "software_version", serialize_with = "rounding::one_digit")]
    pub firmware_version: f64,
    /// State of charge in percent.
    #[serde(rename = "remaining_soc")]
    pub state_of_charge: u8,
    #[serde(rename = "mosfet_state_charge", serialize_with = "rounding::on_off")]
    pub charge_mosfet: bool,
    #[serde(rename = "mosfet_state_discharge", serialize_with = "rounding::on_off")]
    pub discharge_mosfet: bool,
    #[serde(rename = "number_of_battery_strings")]
    pub string_count: u8,
    #[serde(rename = "num_temp_sensors")]
    pub temperature_sensor_count: u8,
    /// Temperature readings in degrees Celsius.
    #[serde(rename = "temp_sensors", serialize_with = "rounding::vec_one_digit")]
    pub temperatures: Vec<f64>,
}

/// Decoded `0x04` cell-voltage response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellVoltages {
    #[serde(rename = "number_of_cells")]
    cell_count: usize,
    #[serde(rename = "cell_voltages", serialize_with = "rounding::vec_three_digits")]
    volts: Vec<f64>,
}

impl CellVoltages {
    /// Builds cell readings from millivolt values.
    #[must_use]
    pub fn from_millivolts(millivolts: &[u16]) -> Self {
        let volts: Vec<f64> = millivolts
            .iter()
            .map(|mv| f64::from(*mv) / 1000.0)
            .collect();
        Self {
            cell_count: volts.len(),
            volts,
        }
    }

    /// Returns the number of cells.
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.cell_count
    }

    /// Returns per-cell voltages in volts.
    #[must_use]
    pub fn volts(&self) -> &[f64] {
        &self.volts
    }

    /// Returns the difference between the highest and lowest cell, in volts.
    #[must_use]
    pub fn spread(&self) -> Option<f64> {
        let max = self.volts.iter().copied().reduce(f64::max)?;
        let min = self.volts.iter().copied().reduce(f64::min)?;
        Some(max - min)
    }
}

/// Partial record produced by decoding one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryDelta {
    /// Unrecognised command; adds nothing.
    Empty,
    PackInfo(PackInfo),
    CellVoltages(CellVoltages),
    /// The device accepted a heating command.
    HeatingAcknowledged,
    /// Balancing start voltage, in volts.
    StartVoltage(f64),
}

impl TelemetryDelta {
    /// Returns whether the delta carries no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// Per-device aggregate built up over a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TelemetryRecord {
    #[serde(flatten)]
    pack: Option<PackInfo>,
    #[serde(flatten)]
    cells: Option<CellVoltages>,
    #[serde(
        rename = "heating_command",
        skip_serializing_if = "std::ops::Not::not",
        serialize_with = "serialize_heating"
    )]
    heating_acknowledged: bool,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "rounding::option_three_digits"
    )]
    start_voltage: Option<f64>,
}

fn serialize_heating<S>(_: &bool, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str("success")
}

impl TelemetryRecord {
    /// Merges one decoded delta; later values replace earlier ones.
    pub fn merge(&mut self, delta: TelemetryDelta) {
        match delta {
            TelemetryDelta::Empty => {}
            TelemetryDelta::PackInfo(pack) => self.pack = Some(pack),
            TelemetryDelta::CellVoltages(cells) => self.cells = Some(cells),
            TelemetryDelta::HeatingAcknowledged => self.heating_acknowledged = true,
            TelemetryDelta::StartVoltage(volts) => self.start_voltage = Some(volts),
        }
    }

    /// Returns whether no response has contributed to this record.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pack.is_none()
            && self.cells.is_none()
            && !self.heating_acknowledged
            && self.start_voltage.is_none()
    }

    #[must_use]
    pub fn pack(&self) -> Option<&PackInfo> {
        self.pack.as_ref()
    }

    #[must_use]
    pub fn cells(&self) -> Option<&CellVoltages> {
        self.cells.as_ref()
    }

    #[must_use]
    pub fn heating_acknowledged(&self) -> bool {
        self.heating_acknowledged
    }

    #[must_use]
    pub fn start_voltage(&self) -> Option<f64> {
        self.start_voltage
    }
}

/// Aggregated telemetry for one scheduling round, keyed by device.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    collected_at: OffsetDateTime,
    devices: BTreeMap<DeviceIdentity, TelemetryRecord>,
}

impl SessionReport {
    /// Creates an empty report stamped with `collected_at`.
    #[must_use]
    pub fn new(collected_at: OffsetDateTime) -> Self {
        Self {
            collected_at,
            devices: BTreeMap::new(),
        }
    }

    /// Adds or replaces one device's record.
    pub fn insert(&mut self, identity: DeviceIdentity, record: TelemetryRecord) {
        self.devices.insert(identity, record);
    }

    #[must_use]
    pub fn collected_at(&self) -> OffsetDateTime {
        self.collected_at
    }

    #[must_use]
    pub fn get(&self, identity: &DeviceIdentity) -> Option<&TelemetryRecord> {
        self.devices.get(identity)
    }

    /// Iterates devices in address order.
    pub fn devices(&self) -> impl Iterator<Item = (&DeviceIdentity, &TelemetryRecord)> {
        self.devices.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[derive(Serialize)]
struct DeviceEntry<'a> {
    name: &'a str,
    #[serde(flatten)]
    record: &'a TelemetryRecord,
}

struct DeviceMap<'a>(&'a BTreeMap<DeviceIdentity, TelemetryRecord>);

impl Serialize for DeviceMap<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (identity, record) in self.0 {
            map.serialize_entry(
                identity.address(),
                &DeviceEntry {
                    name: identity.name(),
                    record,
                },
            )?;
        }
        map.end()
    }
}

impl Serialize for SessionReport {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let collected_at = self
            .collected_at
            .format(&time::format_description::well_known::Rfc3339)
            .map_err(serde::ser::Error::custom)?;
        let mut state = serializer.serialize_struct("SessionReport", 2)?;
        state.serialize_field("collected_at", &collected_at)?;
        state.serialize_field("devices", &DeviceMap(&self.devices))?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;
    use time::macros::datetime;

    use super::*;

    fn pack_info() -> PackInfo {
        PackInfo {
            total_voltage: 24.0,
            current: -1.0,
            remaining_capacity: 52.3,
            nominal_capacity: 100.0,
            cycle_count: 17,
            manufacture_date: ManufactureDate::from_packed(0x2E8E),
            balance_status: [0x00, 0x00, 0x00, 0x03],
            protection: ProtectionStatus::from_raw(0b101),
            firmware_version: 2.3,
            state_of_charge: 52,
            charge_mosfet: true,
            discharge_mosfet: false,
            string_count: 8,
            temperature_sensor_count: 2,
            temperatures: vec![9.5, 21.04],
        }
    }

    #[rstest]
    #[case(0x2E8E, 2023, 4, 14)]
    #[case(0x0021, 2000, 1, 1)]
    #[case(0xFFFF, 2127, 15, 31)]
    fn manufacture_date_unpacks_bit_fields(
        #[case] packed: u16,
        #[case] year: u16,
        #[case] month: u8,
        #[case] day: u8,
    ) {
        let date = ManufactureDate::from_packed(packed);
        assert_eq!((year, month, day), (date.year(), date.month(), date.day()));
    }

    #[test]
    fn impossible_manufacture_date_has_no_calendar_date() {
        assert_eq!(None, ManufactureDate::from_packed(0x0000).to_date());
        assert_eq!(
            Some(time::macros::date!(2023 - 04 - 14)),
            ManufactureDate::from_packed(0x2E8E).to_date()
        );
    }

    #[test]
    fn protection_status_exposes_individual_bits() {
        let status = ProtectionStatus::from_raw(0x2401);

        assert!(status.is_set(ProtectionFlags::CELL_OVERVOLTAGE));
        assert!(status.is_set(ProtectionFlags::SHORT_CIRCUIT));
        assert!(!status.is_set(ProtectionFlags::PACK_UNDERVOLTAGE));
        assert_eq!(0x2401, status.raw());
        assert_eq!(vec!["cell_overvoltage", "short_circuit"], status.active_names());
        assert_eq!("0010010000000001", status.to_string());
    }

    #[test]
    fn later_deltas_overwrite_earlier_fields() {
        let mut record = TelemetryRecord::default();
        assert!(record.is_empty());

        record.merge(TelemetryDelta::CellVoltages(CellVoltages::from_millivolts(&[
            3300, 3310,
        ])));
        record.merge(TelemetryDelta::CellVoltages(CellVoltages::from_millivolts(&[
            3400, 3408,
        ])));
        record.merge(TelemetryDelta::Empty);

        assert!(!record.is_empty());
        assert_eq!(Some(&[3.4, 3.408][..]), record.cells().map(CellVoltages::volts));
        assert_eq!(None, record.pack());
    }

    #[test]
    fn cell_spread_is_max_minus_min() {
        let cells = CellVoltages::from_millivolts(&[3400, 3408, 3398]);
        let spread = cells.spread().unwrap_or_default();
        assert!((spread - 0.010).abs() < 1e-9);
        assert_eq!(None, CellVoltages::from_millivolts(&[]).spread());
    }

    #[test]
    fn report_serializes_devices_keyed_by_address() {
        let mut record = TelemetryRecord::default();
        record.merge(TelemetryDelta::PackInfo(pack_info()));
        record.merge(TelemetryDelta::CellVoltages(CellVoltages::from_millivolts(&[
            3400, 3408,
        ])));
        record.merge(TelemetryDelta::HeatingAcknowledged);
        record.merge(TelemetryDelta::StartVoltage(3.35));

        let mut report = SessionReport::new(datetime!(2026-03-01 12:00:00 UTC));
        report.insert(DeviceIdentity::new("AA:BB:CC:00:00:01", "xiaoxiang-1"), record);

        let value = serde_json::to_value(&report).unwrap();

        assert_eq!(
            json!({
                "collected_at": "2026-03-01T12:00:00Z",
                "devices": {
                    "AA:BB:CC:00:00:01": {
                        "name": "xiaoxiang-1",
                        "total_volts": 24.0,
                        "current": -1.0,
                        "remaining_capacity": 52.3,
                        "nominal_capacity": 100.0,
                        "total_cycles": 17,
                        "production_date": "2023/04/14",
                        "balance_status": [0, 0, 0, 3],
                        "protection_status": "0000000000000101",
                        "protection_flags": ["cell_overvoltage", "pack_overvoltage"],
                        "software_version": 2.3,
                        "remaining_soc": 52,
                        "mosfet_state_charge": "ON",
                        "mosfet_state_discharge": "OFF",
                        "number_of_battery_strings": 8,
                        "num_temp_sensors": 2,
                        "temp_sensors": [9.5, 21.0],
                        "number_of_cells": 2,
                        "cell_voltages": [3.4, 3.408],
                        "heating_command": "success",
                        "start_voltage": 3.35
                    }
                }
            }),
            value
        );
    }

    #[test]
    fn report_orders_devices_by_address() {
        let mut report = SessionReport::new(datetime!(2026-03-01 12:00:00 UTC));
        report.insert(DeviceIdentity::new("BB", "second"), TelemetryRecord::default());
        report.insert(DeviceIdentity::new("AA", "first"), TelemetryRecord::default());

        let names: Vec<&str> = report.devices().map(|(id, _)| id.name()).collect();
        assert_eq!(vec!["first", "second"], names);
        assert_eq!(2, report.len());
    }
}
