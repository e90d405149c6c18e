use std::fmt::{self, Display, Formatter};

use crate::acquisition::SessionSummary;
use crate::record::{CellVoltages, PackInfo, SessionReport, TelemetryRecord};
use crate::utils::format_hex;

use super::painter::{Painter, Tone};
use super::table::Table;

/// Renders one device's aggregate record as a field table.
pub(crate) struct RecordView<'a> {
    record: &'a TelemetryRecord,
    painter: Painter,
}

impl<'a> RecordView<'a> {
    pub(crate) fn new(record: &'a TelemetryRecord, painter: Painter) -> Self {
        Self { record, painter }
    }

    fn pack_fields(&self, pack: &PackInfo, fields: &mut Vec<(&'static str, String)>) {
        let painter = self.painter;
        let direction = if pack.current > 0.0 {
            "charging"
        } else if pack.current < 0.0 {
            "discharging"
        } else {
            "idle"
        };
        let protection = pack.protection.active_names();
        let protection = if protection.is_empty() {
            painter.status(true, "none")
        } else {
            painter.status(false, protection.join(", "))
        };
        let temperatures = pack
            .temperatures
            .iter()
            .map(|celsius| format!("{celsius:.1} °C"))
            .collect::<Vec<_>>()
            .join(", ");

        fields.extend([
            ("total voltage", painter.paint(Tone::Value, format!("{:.2} V", pack.total_voltage))),
            ("current", format!("{:.2} A ({direction})", pack.current)),
            (
                "capacity",
                format!("{:.2} / {:.2} Ah", pack.remaining_capacity, pack.nominal_capacity),
            ),
            ("state of charge", painter.paint(Tone::Value, format!("{} %", pack.state_of_charge))),
            ("cycles", pack.cycle_count.to_string()),
            ("production date", pack.manufacture_date.to_string()),
            ("firmware", format!("{:.1}", pack.firmware_version)),
            ("charge mosfet", on_off(painter, pack.charge_mosfet)),
            ("discharge mosfet", on_off(painter, pack.discharge_mosfet)),
            ("strings", pack.string_count.to_string()),
            ("temperatures", if temperatures.is_empty() { "-".to_string() } else { temperatures }),
            ("balance", format_hex(&pack.balance_status)),
            ("protection", protection),
        ]);
    }

    fn cell_fields(cells: &CellVoltages, fields: &mut Vec<(&'static str, String)>) {
        let volts = cells
            .volts()
            .iter()
            .map(|volts| format!("{volts:.3}"))
            .collect::<Vec<_>>()
            .join(" ");
        fields.push(("cells", format!("{} [{volts}] V", cells.cell_count())));
        if let Some(spread) = cells.spread() {
            fields.push(("cell spread", format!("{spread:.3} V")));
        }
    }
}

fn on_off(painter: Painter, enabled: bool) -> String {
    painter.status(enabled, if enabled { "ON" } else { "OFF" })
}

impl Display for RecordView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.record.is_empty() {
            return write!(f, "{}", self.painter.paint(Tone::Muted, "no telemetry"));
        }

        let mut fields = Vec::new();
        if let Some(pack) = self.record.pack() {
            self.pack_fields(pack, &mut fields);
        }
        if let Some(cells) = self.record.cells() {
            Self::cell_fields(cells, &mut fields);
        }
        if let Some(volts) = self.record.start_voltage() {
            fields.push(("start voltage", format!("{volts:.3} V")));
        }
        if self.record.heating_acknowledged() {
            fields.push(("heating", self.painter.status(true, "acknowledged")));
        }
        write!(f, "{}", Table::fields(self.painter, fields))
    }
}

/// Renders a round: the report per device followed by session outcomes.
pub(crate) struct ReportView<'a> {
    report: &'a SessionReport,
    sessions: &'a [SessionSummary],
    painter: Painter,
}

impl<'a> ReportView<'a> {
    pub(crate) fn new(
        report: &'a SessionReport,
        sessions: &'a [SessionSummary],
        painter: Painter,
    ) -> Self {
        Self {
            report,
            sessions,
            painter,
        }
    }
}

impl Display for ReportView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let stamp = self
            .report
            .collected_at()
            .format(&time::format_description::well_known::Rfc3339)
            .map_err(|_error| fmt::Error)?;
        writeln!(
            f,
            "{} {}",
            self.painter.paint(Tone::Heading, "Report"),
            self.painter.paint(Tone::Muted, stamp)
        )?;

        for (identity, record) in self.report.devices() {
            writeln!(f, "{}", self.painter.paint(Tone::Heading, identity.to_string()))?;
            writeln!(f, "{}", RecordView::new(record, self.painter))?;
        }

        let mut outcomes = Table::with_headers([
            "device",
            "ended",
            "requests",
            "completed",
            "frame errors",
            "timeouts",
        ]);
        for session in self.sessions {
            let stats = session.stats();
            let clean = stats.frame_errors == 0 && stats.timeouts == 0;
            outcomes.push([
                session.identity().to_string(),
                self.painter.status(clean, session.end().to_string()),
                stats.requests.to_string(),
                stats.completed.to_string(),
                stats.frame_errors.to_string(),
                stats.timeouts.to_string(),
            ]);
        }
        if outcomes.is_empty() {
            return Ok(());
        }
        write!(f, "{outcomes}")
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;
    use time::macros::datetime;

    use super::*;
    use crate::acquisition::{RoundStats, SessionEnd, SessionState};
    use crate::record::{DeviceIdentity, ManufactureDate, ProtectionStatus, TelemetryDelta};

    fn record() -> TelemetryRecord {
        let mut record = TelemetryRecord::default();
        record.merge(TelemetryDelta::PackInfo(PackInfo {
            total_voltage: 24.0,
            current: -1.0,
            remaining_capacity: 52.3,
            nominal_capacity: 100.0,
            cycle_count: 17,
            manufacture_date: ManufactureDate::from_packed(0x2E8E),
            balance_status: [0x00, 0x00, 0x00, 0x03],
            protection: ProtectionStatus::from_raw(0b1_0000_0000_0000),
            firmware_version: 2.3,
            state_of_charge: 52,
            charge_mosfet: true,
            discharge_mosfet: false,
            string_count: 4,
            temperature_sensor_count: 2,
            temperatures: vec![9.5, 25.0],
        }));
        record.merge(TelemetryDelta::CellVoltages(CellVoltages::from_millivolts(&[
            3400, 3408,
        ])));
        record
    }

    #[test]
    fn empty_record_is_marked() {
        let empty = TelemetryRecord::default();
        assert_snapshot!(RecordView::new(&empty, Painter::new(false)).to_string(), @"no telemetry");
    }

    #[test]
    fn record_view_formats_units_and_flags() {
        let record = record();
        let rendered = RecordView::new(&record, Painter::new(false)).to_string();

        for expected in [
            "24.00 V",
            "-1.00 A (discharging)",
            "52.30 / 100.00 Ah",
            "52 %",
            "2023/04/14",
            "9.5 °C, 25.0 °C",
            "00 00 00 03",
            "software_mosfet_lock",
            "2 [3.400 3.408] V",
            "0.008 V",
        ] {
            assert!(rendered.contains(expected), "missing `{expected}` in\n{rendered}");
        }
    }

    #[test]
    fn report_view_lists_devices_and_outcomes() {
        let identity = DeviceIdentity::new("AA:01", "xiaoxiang-1");
        let mut report = SessionReport::new(datetime!(2024-05-01 12:00 UTC));
        report.insert(identity.clone(), record());
        let sessions = [SessionSummary::new(
            identity,
            record(),
            SessionEnd::ReachedTickLimit,
            SessionState::Idle,
            RoundStats {
                requests: 6,
                completed: 5,
                frame_errors: 0,
                timeouts: 1,
            },
        )];

        let rendered = ReportView::new(&report, &sessions, Painter::new(false)).to_string();

        assert!(rendered.starts_with("Report 2024-05-01T12:00:00Z\n"));
        assert!(rendered.contains("xiaoxiang-1 (AA:01)"));
        assert!(rendered.contains("reached_tick_limit"));
    }
}
