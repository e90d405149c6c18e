use std::fmt::{self, Display, Formatter};

use crate::hw::FoundDevice;
use crate::utils::format_rssi;

use super::painter::{Painter, Tone};
use super::table::Table;

/// Renders discovered devices as one table row each.
pub(crate) struct DeviceListView<'a> {
    devices: &'a [FoundDevice],
    painter: Painter,
}

impl<'a> DeviceListView<'a> {
    pub(crate) fn new(devices: &'a [FoundDevice], painter: Painter) -> Self {
        Self { devices, painter }
    }
}

impl Display for DeviceListView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.devices.is_empty() {
            return write!(f, "{}", self.painter.paint(Tone::Warning, "No matching devices found"));
        }

        let mut table = Table::with_headers(["address", "name", "rssi", "adapter"]);
        for device in self.devices {
            table.push([
                self.painter.paint(Tone::Value, device.address()),
                device.identity().name().to_string(),
                format_rssi(device.rssi()),
                self.painter.paint(Tone::Muted, device.adapter_name()),
            ]);
        }
        writeln!(
            f,
            "{}",
            self.painter
                .paint(Tone::Heading, format!("{} device(s) found", self.devices.len()))
        )?;
        write!(f, "{table}")
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;

    use super::*;

    #[test]
    fn empty_scan_says_so() {
        let view = DeviceListView::new(&[], Painter::new(false));
        assert_snapshot!(view.to_string(), @"No matching devices found");
    }

    #[test]
    fn devices_render_with_placeholder_for_missing_fields() {
        let devices = [
            FoundDevice::new(
                "hci0".into(),
                "AA:01".into(),
                "AA:01".into(),
                Some("xiaoxiang-1".into()),
                Some(-61),
            ),
            FoundDevice::new("hci1".into(), "AA:02".into(), "AA:02".into(), None, None),
        ];

        let rendered = DeviceListView::new(&devices, Painter::new(false)).to_string();

        assert!(rendered.starts_with("2 device(s) found\n"));
        assert!(rendered.contains("xiaoxiang-1"));
        assert!(rendered.contains("-61 dBm"));
        assert!(rendered.contains("<unknown>"));
    }
}
