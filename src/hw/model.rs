use serde::Serialize;

use crate::record::DeviceIdentity;

/// Name reported for devices that did not advertise one.
const UNKNOWN_NAME: &str = "<unknown>";

/// A discovered BLE peripheral that matched a scan predicate.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct FoundDevice {
    adapter_name: String,
    device_id: String,
    address: String,
    local_name: Option<String>,
    rssi: Option<i16>,
}

impl FoundDevice {
    /// Creates a new discovered-device record.
    pub(crate) fn new(
        adapter_name: String,
        device_id: String,
        address: String,
        local_name: Option<String>,
        rssi: Option<i16>,
    ) -> Self {
        Self {
            adapter_name,
            device_id,
            address,
            local_name,
            rssi,
        }
    }

    /// Returns the adapter name used to discover this device.
    #[must_use]
    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    /// Returns the backend-specific device identifier.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Returns the hardware address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns the advertised local name, if present.
    #[must_use]
    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    /// Returns the latest observed RSSI value, if present.
    #[must_use]
    pub fn rssi(&self) -> Option<i16> {
        self.rssi
    }

    /// Returns the aggregation key used in session reports.
    #[must_use]
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(
            self.address.clone(),
            self.local_name.as_deref().unwrap_or(UNKNOWN_NAME),
        )
    }

    /// Returns whether the local name contains `filter`, ignoring ASCII case.
    ///
    /// An empty filter matches every device, named or not.
    pub(crate) fn local_name_matches(&self, filter: &str) -> bool {
        matches_name_filter(self.local_name.as_deref(), filter)
    }
}

pub(crate) fn matches_name_filter(local_name: Option<&str>, filter: &str) -> bool {
    if filter.is_empty() {
        return true;
    }

    let filter = filter.to_ascii_lowercase();
    local_name.is_some_and(|name| name.to_ascii_lowercase().contains(&filter))
}
