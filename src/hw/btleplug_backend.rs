use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_stream::StreamExt;
use tracing::{debug, info, instrument, trace, warn};

use super::hardware::{NOTIFICATION_CHANNEL_CAPACITY, Transport};
use super::model::{FoundDevice, matches_name_filter};
use crate::error::InteractionError;
use crate::protocol::{self, EndpointId};
use crate::utils::format_hex;

/// Hardware backend backed by `btleplug`.
#[derive(Debug)]
pub(crate) struct BtleplugBackend {
    manager: Manager,
}

impl BtleplugBackend {
    /// Creates the real BLE backend.
    pub(crate) async fn new() -> Result<Self, InteractionError> {
        let manager = Manager::new().await?;
        Ok(Self { manager })
    }

    #[instrument(skip(self), level = "trace")]
    async fn adapters(&self) -> Result<Vec<AdapterHandle>, InteractionError> {
        let adapters = self.manager.adapters().await?;
        if adapters.is_empty() {
            return Err(InteractionError::NoAdapters);
        }

        let mut handles = Vec::with_capacity(adapters.len());
        for adapter in adapters {
            let name = adapter.adapter_info().await?;
            handles.push(AdapterHandle { adapter, name });
        }
        Ok(handles)
    }

    /// Scans every adapter for `scan_window` and collects matching peripherals.
    #[instrument(skip(self), level = "debug", fields(filter = name_filter, ?scan_window))]
    pub(crate) async fn discover(
        &self,
        name_filter: &str,
        scan_window: Duration,
    ) -> Result<Vec<FoundDevice>, InteractionError> {
        let adapters = self.adapters().await?;
        info!(adapter_count = adapters.len(), "starting BLE scan");

        for handle in &adapters {
            handle.adapter.start_scan(ScanFilter::default()).await?;
        }
        sleep(scan_window).await;
        for handle in &adapters {
            if let Err(error) = handle.adapter.stop_scan().await {
                debug!(?error, "failed to stop adapter scan cleanly");
            }
        }

        let mut found = Vec::new();
        for handle in &adapters {
            for peripheral in handle.adapter.peripherals().await? {
                let Some(properties) = peripheral.properties().await? else {
                    continue;
                };
                if !matches_name_filter(properties.local_name.as_deref(), name_filter) {
                    continue;
                }
                let device_id = peripheral.id().to_string();
                if found
                    .iter()
                    .any(|device: &FoundDevice| device.device_id() == device_id)
                {
                    continue;
                }
                trace!(device_id, rssi = ?properties.rssi, "matched peripheral");
                found.push(FoundDevice::new(
                    handle.name.clone(),
                    device_id,
                    properties.address.to_string(),
                    properties.local_name,
                    properties.rssi,
                ));
            }
        }
        Ok(found)
    }

    async fn find_peripheral(&self, device: &FoundDevice) -> Result<Peripheral, InteractionError> {
        for handle in self.adapters().await? {
            for peripheral in handle.adapter.peripherals().await? {
                if peripheral.id().to_string() == device.device_id() {
                    return Ok(peripheral);
                }
            }
        }
        Err(InteractionError::DeviceNotFound {
            device: device.address().to_string(),
        })
    }

    /// Connects to a discovered device and resolves the BMS endpoints.
    #[instrument(skip(self), level = "debug", fields(device = %device.address()))]
    pub(crate) async fn connect(
        &self,
        device: &FoundDevice,
    ) -> Result<BtleplugTransport, InteractionError> {
        let peripheral = self.find_peripheral(device).await?;
        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }
        peripheral.discover_services().await?;

        let characteristics = characteristics_by_uuid(&peripheral);
        let endpoint = |id: EndpointId| {
            characteristics
                .get(protocol::endpoint_metadata(id).uuid())
                .cloned()
                .ok_or_else(|| InteractionError::MissingEndpoint {
                    device: device.address().to_string(),
                    endpoint: id,
                })
        };
        let resolved = endpoint(EndpointId::WriteCharacteristic)
            .and_then(|write| Ok((write, endpoint(EndpointId::NotifyCharacteristic)?)));
        let (write_characteristic, notify_characteristic) = match resolved {
            Ok(pair) => pair,
            Err(error) => {
                if let Err(disconnect_error) = peripheral.disconnect().await {
                    debug!(
                        ?disconnect_error,
                        "failed to disconnect after endpoint validation error"
                    );
                }
                return Err(error);
            }
        };

        info!("connected to BMS peripheral");
        Ok(BtleplugTransport {
            device: device.clone(),
            write_type: write_type_for_characteristic(write_characteristic.properties),
            peripheral,
            write_characteristic,
            notify_characteristic,
            forwarder: None,
        })
    }
}

#[derive(Debug)]
struct AdapterHandle {
    adapter: Adapter,
    name: String,
}

/// Active link bound to a real peripheral.
#[derive(Debug)]
pub(crate) struct BtleplugTransport {
    device: FoundDevice,
    peripheral: Peripheral,
    write_characteristic: Characteristic,
    notify_characteristic: Characteristic,
    write_type: WriteType,
    forwarder: Option<JoinHandle<()>>,
}

#[async_trait]
impl Transport for BtleplugTransport {
    fn device(&self) -> &FoundDevice {
        &self.device
    }

    #[instrument(skip(self, payload), level = "trace", fields(payload = %format_hex(payload)))]
    async fn write(&mut self, payload: &[u8]) -> Result<(), InteractionError> {
        self.peripheral
            .write(&self.write_characteristic, payload, self.write_type)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug", fields(device = %self.device.address()))]
    async fn subscribe(&mut self) -> Result<mpsc::Receiver<Vec<u8>>, InteractionError> {
        let mut notifications = self.peripheral.notifications().await?;
        self.peripheral.subscribe(&self.notify_characteristic).await?;

        let expected_uuid = self.notify_characteristic.uuid;
        let (sender, receiver) = mpsc::channel(NOTIFICATION_CHANNEL_CAPACITY);
        let forwarder = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != expected_uuid {
                    continue;
                }
                if sender.send(notification.value).await.is_err() {
                    break;
                }
            }
            trace!("notification stream closed");
        });
        if let Some(previous) = self.forwarder.replace(forwarder) {
            previous.abort();
        }
        Ok(receiver)
    }

    async fn is_connected(&self) -> bool {
        match self.peripheral.is_connected().await {
            Ok(connected) => connected,
            Err(error) => {
                warn!(?error, "connection state query failed");
                false
            }
        }
    }

    #[instrument(skip(self), level = "debug", fields(device = %self.device.address()))]
    async fn disconnect(&mut self) -> Result<(), InteractionError> {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        if self.peripheral.is_connected().await? {
            if let Err(error) = self.peripheral.unsubscribe(&self.notify_characteristic).await {
                debug!(?error, "failed to unsubscribe before disconnect");
            }
            self.peripheral.disconnect().await?;
        }
        Ok(())
    }
}

fn characteristics_by_uuid(peripheral: &Peripheral) -> HashMap<String, Characteristic> {
    let mut characteristics = HashMap::new();
    for service in peripheral.services() {
        for characteristic in service.characteristics {
            characteristics
                .entry(characteristic.uuid.to_string().to_lowercase())
                .or_insert(characteristic);
        }
    }
    characteristics
}

fn write_type_for_characteristic(properties: CharPropFlags) -> WriteType {
    if properties.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE)
        && !properties.contains(CharPropFlags::WRITE)
    {
        WriteType::WithoutResponse
    } else {
        WriteType::WithResponse
    }
}
