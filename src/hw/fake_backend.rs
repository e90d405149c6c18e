use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

use super::hardware::{NOTIFICATION_CHANNEL_CAPACITY, Transport};
use super::model::FoundDevice;
use crate::codec::Frame;
use crate::error::{FixtureError, InteractionError};
use crate::protocol::{BmsCommand, REGISTER_START_VOLTAGE};

/// Default notification size, matching the 20-byte payload of a default BLE MTU.
pub(crate) const DEFAULT_CHUNK_SIZE: usize = 20;

const DEVICE_ERROR_STATUS: u8 = 0x80;

// 24.00 V, -1.00 A, 52.30/100.00 Ah, 17 cycles, 2023/04/14, 52 %, 4S, two sensors.
const PACK_INFO_PAYLOAD: [u8; 27] = [
    0x09, 0x60, 0xFF, 0x9C, 0x14, 0x6E, 0x27, 0x10, 0x00, 0x11, 0x2E, 0x8E, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x17, 0x34, 0x03, 0x04, 0x02, 0x0B, 0x0A, 0x0B, 0xA5,
];
const CELL_VOLTAGES_PAYLOAD: [u8; 8] = [0x0D, 0x48, 0x0D, 0x50, 0x0D, 0x4C, 0x0D, 0x46];
const START_VOLTAGE_PAYLOAD: [u8; 2] = [0x0D, 0x16];

/// How a simulated device answers requests.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, derive_more::Display)]
pub enum DeviceBehaviour {
    /// Answers every request with a valid frame.
    #[default]
    #[display("healthy")]
    Healthy,
    /// Answers `n` requests, then drops the link after the next write.
    #[display("disconnect-after={_0}")]
    DisconnectAfter(usize),
    /// Answers with frames whose checksum is wrong.
    #[display("corrupt-checksum")]
    CorruptChecksum,
    /// Answers with a nonzero status byte.
    #[display("device-error")]
    DeviceError,
    /// Accepts writes and never answers.
    #[display("silent")]
    Silent,
}

impl FromStr for DeviceBehaviour {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "healthy" => Ok(Self::Healthy),
            "corrupt-checksum" => Ok(Self::CorruptChecksum),
            "device-error" => Ok(Self::DeviceError),
            "silent" => Ok(Self::Silent),
            other => match other.strip_prefix("disconnect-after=") {
                Some(count) => Ok(Self::DisconnectAfter(count.parse()?)),
                None => Err(FixtureError::UnknownBehaviour {
                    value: other.to_string(),
                }),
            },
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
struct FakeDevice {
    found: FoundDevice,
    behaviour: DeviceBehaviour,
}

/// Parsed fake scan fixture records.
#[derive(Debug, Clone)]
pub(crate) struct ScanFixture {
    devices: Vec<FakeDevice>,
}

impl FromStr for ScanFixture {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let devices = parse_scan_fixture(value)?;
        Ok(Self { devices })
    }
}

/// Settings for constructing a fake hardware backend.
#[derive(Debug, Builder)]
pub(crate) struct FakeBackendConfig {
    scan_fixture: ScanFixture,
    #[builder(default)]
    discovery_delay: Duration,
    #[builder(default = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,
}

/// Fake backend used in tests and non-hardware environments.
#[derive(Debug)]
pub(crate) struct FakeBackend {
    devices: Vec<FakeDevice>,
    discovery_delay: Duration,
    chunk_size: usize,
}

impl FakeBackend {
    /// Creates a fake backend from explicit settings.
    pub(crate) fn new(config: FakeBackendConfig) -> Self {
        Self {
            devices: config.scan_fixture.devices,
            discovery_delay: config.discovery_delay,
            chunk_size: config.chunk_size.max(1),
        }
    }

    /// Returns fixture devices whose name matches the filter.
    pub(crate) async fn discover(&self, name_filter: &str) -> Vec<FoundDevice> {
        if !self.discovery_delay.is_zero() {
            sleep(self.discovery_delay).await;
        }

        self.devices
            .iter()
            .filter(|device| device.found.local_name_matches(name_filter))
            .map(|device| device.found.clone())
            .collect()
    }

    /// Opens a simulated link to a fixture device.
    pub(crate) fn connect(&self, device: &FoundDevice) -> Result<FakeTransport, InteractionError> {
        let fake = self
            .devices
            .iter()
            .find(|candidate| candidate.found.device_id() == device.device_id())
            .ok_or_else(|| InteractionError::DeviceNotFound {
                device: device.device_id().to_string(),
            })?;

        Ok(FakeTransport {
            device: fake.found.clone(),
            behaviour: fake.behaviour,
            chunk_size: self.chunk_size,
            responder: None,
            answered: 0,
            connected: true,
        })
    }
}

/// Simulated JBD device link.
#[derive(Debug)]
pub(crate) struct FakeTransport {
    device: FoundDevice,
    behaviour: DeviceBehaviour,
    chunk_size: usize,
    responder: Option<mpsc::Sender<Vec<u8>>>,
    answered: usize,
    connected: bool,
}

impl FakeTransport {
    fn response_for(&self, command: BmsCommand) -> Option<Vec<u8>> {
        let code = command.response_command();
        let payload: &[u8] = match command {
            BmsCommand::PackInfo => &PACK_INFO_PAYLOAD,
            BmsCommand::CellVoltages => &CELL_VOLTAGES_PAYLOAD,
            BmsCommand::ReadRegister(REGISTER_START_VOLTAGE) => &START_VOLTAGE_PAYLOAD,
            BmsCommand::ReadRegister(_) => &[0x00, 0x00],
        };

        match self.behaviour {
            DeviceBehaviour::Silent => None,
            DeviceBehaviour::DeviceError => Some(
                Frame::encode_response(code, DEVICE_ERROR_STATUS, &[]).into_bytes(),
            ),
            DeviceBehaviour::CorruptChecksum => {
                let mut bytes = Frame::encode_response(code, 0x00, payload).into_bytes();
                let checksum_low = bytes.len() - 2;
                bytes[checksum_low] ^= 0xFF;
                Some(bytes)
            }
            DeviceBehaviour::Healthy | DeviceBehaviour::DisconnectAfter(_) => {
                Some(Frame::encode_response(code, 0x00, payload).into_bytes())
            }
        }
    }

    fn drop_link(&mut self) {
        self.connected = false;
        self.responder = None;
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn device(&self) -> &FoundDevice {
        &self.device
    }

    #[instrument(skip(self, payload), level = "trace", fields(device = %self.device.address(), payload_len = payload.len()))]
    async fn write(&mut self, payload: &[u8]) -> Result<(), InteractionError> {
        if !self.connected {
            return Err(InteractionError::TransportDisconnected {
                device: self.device.address().to_string(),
            });
        }

        if let DeviceBehaviour::DisconnectAfter(limit) = self.behaviour
            && self.answered >= limit
        {
            debug!(limit, "fake device dropping link");
            self.drop_link();
            return Ok(());
        }

        let Some(command) = BmsCommand::from_request_frame(payload) else {
            debug!("fake device ignoring unrecognised request");
            return Ok(());
        };
        let Some(response) = self.response_for(command) else {
            return Ok(());
        };
        self.answered += 1;

        let Some(responder) = &self.responder else {
            return Ok(());
        };
        for chunk in response.chunks(self.chunk_size) {
            if let Err(error) = responder.try_send(chunk.to_vec()) {
                warn!(%error, "fake device dropped a notification");
            }
        }
        Ok(())
    }

    async fn subscribe(&mut self) -> Result<mpsc::Receiver<Vec<u8>>, InteractionError> {
        if !self.connected {
            return Err(InteractionError::TransportDisconnected {
                device: self.device.address().to_string(),
            });
        }
        let (sender, receiver) = mpsc::channel(NOTIFICATION_CHANNEL_CAPACITY);
        self.responder = Some(sender);
        Ok(receiver)
    }

    async fn is_connected(&self) -> bool {
        self.connected
    }

    async fn disconnect(&mut self) -> Result<(), InteractionError> {
        self.drop_link();
        Ok(())
    }
}

fn parse_scan_fixture(raw_fixture: &str) -> Result<Vec<FakeDevice>, FixtureError> {
    if raw_fixture.trim().is_empty() {
        return Err(FixtureError::EmptyFixture);
    }

    raw_fixture
        .split(';')
        .map(parse_scan_record)
        .collect::<Result<Vec<_>, _>>()
}

fn parse_scan_record(raw_record: &str) -> Result<FakeDevice, FixtureError> {
    let fields: Vec<&str> = raw_record.split('|').map(str::trim).collect();
    if !(4..=5).contains(&fields.len()) {
        return Err(FixtureError::InvalidRecordFieldCount);
    }
    if fields.iter().any(|field| field.is_empty()) {
        return Err(FixtureError::EmptyRecordField);
    }

    let local_name = if fields[2] == "-" {
        None
    } else {
        Some(fields[2].to_string())
    };
    let rssi = if fields[3] == "-" {
        None
    } else {
        Some(fields[3].parse::<i16>()?)
    };
    let behaviour = match fields.get(4) {
        Some(raw) => raw.parse()?,
        None => DeviceBehaviour::default(),
    };

    Ok(FakeDevice {
        found: FoundDevice::new(
            fields[0].to_string(),
            fields[1].to_string(),
            fields[1].to_string(),
            local_name,
            rssi,
        ),
        behaviour,
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::codec::{FrameOutcome, FrameReassembler};

    fn backend(fixture: &str, chunk_size: usize) -> FakeBackend {
        FakeBackend::new(
            FakeBackendConfig::builder()
                .scan_fixture(fixture.parse().expect("fixture should parse"))
                .chunk_size(chunk_size)
                .build(),
        )
    }

    #[rstest]
    #[case("hci0|AA:BB|xiaoxiang-1|-43", 1)]
    #[case("hci0|AA:BB|xiaoxiang-1|-43;hci1|CC:DD|Speaker|-55|silent", 2)]
    fn parse_scan_fixture_parses_records(#[case] fixture: &str, #[case] expected_count: usize) {
        let devices = parse_scan_fixture(fixture).expect("fixture should parse");
        assert_eq!(expected_count, devices.len());
    }

    #[test]
    fn parse_scan_fixture_rejects_invalid_field_count() {
        let result = parse_scan_fixture("hci0|AA:BB|xiaoxiang");
        assert_matches!(result, Err(FixtureError::InvalidRecordFieldCount));
    }

    #[rstest]
    #[case("healthy", DeviceBehaviour::Healthy)]
    #[case("disconnect-after=2", DeviceBehaviour::DisconnectAfter(2))]
    #[case("corrupt-checksum", DeviceBehaviour::CorruptChecksum)]
    #[case("device-error", DeviceBehaviour::DeviceError)]
    #[case("silent", DeviceBehaviour::Silent)]
    fn behaviour_parses_and_displays(#[case] raw: &str, #[case] expected: DeviceBehaviour) {
        let parsed: DeviceBehaviour = raw.parse().expect("behaviour should parse");
        assert_eq!(expected, parsed);
        assert_eq!(raw, parsed.to_string());
    }

    #[test]
    fn unknown_behaviour_is_rejected() {
        assert_matches!(
            "flaky".parse::<DeviceBehaviour>(),
            Err(FixtureError::UnknownBehaviour { value }) if value == "flaky"
        );
    }

    #[tokio::test]
    async fn discover_filters_by_name_substring() {
        let backend = backend(
            "hci0|AA:01|xiaoxiang-1|-43;hci0|AA:02|Speaker|-50;hci0|AA:03|XIAOXIANG-2|-60",
            DEFAULT_CHUNK_SIZE,
        );

        let found = backend.discover("xiaoxi").await;

        let addresses: Vec<&str> = found.iter().map(FoundDevice::address).collect();
        assert_eq!(vec!["AA:01", "AA:03"], addresses);
    }

    #[tokio::test]
    async fn healthy_device_answers_with_chunked_valid_frame() -> anyhow::Result<()> {
        let backend = backend("hci0|AA:01|xiaoxiang-1|-43", 20);
        let device = backend.discover("xiaoxi").await.remove(0);
        let mut transport = backend.connect(&device)?;
        let mut notifications = transport.subscribe().await?;

        transport
            .write(&BmsCommand::PackInfo.request_frame())
            .await?;

        let mut reassembler = FrameReassembler::new();
        let first = notifications.recv().await.unwrap_or_default();
        assert_eq!(20, first.len());
        assert_eq!(FrameOutcome::Incomplete, reassembler.feed(&first));
        let second = notifications.recv().await.unwrap_or_default();
        assert_matches!(reassembler.feed(&second), FrameOutcome::Complete(frame) if frame.command() == 0x03);
        Ok(())
    }

    #[tokio::test]
    async fn disconnect_after_closes_notification_channel() -> anyhow::Result<()> {
        let backend = backend("hci0|AA:01|xiaoxiang-1|-43|disconnect-after=1", 64);
        let device = backend.discover("").await.remove(0);
        let mut transport = backend.connect(&device)?;
        let mut notifications = transport.subscribe().await?;

        transport
            .write(&BmsCommand::CellVoltages.request_frame())
            .await?;
        assert!(notifications.recv().await.is_some());

        transport
            .write(&BmsCommand::CellVoltages.request_frame())
            .await?;
        assert_eq!(None, notifications.recv().await);
        assert!(!transport.is_connected().await);
        assert_matches!(
            transport.write(&BmsCommand::PackInfo.request_frame()).await,
            Err(InteractionError::TransportDisconnected { .. })
        );
        Ok(())
    }

    #[tokio::test]
    async fn connect_rejects_unknown_device() {
        let backend = backend("hci0|AA:01|xiaoxiang-1|-43", DEFAULT_CHUNK_SIZE);
        let stranger = FoundDevice::new(
            "hci0".into(),
            "FF:FF".into(),
            "FF:FF".into(),
            Some("xiaoxiang-9".into()),
            None,
        );

        assert_matches!(
            backend.connect(&stranger),
            Err(InteractionError::DeviceNotFound { device }) if device == "FF:FF"
        );
    }
}
