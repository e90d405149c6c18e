use derive_more::From;
use thiserror::Error;

use crate::protocol::{EndpointId, endpoint_metadata};

/// Frame-level failures. None of these end a session; the round they
/// occur in is abandoned and reassembly starts over.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum FrameError {
    #[error("response chunk did not start with 0xDD (found {found:#04x})")]
    MissingStartMarker { found: u8 },
    #[error("device reported failure status {status:#04x} for command {command:#04x}")]
    DeviceReportedFailure { command: u8, status: u8 },
    #[error("reassembly overflow: {received} bytes accumulated for a frame declaring {declared}")]
    ReassemblyOverflow { received: usize, declared: usize },
    #[error("checksum mismatch: received {received:#06x}, computed {computed:#06x}")]
    ChecksumMismatch { received: u16, computed: u16 },
    #[error("frame is truncated: needed {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },
    #[error("payload of command {command:#04x} is too short: needed {needed} bytes, got {actual}")]
    PayloadTooShort {
        command: u8,
        needed: usize,
        actual: usize,
    },
}

/// Errors returned by discovery and transport operations.
#[derive(Debug, Error)]
pub enum InteractionError {
    #[error("BLE operation failed")]
    Ble(#[from] btleplug::Error),
    #[error("no BLE adapters were found")]
    NoAdapters,
    #[error(
        "required endpoint `{name}` ({uuid}) was not found on device {device}",
        name = endpoint_metadata(*endpoint).name(),
        uuid = endpoint_metadata(*endpoint).uuid()
    )]
    MissingEndpoint { device: String, endpoint: EndpointId },
    #[error("device {device} is no longer available")]
    DeviceNotFound { device: String },
    #[error("device {device} disconnected")]
    TransportDisconnected { device: String },
    #[error("failed while waiting for Ctrl+C")]
    CtrlC { source: std::io::Error },
    #[error(transparent)]
    Fixture(#[from] FixtureError),
}

/// Errors returned when parsing fake backend fixtures.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("the fake discovery fixture is empty")]
    EmptyFixture,
    #[error("fixture records must contain four or five pipe-delimited fields")]
    InvalidRecordFieldCount,
    #[error("fixture records cannot contain empty mandatory fields")]
    EmptyRecordField,
    #[error("failed to parse numeric fixture value")]
    InvalidNumber(#[from] std::num::ParseIntError),
    #[error("unknown fake device behaviour `{value}`")]
    UnknownBehaviour { value: String },
    #[error("hex payload is invalid")]
    InvalidHex(#[from] hex::FromHexError),
}

/// Errors returned while handing a report to the delivery collaborator.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("report delivery transport failed")]
    Transport(#[from] Box<ureq::Transport>),
    #[error("failed to encode report")]
    Encode(#[from] serde_json::Error),
    #[error("failed to decode delivery response body")]
    Decode { source: std::io::Error },
    #[error("delivery task did not complete")]
    TaskJoin(#[from] tokio::task::JoinError),
}

/// Errors returned when validating runtime configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing fake scan fixture while fake mode is enabled")]
    MissingFakeScanFixture,
    #[error("ticks per session must be at least 1")]
    ZeroTicks,
    #[error("failed to read delivery token from `{path}`")]
    TokenFile {
        path: String,
        source: std::io::Error,
    },
    #[error("no platform configuration directory is available for the default token path")]
    NoConfigDir,
}

/// Errors returned by telemetry initialisation.
#[derive(Debug, Error)]
pub(crate) enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Top-level protocol errors wrapping module-specific error types.
#[derive(Debug, Error, From)]
pub enum ProtocolError {
    #[error(transparent)]
    #[from(FrameError, Box<FrameError>)]
    Frame(Box<FrameError>),
    #[error(transparent)]
    #[from(InteractionError, Box<InteractionError>)]
    Interaction(Box<InteractionError>),
    #[error(transparent)]
    #[from(DeliveryError, Box<DeliveryError>)]
    Delivery(Box<DeliveryError>),
}
