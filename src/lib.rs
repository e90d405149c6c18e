mod acquisition;
mod app;
mod cli;
mod codec;
mod config;
mod delivery;
mod error;
mod hw;
mod protocol;
mod record;
mod telemetry;
mod terminal;
mod utils;

pub use acquisition::{
    AcquisitionOrchestrator, DeviceSession, RoundStats, RoundSummary, SessionEnd, SessionState,
    SessionSummary, command_for_tick,
};
pub use app::{
    fake_hardware_client, real_hardware_client, run, run_with_clients, run_with_log_level,
};
pub use cli::{
    AcquisitionArgs, Args, Command, DecodeArgs, DeliveryArgs, FakeArgs, LogLevel, OutputFormat,
    RoundArgs, ScanArgs,
};
pub use codec::{ChecksumCodec, Frame, FrameDecoder, FrameOutcome, FrameReassembler};
pub use config::{AcquisitionConfig, DEFAULT_NAME_FILTER, default_token_path, read_token};
pub use delivery::{DeliveryReceipt, HttpDelivery, LogDelivery, ReportSink};
pub use error::{
    ConfigError, DeliveryError, FixtureError, FrameError, InteractionError, ProtocolError,
};
pub use hw::{DeviceBehaviour, FoundDevice, HardwareClient, Transport};
pub use protocol::{BmsCommand, EndpointId};
pub use record::{
    CellVoltages, DeviceIdentity, ManufactureDate, PackInfo, ProtectionFlags, ProtectionStatus,
    SessionReport, TelemetryDelta, TelemetryRecord,
};
pub use terminal::TerminalClient;
