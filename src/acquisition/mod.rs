//! Scheduling of request/response rounds against discovered devices.

mod orchestrator;
mod schedule;
mod session;

pub use self::orchestrator::{AcquisitionOrchestrator, RoundSummary};
pub use self::schedule::command_for_tick;
pub use self::session::{DeviceSession, RoundStats, SessionEnd, SessionState, SessionSummary};
