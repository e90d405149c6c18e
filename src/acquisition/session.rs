use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior, interval, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::schedule::command_for_tick;
use crate::codec::{FrameDecoder, FrameOutcome, FrameReassembler};
use crate::config::AcquisitionConfig;
use crate::error::InteractionError;
use crate::hw::Transport;
use crate::protocol::BmsCommand;
use crate::record::{DeviceIdentity, TelemetryRecord};
use crate::utils::format_hex;

/// Request/response state of one session.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SessionState {
    /// Ready to send on the next tick.
    Idle,
    /// A request is outstanding until a frame completes, errors, or times out.
    AwaitingResponse {
        command: BmsCommand,
        deadline: Instant,
    },
    /// The transport failed; no further requests are sent.
    Faulted,
}

/// Why a session stopped.
#[derive(Debug, Clone, Copy, Eq, PartialEq, derive_more::Display)]
pub enum SessionEnd {
    #[display("reached_tick_limit")]
    ReachedTickLimit,
    #[display("disconnected")]
    Disconnected,
    #[display("transport_failed")]
    TransportFailed,
    #[display("cancelled")]
    Cancelled,
}

/// Per-session round counters.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct RoundStats {
    pub requests: u32,
    pub completed: u32,
    pub frame_errors: u32,
    pub timeouts: u32,
}

/// Outcome of one device session.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    identity: DeviceIdentity,
    record: TelemetryRecord,
    end: SessionEnd,
    state: SessionState,
    stats: RoundStats,
}

impl SessionSummary {
    pub(crate) fn new(
        identity: DeviceIdentity,
        record: TelemetryRecord,
        end: SessionEnd,
        state: SessionState,
        stats: RoundStats,
    ) -> Self {
        Self {
            identity,
            record,
            end,
            state,
            stats,
        }
    }

    #[must_use]
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    #[must_use]
    pub fn record(&self) -> &TelemetryRecord {
        &self.record
    }

    #[must_use]
    pub fn end(&self) -> SessionEnd {
        self.end
    }

    /// State the session was left in: `Faulted` after a transport failure,
    /// otherwise `Idle` with any outstanding request abandoned.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn stats(&self) -> RoundStats {
        self.stats
    }

    /// Splits the summary into its key and aggregate record.
    #[must_use]
    pub fn into_parts(self) -> (DeviceIdentity, TelemetryRecord) {
        (self.identity, self.record)
    }
}

/// Drives the request/response cycle against one connected device.
///
/// The session exclusively owns its reassembly state and aggregate record.
pub struct DeviceSession {
    identity: DeviceIdentity,
    transport: Box<dyn Transport>,
    reassembler: FrameReassembler,
    record: TelemetryRecord,
    state: SessionState,
    stats: RoundStats,
    tick_interval: Duration,
    ticks: u32,
    response_timeout: Duration,
}

impl DeviceSession {
    /// Binds a session to a connected transport.
    #[must_use]
    pub fn new(transport: Box<dyn Transport>, config: &AcquisitionConfig) -> Self {
        Self {
            identity: transport.device().identity(),
            transport,
            reassembler: FrameReassembler::new(),
            record: TelemetryRecord::default(),
            state: SessionState::Idle,
            stats: RoundStats::default(),
            tick_interval: config.tick_interval(),
            ticks: config.ticks_per_session(),
            response_timeout: config.response_timeout(),
        }
    }

    /// Runs ticks until the tick limit, a disconnect, or cancellation, then
    /// disconnects the transport.
    #[instrument(
        skip(self, cancel),
        level = "info",
        fields(device = %self.identity.address(), name = %self.identity.name(), ticks = self.ticks)
    )]
    pub async fn run(mut self, cancel: CancellationToken) -> SessionSummary {
        let end = match self.transport.subscribe().await {
            Ok(chunks) => self.drive(chunks, &cancel).await,
            Err(error) => {
                warn!(device = %self.identity, %error, "failed to subscribe to notifications");
                end_for_error(&error)
            }
        };

        self.state = match end {
            SessionEnd::ReachedTickLimit | SessionEnd::Cancelled => SessionState::Idle,
            SessionEnd::Disconnected | SessionEnd::TransportFailed => SessionState::Faulted,
        };
        if let Err(error) = self.transport.disconnect().await {
            debug!(?error, "disconnect after session failed");
        }
        info!(%end, requests = self.stats.requests, completed = self.stats.completed, "session finished");

        SessionSummary::new(self.identity, self.record, end, self.state, self.stats)
    }

    async fn drive(
        &mut self,
        mut chunks: tokio::sync::mpsc::Receiver<Vec<u8>>,
        cancel: &CancellationToken,
    ) -> SessionEnd {
        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tick = 0u32;

        loop {
            let deadline = match self.state {
                SessionState::AwaitingResponse { deadline, .. } => Some(deadline),
                SessionState::Idle | SessionState::Faulted => None,
            };
            let idle = self.state == SessionState::Idle;
            if idle && tick >= self.ticks {
                return SessionEnd::ReachedTickLimit;
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => return SessionEnd::Cancelled,
                maybe_chunk = chunks.recv() => match maybe_chunk {
                    Some(chunk) => self.on_chunk(&chunk),
                    None => {
                        warn!(device = %self.identity, "notification stream closed");
                        return SessionEnd::Disconnected;
                    }
                },
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.on_timeout();
                }
                _ = ticker.tick(), if idle => {
                    tick += 1;
                    let sent = tokio::select! {
                        biased;
                        () = cancel.cancelled() => Err(SessionEnd::Cancelled),
                        sent = self.send(command_for_tick(tick)) => sent,
                    };
                    if let Err(end) = sent {
                        return end;
                    }
                }
            }
        }
    }

    async fn send(&mut self, command: BmsCommand) -> Result<(), SessionEnd> {
        if !self.transport.is_connected().await {
            warn!(device = %self.identity, "device no longer connected");
            return Err(SessionEnd::Disconnected);
        }

        let request = command.request_frame();
        debug!(%command, request = %format_hex(&request), "sending request");
        self.reassembler.reset();
        if let Err(error) = self.transport.write(&request).await {
            warn!(device = %self.identity, %command, %error, "request write failed");
            return Err(end_for_error(&error));
        }

        self.stats.requests += 1;
        self.state = SessionState::AwaitingResponse {
            command,
            deadline: Instant::now() + self.response_timeout,
        };
        Ok(())
    }

    fn on_chunk(&mut self, chunk: &[u8]) {
        let SessionState::AwaitingResponse { command, .. } = self.state else {
            debug!(chunk = %format_hex(chunk), "discarding unsolicited notification");
            return;
        };

        match self.reassembler.feed(chunk) {
            FrameOutcome::Incomplete => {}
            FrameOutcome::Complete(frame) => {
                debug!(%command, frame = %format_hex(frame.as_bytes()), "frame complete");
                match FrameDecoder::decode(&frame) {
                    Ok(delta) => {
                        self.record.merge(delta);
                        self.stats.completed += 1;
                    }
                    Err(error) => {
                        warn!(device = %self.identity, %command, %error, "frame could not be decoded");
                        self.stats.frame_errors += 1;
                    }
                }
                self.finish_round();
            }
            FrameOutcome::Error(error) => {
                warn!(device = %self.identity, %command, %error, "frame rejected");
                self.stats.frame_errors += 1;
                self.finish_round();
            }
        }
    }

    fn on_timeout(&mut self) {
        if let SessionState::AwaitingResponse { command, .. } = self.state {
            warn!(
                device = %self.identity,
                %command,
                received = self.reassembler.received_len(),
                "no complete response before timeout"
            );
            self.stats.timeouts += 1;
        }
        self.finish_round();
    }

    fn finish_round(&mut self) {
        self.reassembler.reset();
        self.state = SessionState::Idle;
    }
}

fn end_for_error(error: &InteractionError) -> SessionEnd {
    match error {
        InteractionError::TransportDisconnected { .. } => SessionEnd::Disconnected,
        _ => SessionEnd::TransportFailed,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;

    use super::*;
    use crate::codec::Frame;
    use crate::hw::FoundDevice;

    type WriteLog = Arc<Mutex<Vec<BmsCommand>>>;

    #[derive(Clone, Copy)]
    enum Reply {
        Valid,
        Silent,
        SplitInto(usize),
        HangUpAfter(usize),
    }

    struct ScriptedTransport {
        device: FoundDevice,
        reply: Reply,
        sender: Option<mpsc::Sender<Vec<u8>>>,
        writes: WriteLog,
    }

    impl ScriptedTransport {
        fn boxed(reply: Reply) -> (Box<dyn Transport>, WriteLog) {
            let writes = WriteLog::default();
            let transport = Self {
                device: FoundDevice::new(
                    "hci0".into(),
                    "AA:01".into(),
                    "AA:01".into(),
                    Some("xiaoxiang-1".into()),
                    Some(-50),
                ),
                reply,
                sender: None,
                writes: Arc::clone(&writes),
            };
            (Box::new(transport), writes)
        }
    }

    fn response(command: BmsCommand) -> Vec<u8> {
        let payload: &[u8] = match command {
            BmsCommand::CellVoltages => &[0x0D, 0x48, 0x0D, 0x50],
            BmsCommand::ReadRegister(_) => &[0x0D, 0x16],
            BmsCommand::PackInfo => &[0x00; 23],
        };
        Frame::encode_response(command.response_command(), 0x00, payload).into_bytes()
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        fn device(&self) -> &FoundDevice {
            &self.device
        }

        async fn write(&mut self, payload: &[u8]) -> Result<(), InteractionError> {
            let command = BmsCommand::from_request_frame(payload).unwrap_or(BmsCommand::PackInfo);
            let count = {
                let mut writes = self.writes.lock().unwrap();
                writes.push(command);
                writes.len()
            };
            let Some(sender) = &self.sender else {
                return Ok(());
            };
            match self.reply {
                Reply::Silent => {}
                Reply::Valid => {
                    let _ = sender.try_send(response(command));
                }
                Reply::SplitInto(size) => {
                    for chunk in response(command).chunks(size) {
                        let _ = sender.try_send(chunk.to_vec());
                    }
                }
                Reply::HangUpAfter(limit) => {
                    if count > limit {
                        self.sender = None;
                    } else {
                        let _ = sender.try_send(response(command));
                    }
                }
            }
            Ok(())
        }

        async fn subscribe(&mut self) -> Result<mpsc::Receiver<Vec<u8>>, InteractionError> {
            let (sender, receiver) = mpsc::channel(8);
            self.sender = Some(sender);
            Ok(receiver)
        }

        async fn is_connected(&self) -> bool {
            self.sender.is_some()
        }

        async fn disconnect(&mut self) -> Result<(), InteractionError> {
            self.sender = None;
            Ok(())
        }
    }

    fn config() -> AcquisitionConfig {
        AcquisitionConfig::builder()
            .tick_interval(Duration::from_secs(5))
            .ticks_per_session(6)
            .response_timeout(Duration::from_secs(4))
            .build()
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_session_sends_scheduled_commands_and_merges_responses() {
        let (transport, writes) = ScriptedTransport::boxed(Reply::SplitInto(3));
        let started = Instant::now();

        let summary = DeviceSession::new(transport, &config())
            .run(CancellationToken::new())
            .await;

        assert_eq!(SessionEnd::ReachedTickLimit, summary.end());
        assert_eq!(
            vec![
                BmsCommand::CellVoltages,
                BmsCommand::PackInfo,
                BmsCommand::START_VOLTAGE,
                BmsCommand::PackInfo,
                BmsCommand::CellVoltages,
                BmsCommand::START_VOLTAGE,
            ],
            *writes.lock().unwrap()
        );
        assert_eq!(
            RoundStats {
                requests: 6,
                completed: 6,
                frame_errors: 0,
                timeouts: 0
            },
            summary.stats()
        );
        assert!(summary.record().pack().is_some());
        assert_eq!(Some(3.35), summary.record().start_voltage());
        assert_eq!(Duration::from_secs(25), started.elapsed());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_device_times_out_each_round_without_stalling() {
        let (transport, writes) = ScriptedTransport::boxed(Reply::Silent);

        let summary = DeviceSession::new(transport, &config())
            .run(CancellationToken::new())
            .await;

        assert_eq!(SessionEnd::ReachedTickLimit, summary.end());
        assert_eq!(SessionState::Idle, summary.state());
        assert_eq!(6, writes.lock().unwrap().len());
        assert_eq!(6, summary.stats().timeouts);
        assert!(summary.record().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_mid_round_ends_session_and_keeps_partial_record() {
        let (transport, writes) = ScriptedTransport::boxed(Reply::HangUpAfter(2));

        let summary = DeviceSession::new(transport, &config())
            .run(CancellationToken::new())
            .await;

        assert_eq!(SessionEnd::Disconnected, summary.end());
        assert_eq!(SessionState::Faulted, summary.state());
        assert_eq!(3, writes.lock().unwrap().len());
        assert!(summary.record().cells().is_some());
        assert!(summary.record().pack().is_some());
        assert_eq!(None, summary.record().start_voltage());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_waiting_session() {
        let (transport, writes) = ScriptedTransport::boxed(Reply::Valid);
        let cancel = CancellationToken::new();
        let session = tokio::spawn(DeviceSession::new(transport, &config()).run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(7)).await;
        cancel.cancel();
        let summary = session.await.unwrap();

        assert_eq!(SessionEnd::Cancelled, summary.end());
        assert_eq!(SessionState::Idle, summary.state());
        assert_eq!(2, writes.lock().unwrap().len());
    }

    #[tokio::test(start_paused = true)]
    async fn single_tick_session_resolves_its_only_round() {
        let (transport, writes) = ScriptedTransport::boxed(Reply::Valid);
        let config = AcquisitionConfig::builder().ticks_per_session(1).build();

        let summary = DeviceSession::new(transport, &config)
            .run(CancellationToken::new())
            .await;

        assert_eq!(SessionEnd::ReachedTickLimit, summary.end());
        assert_eq!(vec![BmsCommand::CellVoltages], *writes.lock().unwrap());
        assert_eq!(Some(2), summary.record().cells().map(|cells| cells.cell_count()));
    }
}
