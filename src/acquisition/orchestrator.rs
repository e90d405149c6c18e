use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::session::{DeviceSession, RoundStats, SessionEnd, SessionState, SessionSummary};
use crate::config::AcquisitionConfig;
use crate::delivery::{DeliveryReceipt, ReportSink};
use crate::hw::{FoundDevice, HardwareClient};
use crate::record::{DeviceIdentity, SessionReport, TelemetryRecord};
use crate::utils::format_wait;

/// Result of one scheduling round.
#[derive(Debug, Clone)]
pub struct RoundSummary {
    report: SessionReport,
    sessions: Vec<SessionSummary>,
    receipt: Option<DeliveryReceipt>,
    next_wait: Duration,
}

impl RoundSummary {
    #[must_use]
    pub fn report(&self) -> &SessionReport {
        &self.report
    }

    /// Per-device outcomes in address order.
    #[must_use]
    pub fn sessions(&self) -> &[SessionSummary] {
        &self.sessions
    }

    /// The delivery receipt, or `None` when delivery failed.
    #[must_use]
    pub fn receipt(&self) -> Option<DeliveryReceipt> {
        self.receipt
    }

    /// Wait before the next round.
    #[must_use]
    pub fn next_wait(&self) -> Duration {
        self.next_wait
    }
}

/// Runs discovery, concurrent device sessions, aggregation and delivery.
pub struct AcquisitionOrchestrator {
    hardware: Arc<dyn HardwareClient>,
    sink: Arc<dyn ReportSink>,
    config: AcquisitionConfig,
}

impl AcquisitionOrchestrator {
    #[must_use]
    pub fn new(
        hardware: Arc<dyn HardwareClient>,
        sink: Arc<dyn ReportSink>,
        config: AcquisitionConfig,
    ) -> Self {
        Self {
            hardware,
            sink,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    /// Runs rounds back to back until `cancel` fires, handing each finished
    /// round to `on_round`.
    pub async fn run_forever<F>(&self, cancel: CancellationToken, mut on_round: F)
    where
        F: FnMut(&RoundSummary),
    {
        let mut round = 0u64;
        loop {
            round += 1;
            let Some(summary) = self.run_round(round, &cancel).await else {
                break;
            };
            on_round(&summary);
            info!(round, wait = %format_wait(summary.next_wait()), "waiting for next round");
            tokio::select! {
                () = cancel.cancelled() => break,
                () = sleep(summary.next_wait()) => {}
            }
        }
        info!("acquisition stopped");
    }

    /// Runs one round. Returns `None` when cancelled before sessions ran.
    #[instrument(skip(self, cancel), level = "info")]
    pub async fn run_round(&self, round: u64, cancel: &CancellationToken) -> Option<RoundSummary> {
        let devices = self.discover_until_found(cancel).await?;
        let sessions = self.run_sessions(devices, cancel).await;

        let mut report = SessionReport::new(OffsetDateTime::now_utc());
        for session in &sessions {
            if session.record().is_empty() {
                warn!(device = %session.identity(), end = %session.end(), "device contributed no telemetry");
                continue;
            }
            report.insert(session.identity().clone(), session.record().clone());
        }

        let receipt = match self.sink.post(&report).await {
            Ok(receipt) => {
                if !receipt.is_accepted() {
                    warn!("report was not accepted");
                }
                Some(receipt)
            }
            Err(error) => {
                warn!(%error, "report delivery failed");
                None
            }
        };
        let next_wait = receipt
            .and_then(|receipt| receipt.next_interval())
            .unwrap_or(self.config.default_poll_interval());
        info!(
            devices = sessions.len(),
            reporting = report.len(),
            accepted = receipt.is_some_and(|receipt| receipt.is_accepted()),
            "round complete"
        );

        Some(RoundSummary {
            report,
            sessions,
            receipt,
            next_wait,
        })
    }

    /// Scans until at least one device is found. Returns `None` on cancellation.
    #[instrument(skip(self, cancel), level = "debug", fields(filter = self.config.name_filter()))]
    pub async fn discover_until_found(&self, cancel: &CancellationToken) -> Option<Vec<FoundDevice>> {
        loop {
            let discovered = tokio::select! {
                () = cancel.cancelled() => return None,
                discovered = self.hardware.discover(
                    self.config.name_filter(),
                    self.config.discovery_timeout(),
                ) => discovered,
            };
            match discovered {
                Ok(devices) if !devices.is_empty() => {
                    info!(count = devices.len(), "discovered devices");
                    return Some(devices);
                }
                Ok(_) => info!(
                    retry_in = %format_wait(self.config.discovery_retry_interval()),
                    "no devices found"
                ),
                Err(error) => warn!(
                    %error,
                    retry_in = %format_wait(self.config.discovery_retry_interval()),
                    "discovery failed"
                ),
            }

            tokio::select! {
                () = cancel.cancelled() => return None,
                () = sleep(self.config.discovery_retry_interval()) => {}
            }
        }
    }

    /// Runs one session per device concurrently and collects every outcome.
    ///
    /// Sessions still running at the deadline are cancelled; any that fail to
    /// wind down within the grace period after that are aborted.
    pub async fn run_sessions(
        &self,
        devices: Vec<FoundDevice>,
        cancel: &CancellationToken,
    ) -> Vec<SessionSummary> {
        let sessions_cancel = cancel.child_token();
        let mut join_set = JoinSet::new();
        let mut identities = HashMap::new();
        for device in devices {
            let identity = device.identity();
            let handle = join_set.spawn(run_device(
                Arc::clone(&self.hardware),
                device,
                self.config.clone(),
                sessions_cancel.clone(),
            ));
            identities.insert(handle.id(), identity);
        }

        let deadline = Instant::now() + self.config.session_deadline();
        let mut abort_at: Option<Instant> = None;
        let mut aborted = false;
        let mut summaries = Vec::new();
        loop {
            tokio::select! {
                joined = join_set.join_next_with_id() => match joined {
                    Some(Ok((_, summary))) => summaries.push(summary),
                    Some(Err(error)) => match identities.remove(&error.id()) {
                        Some(identity) => summaries.push(lost_session(identity, &error)),
                        None => warn!(%error, "unknown session task failed"),
                    },
                    None => break,
                },
                () = sleep_until(deadline), if abort_at.is_none() => {
                    warn!(remaining = join_set.len(), "session deadline reached, cancelling");
                    sessions_cancel.cancel();
                    abort_at = Some(Instant::now() + self.config.session_grace());
                }
                () = sleep_until(abort_at.unwrap_or(deadline)), if abort_at.is_some() && !aborted => {
                    warn!(remaining = join_set.len(), "sessions ignored cancellation, aborting");
                    join_set.abort_all();
                    aborted = true;
                }
            }
        }

        summaries.sort_by(|left, right| left.identity().cmp(right.identity()));
        summaries
    }
}

async fn run_device(
    hardware: Arc<dyn HardwareClient>,
    device: FoundDevice,
    config: AcquisitionConfig,
    cancel: CancellationToken,
) -> SessionSummary {
    let connected = tokio::select! {
        () = cancel.cancelled() => Err(SessionEnd::Cancelled),
        connected = hardware.connect(&device) => connected.map_err(|error| {
            warn!(device = %device.identity(), %error, "failed to connect");
            SessionEnd::TransportFailed
        }),
    };

    match connected {
        Ok(transport) => DeviceSession::new(transport, &config).run(cancel).await,
        Err(end) => SessionSummary::new(
            device.identity(),
            TelemetryRecord::default(),
            end,
            match end {
                SessionEnd::Cancelled => SessionState::Idle,
                _ => SessionState::Faulted,
            },
            RoundStats::default(),
        ),
    }
}

/// Stands in for a session whose task was aborted or panicked. Whatever it
/// collected went down with the task.
fn lost_session(identity: DeviceIdentity, error: &JoinError) -> SessionSummary {
    let (end, state) = if error.is_cancelled() {
        warn!(device = %identity, %error, "session aborted after ignoring cancellation");
        (SessionEnd::Cancelled, SessionState::Idle)
    } else {
        warn!(device = %identity, %error, "session task panicked");
        (SessionEnd::TransportFailed, SessionState::Faulted)
    };
    SessionSummary::new(identity, TelemetryRecord::default(), end, state, RoundStats::default())
}
