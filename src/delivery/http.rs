use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument, warn};
use ureq::{Agent, AgentBuilder};

use super::{DeliveryReceipt, ReportSink};
use crate::error::DeliveryError;
use crate::record::SessionReport;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// The server answers `polling_interval` in minutes.
const POLLING_INTERVAL_UNIT: Duration = Duration::from_secs(60);

/// Posts reports as JSON to an HTTP endpoint.
#[derive(Clone)]
pub struct HttpDelivery {
    agent: Agent,
    endpoint: String,
    token: String,
}

impl std::fmt::Debug for HttpDelivery {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpDelivery")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl HttpDelivery {
    /// Creates a delivery that authenticates with `token`.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            agent: AgentBuilder::new().timeout(REQUEST_TIMEOUT).build(),
            endpoint: endpoint.into(),
            token: token.into(),
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ReportSink for HttpDelivery {
    #[instrument(skip_all, level = "info", fields(endpoint = %self.endpoint, devices = report.len()))]
    async fn post(&self, report: &SessionReport) -> Result<DeliveryReceipt, DeliveryError> {
        let body = serde_json::to_string(report)?;
        let delivery = self.clone();
        tokio::task::spawn_blocking(move || delivery.send_blocking(&body)).await?
    }
}

impl HttpDelivery {
    fn send_blocking(&self, body: &str) -> Result<DeliveryReceipt, DeliveryError> {
        let result = self
            .agent
            .post(&self.endpoint)
            .set("Authorization", &self.token)
            .set("Content-Type", "application/json")
            .send_string(body);

        match result {
            Ok(response) if response.status() == 200 => {
                let text = response
                    .into_string()
                    .map_err(|source| DeliveryError::Decode { source })?;
                Ok(receipt_from_body(&text))
            }
            Ok(response) => {
                warn!(status = response.status(), "report not accepted");
                Ok(DeliveryReceipt::rejected())
            }
            Err(ureq::Error::Status(status, _)) => {
                warn!(status, "report rejected");
                Ok(DeliveryReceipt::rejected())
            }
            Err(ureq::Error::Transport(transport)) => Err(Box::new(transport).into()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ServerReply {
    polling_interval: Option<u64>,
}

fn receipt_from_body(body: &str) -> DeliveryReceipt {
    match serde_json::from_str::<ServerReply>(body) {
        Ok(ServerReply {
            polling_interval: Some(minutes),
        }) if minutes > 0 => {
            debug!(minutes, "server requested polling interval");
            let minutes = u32::try_from(minutes).unwrap_or(u32::MAX);
            DeliveryReceipt::accepted().with_next_interval(POLLING_INTERVAL_UNIT.saturating_mul(minutes))
        }
        Ok(ServerReply { .. }) => DeliveryReceipt::accepted(),
        Err(error) => {
            warn!(%error, "ignoring unreadable delivery response");
            DeliveryReceipt::accepted()
        }
    }
}
