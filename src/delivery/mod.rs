//! Hand-off of aggregated reports to whatever consumes them.

mod http;
mod log;

use std::time::Duration;

use async_trait::async_trait;

pub use self::http::HttpDelivery;
pub use self::log::LogDelivery;
use crate::error::DeliveryError;
use crate::record::SessionReport;

/// What the delivery collaborator said about a report.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct DeliveryReceipt {
    accepted: bool,
    next_interval: Option<Duration>,
}

impl DeliveryReceipt {
    /// A receipt for a report the consumer took.
    #[must_use]
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            next_interval: None,
        }
    }

    /// A receipt for a report the consumer refused.
    #[must_use]
    pub fn rejected() -> Self {
        Self {
            accepted: false,
            next_interval: None,
        }
    }

    /// Attaches the wait the consumer asked for before the next round.
    #[must_use]
    pub fn with_next_interval(mut self, next_interval: Duration) -> Self {
        self.next_interval = Some(next_interval);
        self
    }

    #[must_use]
    pub fn is_accepted(&self) -> bool {
        self.accepted
    }

    #[must_use]
    pub fn next_interval(&self) -> Option<Duration> {
        self.next_interval
    }
}

/// Consumer of aggregated session reports.
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Delivers one report.
    ///
    /// A refusal by the consumer is a receipt with `accepted == false`;
    /// errors are reserved for failures to reach it at all.
    async fn post(&self, report: &SessionReport) -> Result<DeliveryReceipt, DeliveryError>;
}
