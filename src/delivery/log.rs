use async_trait::async_trait;
use tracing::{info, instrument};

use super::{DeliveryReceipt, ReportSink};
use crate::error::DeliveryError;
use crate::record::SessionReport;

/// Delivery that only writes the report to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDelivery;

#[async_trait]
impl ReportSink for LogDelivery {
    #[instrument(skip_all, level = "debug", fields(devices = report.len()))]
    async fn post(&self, report: &SessionReport) -> Result<DeliveryReceipt, DeliveryError> {
        let rendered = serde_json::to_string(report)?;
        info!(report = %rendered, "session report");
        Ok(DeliveryReceipt::accepted())
    }
}
