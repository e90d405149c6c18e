use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{OnceCell, mpsc};
use tracing::{info, instrument};

use super::btleplug_backend::BtleplugBackend;
use super::fake_backend::{FakeBackend, FakeBackendConfig};
use super::model::FoundDevice;
use crate::error::InteractionError;

/// Bound on notification chunks buffered between a transport and its session.
pub(crate) const NOTIFICATION_CHANNEL_CAPACITY: usize = 32;

/// Discovery and connection collaborator.
#[async_trait]
pub trait HardwareClient: Send + Sync {
    /// Scans for up to `scan_window` and returns every device whose
    /// advertised name contains `name_filter` (ASCII case-insensitive).
    ///
    /// An empty result is not an error.
    async fn discover(
        &self,
        name_filter: &str,
        scan_window: Duration,
    ) -> Result<Vec<FoundDevice>, InteractionError>;

    /// Connects to a previously discovered device.
    async fn connect(&self, device: &FoundDevice) -> Result<Box<dyn Transport>, InteractionError>;
}

/// Request/notification channel to one connected device.
#[async_trait]
pub trait Transport: Send {
    /// Returns the device this transport is bound to.
    fn device(&self) -> &FoundDevice;

    /// Writes one request frame.
    async fn write(&mut self, payload: &[u8]) -> Result<(), InteractionError>;

    /// Subscribes to response notifications.
    ///
    /// Chunks arrive in device order. The receiver yields `None` once the
    /// device disconnects.
    async fn subscribe(&mut self) -> Result<mpsc::Receiver<Vec<u8>>, InteractionError>;

    /// Returns whether the link is still up.
    async fn is_connected(&self) -> bool;

    /// Tears the link down. Safe to call on an already disconnected device.
    async fn disconnect(&mut self) -> Result<(), InteractionError>;
}

/// Creates a hardware client backed by the real BLE stack.
///
/// The BLE manager is created on first use.
pub(crate) fn real_hardware_client() -> Arc<dyn HardwareClient> {
    Arc::new(RealHardwareClient::default())
}

/// Creates a hardware client backed by fixtures.
pub(crate) fn fake_hardware_client(config: FakeBackendConfig) -> Arc<dyn HardwareClient> {
    info!("using fake BLE backend");
    Arc::new(FakeHardwareClient {
        backend: FakeBackend::new(config),
    })
}

#[derive(Debug, Default)]
struct RealHardwareClient {
    backend: OnceCell<BtleplugBackend>,
}

impl RealHardwareClient {
    async fn backend(&self) -> Result<&BtleplugBackend, InteractionError> {
        self.backend.get_or_try_init(BtleplugBackend::new).await
    }
}

#[async_trait]
impl HardwareClient for RealHardwareClient {
    #[instrument(skip(self), level = "debug")]
    async fn discover(
        &self,
        name_filter: &str,
        scan_window: Duration,
    ) -> Result<Vec<FoundDevice>, InteractionError> {
        self.backend()
            .await?
            .discover(name_filter, scan_window)
            .await
    }

    async fn connect(&self, device: &FoundDevice) -> Result<Box<dyn Transport>, InteractionError> {
        let transport = self.backend().await?.connect(device).await?;
        Ok(Box::new(transport))
    }
}

#[derive(Debug)]
struct FakeHardwareClient {
    backend: FakeBackend,
}

#[async_trait]
impl HardwareClient for FakeHardwareClient {
    async fn discover(
        &self,
        name_filter: &str,
        _scan_window: Duration,
    ) -> Result<Vec<FoundDevice>, InteractionError> {
        Ok(self.backend.discover(name_filter).await)
    }

    async fn connect(&self, device: &FoundDevice) -> Result<Box<dyn Transport>, InteractionError> {
        let transport = self.backend.connect(device)?;
        Ok(Box::new(transport))
    }
}
