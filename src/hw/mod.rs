mod btleplug_backend;
mod fake_backend;
mod hardware;
mod model;

pub use self::fake_backend::DeviceBehaviour;
pub(crate) use self::fake_backend::{DEFAULT_CHUNK_SIZE, FakeBackendConfig, ScanFixture};
pub use self::hardware::{HardwareClient, Transport};
pub(crate) use self::hardware::{
    NOTIFICATION_CHANNEL_CAPACITY, fake_hardware_client, real_hardware_client,
};
pub use self::model::FoundDevice;
