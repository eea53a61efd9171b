use crate::descriptors::DeviceDescriptor;
use crate::error::FanoutError;
use async_trait::async_trait;
use frame_pool::FrameShape;

/// A single color (and optionally depth) frame as handed up from a driver,
/// before it has been copied into a pool buffer.
pub struct DriverFrame {
    pub shape: FrameShape,
    pub data: Vec<u8>,
    pub depth: Option<Vec<u8>>,
}

/// Required of every camera driver plug-in (§6). Implementations own the
/// device connection; the core never reaches past this contract.
#[async_trait]
pub trait CameraDriver: Send {
    async fn connect(&mut self) -> Result<(), FanoutError>;

    /// Never raises; best-effort teardown.
    async fn disconnect(&mut self);

    /// `None` signals disconnection and drives the producer into its
    /// reconnect loop.
    async fn get_frame(&mut self) -> Option<DriverFrame>;

    fn supports_depth(&self) -> bool {
        false
    }
}

/// Builds `CameraDriver` instances for a single `camera_type` tag, and
/// enumerates devices of that type. Generalizes `daq-core`'s
/// `DriverFactory` pattern to this crate's external driver contract.
pub trait CameraDriverFactory: Send + Sync {
    fn camera_type(&self) -> &'static str;

    fn list_devices(&self) -> Vec<DeviceDescriptor>;

    fn build(&self, identifier: &str, config: &serde_json::Value)
        -> Result<Box<dyn CameraDriver>, FanoutError>;
}
