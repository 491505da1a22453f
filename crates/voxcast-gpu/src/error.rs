//! Error types for device contexts and the resource manager.

use thiserror::Error;

use crate::platform::DeviceId;

/// Errors raised by an accelerator platform or a wgpu device context.
#[derive(Debug, Error)]
pub enum GpuError {
    /// No compatible GPU adapter found.
    #[error("No compatible GPU adapter found")]
    NoAdapter,

    /// The platform could not enumerate its devices.
    #[error("cannot count accelerator devices: {0}")]
    Enumeration(String),

    /// Failed to request GPU device.
    #[error("Failed to request GPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    /// Device index does not name an enumerated adapter.
    #[error("device {0} is not an enumerated adapter")]
    InvalidDevice(DeviceId),

    /// Buffer mapping failed.
    #[error("Buffer mapping failed")]
    BufferMapping,

    /// A stream operation failed on the platform.
    #[error("stream operation failed: {0}")]
    Stream(String),

    /// Configuration could not be parsed.
    #[error("invalid GPU configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// Configuration file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by [`DeviceManager`](crate::DeviceManager) operations.
///
/// A request rejected by validation leaves the ownership tables untouched.
/// A release whose platform work fails is rolled back: claims and streams
/// the platform did not tear down are restored.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// The underlying platform call failed.
    #[error(transparent)]
    Platform(#[from] GpuError),

    /// Device identifier out of range.
    #[error("invalid device identifier {device} ({count} devices visible)")]
    InvalidDevice {
        /// Requested device.
        device: DeviceId,
        /// Number of devices the platform reports.
        count: usize,
    },

    /// Caller was never registered or has been unregistered.
    #[error("unknown caller")]
    UnknownCaller,

    /// Stream handle does not refer to a live stream.
    #[error("stream is not bound to any device")]
    UnknownStream,

    /// Stream is already bound to another device.
    #[error("stream already assigned to device {bound}, requested {requested}")]
    StreamDeviceMismatch {
        /// Device the stream is bound to.
        bound: DeviceId,
        /// Device the caller asked for.
        requested: DeviceId,
    },

    /// No caller-device claim matches the request.
    #[error("could not locate caller claim on device {0}")]
    NoDeviceClaim(DeviceId),

    /// No (stream, caller, device) triple matches the request.
    #[error("could not locate caller claim on stream for device {0}")]
    NoStreamClaim(DeviceId),
}

/// Result type for resource manager operations.
pub type Result<T> = std::result::Result<T, ManagerError>;
