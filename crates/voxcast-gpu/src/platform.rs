//! Accelerator runtime abstraction used by the resource manager.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::GpuError;

/// Index of an accelerator device in the platform's enumeration order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct DeviceId(pub usize);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An accelerator runtime: devices, ordered work streams and a per-thread
/// "current device" register.
///
/// Implementations must be usable from several threads. The manager never
/// holds its ownership tables locked across a call that may block
/// ([`Platform::synchronize`], [`Platform::destroy_stream`],
/// [`Platform::reset_device`], [`Platform::create_stream`]), so those calls
/// may run concurrently from different threads.
pub trait Platform: Send + Sync {
    /// An ordered, asynchronous work queue bound to one device.
    type Stream: Send + Sync;

    /// Number of devices visible to the process.
    fn device_count(&self) -> Result<usize, GpuError>;

    /// Create a new stream on `device`.
    fn create_stream(&self, device: DeviceId) -> Result<Self::Stream, GpuError>;

    /// Block until all work queued on `stream` has retired.
    fn synchronize(&self, stream: &Self::Stream) -> Result<(), GpuError>;

    /// Release the platform resources held by `stream`.
    fn destroy_stream(&self, stream: &Self::Stream) -> Result<(), GpuError>;

    /// Device that currently receives work from the calling thread, if any.
    fn current_device(&self) -> Option<DeviceId>;

    /// Make `device` the calling thread's execution target.
    fn set_current_device(&self, device: DeviceId) -> Result<(), GpuError>;

    /// Tear down the execution context of `device`.
    fn reset_device(&self, device: DeviceId) -> Result<(), GpuError>;
}

/// Run `f` with `device` current, then hand the register back to whatever
/// device was current before.
pub(crate) fn with_current_device<P, T>(
    platform: &P,
    device: DeviceId,
    f: impl FnOnce(&P) -> Result<T, GpuError>,
) -> Result<T, GpuError>
where
    P: Platform + ?Sized,
{
    let previous = platform.current_device();
    if previous != Some(device) {
        platform.set_current_device(device)?;
    }
    let result = f(platform);
    if let Some(previous) = previous.filter(|&p| p != device) {
        if let Err(err) = platform.set_current_device(previous) {
            tracing::warn!(%previous, error = %err, "failed to restore current device");
        }
    }
    result
}
