//! GPU context management for wgpu device and queue.

use wgpu::{Adapter, AdapterInfo, Device, Limits, Queue};

use crate::error::GpuError;

/// An opened accelerator device: the wgpu device, its queue and the
/// adapter it was opened from.
pub struct GpuContext {
    /// The wgpu device for creating resources and pipelines.
    pub device: Device,
    /// The command queue for submitting work.
    pub queue: Queue,
    /// Description of the adapter backing this context.
    pub info: AdapterInfo,
}

impl GpuContext {
    /// Open a device on `adapter` with the requested limits.
    pub async fn open(adapter: &Adapter, limits: Limits) -> Result<Self, GpuError> {
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("voxcast device"),
                    required_limits: limits,
                    ..Default::default()
                },
                None,
            )
            .await?;

        Ok(Self {
            device,
            queue,
            info: adapter.get_info(),
        })
    }

    /// Open a device synchronously.
    pub fn open_blocking(adapter: &Adapter, limits: Limits) -> Result<Self, GpuError> {
        pollster::block_on(Self::open(adapter, limits))
    }

    /// Block until the device has finished all submitted work.
    pub fn wait_idle(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }
}

impl std::fmt::Debug for GpuContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuContext")
            .field("adapter", &self.info.name)
            .field("backend", &self.info.backend)
            .finish()
    }
}
