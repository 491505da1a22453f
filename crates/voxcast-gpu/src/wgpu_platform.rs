//! [`Platform`] implementation over wgpu adapters.
//!
//! Every enumerated adapter is a device. A device context is opened the
//! first time a stream is created on it and dropped again on reset. wgpu
//! gives each device a single queue, so a stream is an ordered view of that
//! queue which remembers its latest submission; synchronizing a stream waits
//! for that submission only. The current device is tracked per thread.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::GpuConfig;
use crate::context::GpuContext;
use crate::error::GpuError;
use crate::platform::{DeviceId, Platform};

/// A wgpu-backed work stream bound to one device.
pub struct WgpuStream {
    device: DeviceId,
    context: Arc<GpuContext>,
    last_submission: Mutex<Option<wgpu::SubmissionIndex>>,
}

impl WgpuStream {
    fn new(device: DeviceId, context: Arc<GpuContext>) -> Self {
        Self {
            device,
            context,
            last_submission: Mutex::new(None),
        }
    }

    /// Device this stream is bound to.
    pub fn device_id(&self) -> DeviceId {
        self.device
    }

    /// The device context work on this stream runs in.
    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    /// Queue `commands` behind everything previously submitted on this stream.
    pub fn submit(&self, commands: wgpu::CommandBuffer) {
        let mut last = self.last_submission.lock();
        *last = Some(self.context.queue.submit(Some(commands)));
    }

    fn wait(&self) {
        let pending = self.last_submission.lock().take();
        if let Some(index) = pending {
            self.context
                .device
                .poll(wgpu::Maintain::WaitForSubmissionIndex(index));
        }
    }
}

/// wgpu accelerator runtime.
pub struct WgpuPlatform {
    _instance: wgpu::Instance,
    adapters: Vec<wgpu::Adapter>,
    contexts: Mutex<Vec<Option<Arc<GpuContext>>>>,
    current: Mutex<HashMap<ThreadId, DeviceId>>,
    limits: wgpu::Limits,
}

impl WgpuPlatform {
    /// Enumerate adapters for the configured backends.
    pub fn new(config: &GpuConfig) -> Result<Self, GpuError> {
        let backends = wgpu::Backends::from(config.backends);
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });
        let adapters = instance.enumerate_adapters(backends);
        info!(count = adapters.len(), ?backends, "enumerated GPU adapters");
        if adapters.is_empty() {
            return Err(GpuError::NoAdapter);
        }

        let contexts = Mutex::new(adapters.iter().map(|_| None).collect());
        Ok(Self {
            _instance: instance,
            adapters,
            contexts,
            current: Mutex::new(HashMap::new()),
            limits: config.limits.into(),
        })
    }

    /// Adapter description for `device`.
    pub fn adapter_info(&self, device: DeviceId) -> Option<wgpu::AdapterInfo> {
        self.adapters.get(device.0).map(|a| a.get_info())
    }

    /// Whether `device` currently has an open context.
    pub fn is_open(&self, device: DeviceId) -> bool {
        self.contexts
            .lock()
            .get(device.0)
            .is_some_and(|slot| slot.is_some())
    }

    fn context(&self, device: DeviceId) -> Result<Arc<GpuContext>, GpuError> {
        let adapter = self
            .adapters
            .get(device.0)
            .ok_or(GpuError::InvalidDevice(device))?;
        let mut contexts = self.contexts.lock();
        let slot = &mut contexts[device.0];
        if let Some(ctx) = slot {
            return Ok(Arc::clone(ctx));
        }
        let ctx = Arc::new(GpuContext::open_blocking(adapter, self.limits.clone())?);
        info!(%device, adapter = %ctx.info.name, "opened device context");
        *slot = Some(Arc::clone(&ctx));
        Ok(ctx)
    }
}

impl Platform for WgpuPlatform {
    type Stream = WgpuStream;

    fn device_count(&self) -> Result<usize, GpuError> {
        Ok(self.adapters.len())
    }

    fn create_stream(&self, device: DeviceId) -> Result<WgpuStream, GpuError> {
        let ctx = self.context(device)?;
        debug!(%device, "created stream");
        Ok(WgpuStream::new(device, ctx))
    }

    fn synchronize(&self, stream: &WgpuStream) -> Result<(), GpuError> {
        stream.wait();
        Ok(())
    }

    fn destroy_stream(&self, stream: &WgpuStream) -> Result<(), GpuError> {
        stream.wait();
        debug!(device = %stream.device, "destroyed stream");
        Ok(())
    }

    fn current_device(&self) -> Option<DeviceId> {
        self.current.lock().get(&thread::current().id()).copied()
    }

    fn set_current_device(&self, device: DeviceId) -> Result<(), GpuError> {
        if device.0 >= self.adapters.len() {
            return Err(GpuError::InvalidDevice(device));
        }
        self.current.lock().insert(thread::current().id(), device);
        Ok(())
    }

    fn reset_device(&self, device: DeviceId) -> Result<(), GpuError> {
        let taken = self
            .contexts
            .lock()
            .get_mut(device.0)
            .ok_or(GpuError::InvalidDevice(device))?
            .take();
        if let Some(ctx) = taken {
            ctx.wait_idle();
            debug!(%device, "reset device context");
        }
        Ok(())
    }
}
