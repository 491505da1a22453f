//! Accelerator device and stream arbitration for voxcast.
//!
//! This crate owns everything that touches accelerator devices directly:
//! - [`Platform`]: the seam to an accelerator runtime (devices, streams,
//!   the current-device register)
//! - [`WgpuPlatform`]: that runtime implemented over wgpu adapters
//! - [`DeviceManager`]: reference-counted sharing of devices and streams
//!   between independent callers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use voxcast_gpu::{DeviceId, DeviceManager, GpuConfig, WgpuPlatform};
//!
//! let platform = WgpuPlatform::new(&GpuConfig::default())?;
//! let manager = Arc::new(DeviceManager::new(platform));
//!
//! let caller = manager.register_caller();
//! manager.acquire_device(caller, DeviceId(0))?;
//! let mut stream = None;
//! let stream = manager.acquire_stream(caller, &mut stream, DeviceId(0))?;
//! manager.synchronize_stream(stream)?;
//! manager.unregister_caller(caller)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]

mod config;
mod context;
mod error;
mod manager;
mod platform;
mod wgpu_platform;

pub use config::{BackendSelection, GpuConfig, LimitsPreset};
pub use context::GpuContext;
pub use error::{GpuError, ManagerError, Result};
pub use manager::{CallerId, DeviceManager, StreamId};
pub use platform::{DeviceId, Platform};
pub use wgpu_platform::{WgpuPlatform, WgpuStream};
