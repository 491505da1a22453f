//! GPU ray formation using wgpu compute shaders.
//!
//! [`GpuRayCaster`] claims a device and a stream from a shared
//! [`voxcast_gpu::DeviceManager`] and runs the ray formation shader on it.

mod buffers;
mod caster;
mod pipeline;
pub mod shaders;

pub use buffers::{GpuOutputInfo, GpuRayOffsets, GpuRendererInfo, GpuVolumeInfo, RayOutputBuffers};
pub use caster::GpuRayCaster;
pub use pipeline::{check_limits, RayFormPipeline};
