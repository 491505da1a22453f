//! Per-pixel ray formation for volume ray casting.
//!
//! For every output pixel this crate computes the segment of the viewing ray
//! that lies inside a volume, after clipping against up to six cutting
//! planes and the volume's bounds, as a start point, a per-sample increment
//! and a sample count.
//!
//! - [`CpuRayKernel`] evaluates the computation with rayon
//! - `gpu::GpuRayCaster` (feature `gpu`) runs the same arithmetic as a wgpu
//!   compute shader on a device claimed from a `voxcast_gpu::DeviceManager`
//!
//! # Example
//!
//! ```
//! use voxcast_raycast::{
//!     CpuRayKernel, DepthBuffer, LaunchParams, OutputInfo, RayFormer, RendererInfo, VolumeInfo,
//! };
//!
//! let params = LaunchParams {
//!     volume: VolumeInfo::new([0.0, 10.0, 0.0, 10.0, 0.0, 10.0], [1.0, 1.0, 1.0]),
//!     renderer: RendererInfo::default(),
//!     output: OutputInfo::new(2, 1),
//! };
//!
//! let mut kernel = CpuRayKernel::default();
//! kernel.load_depth_buffer(&DepthBuffer::new(2, 1, vec![0.0, 1.0])?)?;
//! let rays = kernel.form_rays(&params)?;
//! assert!(rays.ray_at(0, 0).is_empty());
//! # Ok::<(), voxcast_raycast::RaycastError>(())
//! ```

#![warn(missing_docs)]

pub mod clip;
pub mod config;
pub mod error;
pub mod kernel;
pub mod math;
pub mod params;
pub mod ray;

#[cfg(feature = "gpu")]
pub mod gpu;

pub use clip::{clip_to_bounds, clip_to_planes};
pub use config::RaycastConfig;
pub use error::{RaycastError, Result};
pub use kernel::{form_ray, step_ray, CpuRayKernel, RayFormer};
pub use math::{Mat4, Vec3};
pub use params::{
    ClippingPlane, DepthBuffer, LaunchParams, OutputInfo, RayOffsetTable, RendererInfo, VolumeInfo,
    CLIPPING_PLANE_COUNT,
};
pub use ray::{Ray, RayBuffers, Segment};
