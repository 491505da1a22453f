//! Error types for ray formation.

use thiserror::Error;

/// Errors that can occur while forming rays.
#[derive(Debug, Error)]
pub enum RaycastError {
    /// Output resolution has a zero dimension.
    #[error("invalid output resolution {width}x{height}")]
    InvalidResolution {
        /// Requested width in pixels.
        width: u32,
        /// Requested height in pixels.
        height: u32,
    },

    /// Depth values do not cover the depth buffer's resolution.
    #[error("depth buffer holds {actual} values, expected {expected}")]
    DepthBufferSize {
        /// `width * height`.
        expected: usize,
        /// Number of values supplied.
        actual: usize,
    },

    /// Bound depth buffer and output image disagree on resolution.
    #[error("depth buffer is {depth:?} but output image is {output:?}")]
    ResolutionMismatch {
        /// Depth buffer width and height.
        depth: [u32; 2],
        /// Output width and height.
        output: [u32; 2],
    },

    /// Rays were requested before a depth buffer was loaded.
    #[error("no depth buffer loaded")]
    DepthBufferNotLoaded,

    /// Rays were read back before any launch.
    #[error("no ray launch pending")]
    NoLaunch,

    /// Tile edge outside 4..=16.
    #[error("tile size {0} outside 4..=16")]
    InvalidTileSize(u32),

    /// Gradient shading darkness outside [0, 1].
    #[error("gradient shading darkness {0} outside [0, 1]")]
    InvalidShading(f32),

    /// Configuration could not be parsed.
    #[error("invalid raycast configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// Configuration file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The device cannot run the ray formation pipeline.
    #[cfg(feature = "gpu")]
    #[error("device limit {limit} is {available}, ray formation needs {required}")]
    DeviceLimits {
        /// Name of the `wgpu::Limits` field.
        limit: &'static str,
        /// Value the pipeline needs.
        required: u32,
        /// Value the device was opened with.
        available: u32,
    },

    /// GPU device or buffer failure.
    #[cfg(feature = "gpu")]
    #[error(transparent)]
    Gpu(#[from] voxcast_gpu::GpuError),

    /// Device or stream arbitration failure.
    #[cfg(feature = "gpu")]
    #[error(transparent)]
    Manager(#[from] voxcast_gpu::ManagerError),
}

/// Result type for ray formation.
pub type Result<T> = std::result::Result<T, RaycastError>;
