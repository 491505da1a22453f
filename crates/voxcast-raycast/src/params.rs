//! Per-frame constant parameter blocks.
//!
//! A launch reads three blocks, bundled in [`LaunchParams`]: the volume's
//! voxel-space geometry, the renderer's transform and clipping planes, and
//! the output image resolution. The depth buffer and ray offset table are
//! bound separately because they are uploaded on their own schedule.

use tracing::debug;

use crate::config::RaycastConfig;
use crate::error::{RaycastError, Result};
use crate::math::{Mat4, Vec3};

/// Number of clipping planes honored; any other count disables clipping.
pub const CLIPPING_PLANE_COUNT: usize = 6;

/// Edge length of the square ray offset table.
pub const RAY_OFFSET_TABLE_SIZE: usize = 16;

/// Default gradient shading darkness.
pub const DEFAULT_GRADIENT_DARKNESS: f32 = 0.605;

/// Voxel-space geometry of the volume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeInfo {
    /// `[xmin, xmax, ymin, ymax, zmin, zmax]` in voxels.
    pub bounds: [f32; 6],
    /// Voxel spacing per axis.
    pub spacing: Vec3,
    /// Smallest of the three spacings.
    pub min_spacing: f32,
}

impl VolumeInfo {
    /// Create volume info, deriving the minimum spacing.
    pub fn new(bounds: [f32; 6], spacing: [f32; 3]) -> Self {
        Self {
            bounds,
            spacing: Vec3::from(spacing),
            min_spacing: spacing[0].min(spacing[1]).min(spacing[2]),
        }
    }
}

/// A half-space boundary in voxel space.
///
/// Points with positive signed distance are cut away.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClippingPlane {
    /// Plane normal.
    pub normal: Vec3,
    /// Offset such that `normal · p + offset` is the signed distance.
    pub offset: f32,
}

impl ClippingPlane {
    /// Create a plane from its normal and offset.
    pub fn new(normal: [f32; 3], offset: f32) -> Self {
        Self {
            normal: Vec3::from(normal),
            offset,
        }
    }

    /// Signed distance of `p` along the normal.
    #[inline]
    pub fn signed_distance(&self, p: &Vec3) -> f32 {
        self.normal.x * p.x + self.normal.y * p.y + self.normal.z * p.z + self.offset
    }

    /// Bring a world-space plane, given by a normal and a point on it, into
    /// voxel space.
    ///
    /// The normal goes through the transpose of `voxels_to_world`; the point
    /// goes through `world_to_voxels` with a homogeneous divide.
    pub fn from_world(
        normal: [f32; 3],
        origin: [f32; 3],
        world_to_voxels: &Mat4,
        voxels_to_world: &Mat4,
    ) -> Self {
        let n = Vec3::from(normal);
        let voxel_normal = Vec3::from_fn(|j, _| {
            n.x * voxels_to_world[(0, j)] + n.y * voxels_to_world[(1, j)] + n.z * voxels_to_world[(2, j)]
        });

        let m = world_to_voxels;
        let [ox, oy, oz] = origin;
        let row = |i: usize| m[(i, 0)] * ox + m[(i, 1)] * oy + m[(i, 2)] * oz + m[(i, 3)];
        let mut voxel_origin = Vec3::new(row(0), row(1), row(2));
        let w = row(3);
        if w != 1.0 {
            voxel_origin /= w;
        }

        Self {
            normal: voxel_normal,
            offset: -voxel_normal.dot(&voxel_origin),
        }
    }
}

/// Renderer and camera state for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RendererInfo {
    view_to_voxels: Mat4,
    clipping_planes: [ClippingPlane; CLIPPING_PLANE_COUNT],
    clipping_plane_count: usize,
    grad_shade_scale: f32,
    grad_shade_shift: f32,
}

impl Default for RendererInfo {
    fn default() -> Self {
        Self::new(Mat4::identity())
    }
}

impl RendererInfo {
    /// Create renderer info from an already adjusted view-to-voxels
    /// transform (see [`RendererInfo::set_view_to_voxels`]).
    pub fn new(view_to_voxels: Mat4) -> Self {
        Self {
            view_to_voxels,
            clipping_planes: [ClippingPlane::default(); CLIPPING_PLANE_COUNT],
            clipping_plane_count: 0,
            grad_shade_scale: DEFAULT_GRADIENT_DARKNESS,
            grad_shade_shift: 1.0 - DEFAULT_GRADIENT_DARKNESS,
        }
    }

    /// Create renderer info with the shading constants from `config`.
    pub fn from_config(view_to_voxels: Mat4, config: &RaycastConfig) -> Result<Self> {
        let mut info = Self::new(view_to_voxels);
        info.set_gradient_shading(config.gradient_darkness)?;
        Ok(info)
    }

    /// The transform taking `(u, v, depth, 1)` with `u, v` in [0, 1] to voxels.
    pub fn view_to_voxels(&self) -> &Mat4 {
        &self.view_to_voxels
    }

    /// Set the transform from a view-to-voxels matrix over normalized
    /// device coordinates.
    ///
    /// Folds the mapping from pixel coordinates in [0, 1] into the first
    /// two columns: `x_ndc = 1 - 2u` and `y_ndc = 2v - 1`.
    pub fn set_view_to_voxels(&mut self, matrix: &Mat4) {
        let mut m = *matrix;
        for i in 0..4 {
            m[(i, 3)] += m[(i, 0)] - m[(i, 1)];
            m[(i, 0)] *= -2.0;
            m[(i, 1)] *= 2.0;
        }
        self.view_to_voxels = m;
    }

    /// Install clipping planes.
    ///
    /// Exactly [`CLIPPING_PLANE_COUNT`] planes enable clipping; any other
    /// number disables it.
    pub fn set_clipping_planes(&mut self, planes: &[ClippingPlane]) {
        if planes.len() == CLIPPING_PLANE_COUNT {
            self.clipping_planes.copy_from_slice(planes);
            self.clipping_plane_count = CLIPPING_PLANE_COUNT;
        } else {
            debug!(count = planes.len(), "clipping disabled: plane count is not 6");
            self.clipping_plane_count = 0;
        }
    }

    /// Active clipping planes; empty when clipping is disabled.
    pub fn clipping_planes(&self) -> &[ClippingPlane] {
        &self.clipping_planes[..self.clipping_plane_count]
    }

    /// Number of active clipping planes (0 or 6).
    pub fn clipping_plane_count(&self) -> usize {
        self.clipping_plane_count
    }

    /// Set gradient shading from a darkness in [0, 1].
    pub fn set_gradient_shading(&mut self, darkness: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&darkness) {
            return Err(RaycastError::InvalidShading(darkness));
        }
        self.grad_shade_scale = darkness;
        self.grad_shade_shift = 1.0 - darkness;
        Ok(())
    }

    /// `(scale, shift)` gradient shading constants.
    pub fn gradient_shading(&self) -> (f32, f32) {
        (self.grad_shade_scale, self.grad_shade_shift)
    }
}

/// Output image geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputInfo {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl OutputInfo {
    /// Create output info.
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels.
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Linear index of pixel `(x, y)`.
    #[inline]
    pub fn index(&self, x: u32, y: u32) -> usize {
        x as usize + y as usize * self.width as usize
    }

    /// Reject zero-sized images.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(RaycastError::InvalidResolution {
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }
}

/// Everything one launch reads besides the bound textures.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchParams {
    /// Volume geometry.
    pub volume: VolumeInfo,
    /// Renderer geometry.
    pub renderer: RendererInfo,
    /// Output geometry.
    pub output: OutputInfo,
}

/// Normalized device depth, one value per output pixel, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthBuffer {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl DepthBuffer {
    /// Wrap `values`, which must hold exactly `width * height` depths.
    pub fn new(width: u32, height: u32, values: Vec<f32>) -> Result<Self> {
        OutputInfo::new(width, height).validate()?;
        let expected = width as usize * height as usize;
        if values.len() != expected {
            return Err(RaycastError::DepthBufferSize {
                expected,
                actual: values.len(),
            });
        }
        Ok(Self {
            width,
            height,
            values,
        })
    }

    /// A depth buffer holding `depth` everywhere.
    pub fn filled(width: u32, height: u32, depth: f32) -> Result<Self> {
        Self::new(width, height, vec![depth; width as usize * height as usize])
    }

    /// Width in texels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in texels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw depth values.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Point-sample at normalized coordinates with clamped addressing.
    pub fn sample(&self, u: f32, v: f32) -> f32 {
        let x = texel(u, self.width);
        let y = texel(v, self.height);
        self.values[x as usize + y as usize * self.width as usize]
    }
}

/// Nearest texel for a normalized coordinate, clamped to the edge.
fn texel(coord: f32, size: u32) -> u32 {
    ((coord * size as f32).floor().max(0.0) as u32).min(size - 1)
}

/// 16x16 jitter table for anti-aliased sampling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayOffsetTable(pub [[f32; RAY_OFFSET_TABLE_SIZE]; RAY_OFFSET_TABLE_SIZE]);

impl Default for RayOffsetTable {
    fn default() -> Self {
        Self([[0.0; RAY_OFFSET_TABLE_SIZE]; RAY_OFFSET_TABLE_SIZE])
    }
}

impl RayOffsetTable {
    /// Offset for pixel `(x, y)`, tiled across the image.
    pub fn offset(&self, x: u32, y: u32) -> f32 {
        self.0[y as usize % RAY_OFFSET_TABLE_SIZE][x as usize % RAY_OFFSET_TABLE_SIZE]
    }
}
