//! Per-pixel ray formation.
//!
//! [`form_ray`] runs the full pipeline for one pixel: unproject, clip to the
//! cutting planes, clip to the volume, derive the step count. [`CpuRayKernel`]
//! runs it over a whole image in tiles, in parallel.

use rayon::prelude::*;
use tracing::debug;

use crate::clip::{clip_to_bounds, clip_to_planes};
use crate::config::RaycastConfig;
use crate::error::{RaycastError, Result};
use crate::math::{transform_point, Vec3};
use crate::params::{DepthBuffer, LaunchParams, OutputInfo, RayOffsetTable, VolumeInfo};
use crate::ray::{Ray, RayBuffers, Segment};

/// Something that forms rays for a whole image.
pub trait RayFormer {
    /// Bind `depth` for subsequent launches, replacing any bound buffer.
    fn load_depth_buffer(&mut self, depth: &DepthBuffer) -> Result<()>;

    /// Release the bound depth buffer. Launches fail until another is loaded.
    fn unload_depth_buffer(&mut self);

    /// Upload the sampling jitter table.
    fn load_ray_offsets(&mut self, table: &RayOffsetTable) -> Result<()>;

    /// Form one ray per output pixel.
    fn form_rays(&mut self, params: &LaunchParams) -> Result<RayBuffers>;
}

/// Form the ray for pixel `(x, y)`.
pub fn form_ray(params: &LaunchParams, depth: &DepthBuffer, x: u32, y: u32) -> Ray {
    let (width, height) = (params.output.width as f32, params.output.height as f32);
    let u = x as f32 / width;
    let v = y as f32 / height;
    // Depth is read at the texel centre so each pixel gets its own value.
    let d = depth.sample((x as f32 + 0.5) / width, (y as f32 + 0.5) / height);

    let m = params.renderer.view_to_voxels();
    let mut segment = Segment::new(transform_point(m, u, v, 0.0), transform_point(m, u, v, d));

    clip_to_planes(&mut segment, params.renderer.clipping_planes());
    clip_to_bounds(&mut segment, &params.volume.bounds);
    step_ray(&segment, &params.volume)
}

/// Turn a clipped segment into a sampling ray.
///
/// The step count is the segment length measured in voxel spacing units,
/// relative to the finest spacing. Segments with no length get a zero
/// increment.
pub fn step_ray(segment: &Segment, volume: &VolumeInfo) -> Ray {
    let dir = segment.direction();
    let scaled = dir.component_mul(&volume.spacing);
    let steps = scaled.norm() / volume.min_spacing;
    let increment = if steps > 0.0 { dir / steps } else { Vec3::zeros() };
    Ray {
        start: segment.start,
        increment,
        steps,
    }
}

/// The depth buffer and output image must agree on resolution.
pub(crate) fn check_resolution(depth: &DepthBuffer, output: &OutputInfo) -> Result<()> {
    output.validate()?;
    if depth.width() != output.width || depth.height() != output.height {
        return Err(RaycastError::ResolutionMismatch {
            depth: [depth.width(), depth.height()],
            output: [output.width, output.height],
        });
    }
    Ok(())
}

/// Reference ray former on the CPU.
///
/// Evaluates the same arithmetic as the compute shader, tile by tile, with
/// tiles distributed over the rayon thread pool.
#[derive(Debug, Clone)]
pub struct CpuRayKernel {
    tile_size: u32,
    depth: Option<DepthBuffer>,
    ray_offsets: RayOffsetTable,
}

impl CpuRayKernel {
    /// Create a kernel with the tile size from `config`.
    pub fn new(config: &RaycastConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            tile_size: config.tile_size,
            depth: None,
            ray_offsets: RayOffsetTable::default(),
        })
    }

    /// Tile edge length.
    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Currently bound depth buffer.
    pub fn depth_buffer(&self) -> Option<&DepthBuffer> {
        self.depth.as_ref()
    }

    /// Currently loaded jitter table.
    pub fn ray_offsets(&self) -> &RayOffsetTable {
        &self.ray_offsets
    }
}

impl Default for CpuRayKernel {
    fn default() -> Self {
        Self {
            tile_size: RaycastConfig::default().tile_size,
            depth: None,
            ray_offsets: RayOffsetTable::default(),
        }
    }
}

impl RayFormer for CpuRayKernel {
    fn load_depth_buffer(&mut self, depth: &DepthBuffer) -> Result<()> {
        debug!(width = depth.width(), height = depth.height(), "loaded depth buffer");
        self.depth = Some(depth.clone());
        Ok(())
    }

    fn unload_depth_buffer(&mut self) {
        if self.depth.take().is_some() {
            debug!("unloaded depth buffer");
        }
    }

    fn load_ray_offsets(&mut self, table: &RayOffsetTable) -> Result<()> {
        self.ray_offsets = *table;
        Ok(())
    }

    fn form_rays(&mut self, params: &LaunchParams) -> Result<RayBuffers> {
        let depth = self.depth.as_ref().ok_or(RaycastError::DepthBufferNotLoaded)?;
        let output = params.output;
        check_resolution(depth, &output)?;

        let tile = self.tile_size;
        let tiles_x = output.width.div_ceil(tile);
        let tiles_y = output.height.div_ceil(tile);
        debug!(
            width = output.width,
            height = output.height,
            tiles = tiles_x * tiles_y,
            "forming rays on CPU"
        );

        // Each tile is formed independently, then scattered into place.
        let tiles: Vec<Vec<(usize, Ray)>> = (0..tiles_x * tiles_y)
            .into_par_iter()
            .map(|t| {
                let x0 = (t % tiles_x) * tile;
                let y0 = (t / tiles_x) * tile;
                let x1 = (x0 + tile).min(output.width);
                let y1 = (y0 + tile).min(output.height);
                let mut rays = Vec::with_capacity(((x1 - x0) * (y1 - y0)) as usize);
                for y in y0..y1 {
                    for x in x0..x1 {
                        rays.push((output.index(x, y), form_ray(params, depth, x, y)));
                    }
                }
                rays
            })
            .collect();

        let mut buffers = RayBuffers::new(&output);
        for (index, ray) in tiles.into_iter().flatten() {
            buffers.write(index, &ray);
        }
        Ok(buffers)
    }
}
