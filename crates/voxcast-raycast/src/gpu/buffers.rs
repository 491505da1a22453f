//! GPU-side layouts of the launch parameters and ray outputs.
//!
//! Uniform structs follow WGSL uniform layout rules: every member is a
//! 16-byte aligned vec4, or scalars packed into one.

use bytemuck::{Pod, Zeroable};

use crate::params::{
    OutputInfo, RayOffsetTable, RendererInfo, VolumeInfo, CLIPPING_PLANE_COUNT, RAY_OFFSET_TABLE_SIZE,
};

/// Number of per-pixel output arrays.
pub const RAY_OUTPUT_COUNT: usize = 7;

const RAY_OUTPUT_LABELS: [&str; RAY_OUTPUT_COUNT] = [
    "Ray Start X",
    "Ray Start Y",
    "Ray Start Z",
    "Ray Increment X",
    "Ray Increment Y",
    "Ray Increment Z",
    "Ray Steps",
];

/// Volume geometry as the shader sees it.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct GpuVolumeInfo {
    /// xmin, xmax, ymin, ymax
    pub bounds_xy: [f32; 4],
    /// zmin, zmax, unused, unused
    pub bounds_z: [f32; 4],
    /// Spacing xyz, minimum spacing in w.
    pub spacing: [f32; 4],
}

impl From<&VolumeInfo> for GpuVolumeInfo {
    fn from(volume: &VolumeInfo) -> Self {
        let b = volume.bounds;
        let s = volume.spacing;
        Self {
            bounds_xy: [b[0], b[1], b[2], b[3]],
            bounds_z: [b[4], b[5], 0.0, 0.0],
            spacing: [s.x, s.y, s.z, volume.min_spacing],
        }
    }
}

/// Renderer geometry as the shader sees it.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct GpuRendererInfo {
    /// Rows of the view-to-voxels transform.
    pub view_to_voxels: [[f32; 4]; 4],
    /// Normal in xyz, offset in w.
    pub clipping_planes: [[f32; 4]; CLIPPING_PLANE_COUNT],
    /// 0 or 6.
    pub clipping_plane_count: u32,
    /// Gradient shading scale.
    pub grad_shade_scale: f32,
    /// Gradient shading shift.
    pub grad_shade_shift: f32,
    /// Padding for alignment
    pub _pad: f32,
}

impl From<&RendererInfo> for GpuRendererInfo {
    fn from(renderer: &RendererInfo) -> Self {
        let mut clipping_planes = [[0.0; 4]; CLIPPING_PLANE_COUNT];
        for (slot, plane) in clipping_planes.iter_mut().zip(renderer.clipping_planes()) {
            *slot = [plane.normal.x, plane.normal.y, plane.normal.z, plane.offset];
        }
        let (grad_shade_scale, grad_shade_shift) = renderer.gradient_shading();
        Self {
            view_to_voxels: crate::math::rows(renderer.view_to_voxels()),
            clipping_planes,
            clipping_plane_count: renderer.clipping_plane_count() as u32,
            grad_shade_scale,
            grad_shade_shift,
            _pad: 0.0,
        }
    }
}

/// Output resolution as the shader sees it.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct GpuOutputInfo {
    /// Width and height.
    pub resolution: [u32; 2],
    /// Padding for alignment
    pub _pad: [u32; 2],
}

impl From<&OutputInfo> for GpuOutputInfo {
    fn from(output: &OutputInfo) -> Self {
        Self {
            resolution: [output.width, output.height],
            _pad: [0; 2],
        }
    }
}

const RAY_OFFSET_VEC4S: usize = RAY_OFFSET_TABLE_SIZE * RAY_OFFSET_TABLE_SIZE / 4;

/// The 16x16 jitter table packed four values per vec4, row-major.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct GpuRayOffsets {
    /// Packed table.
    pub values: [[f32; 4]; RAY_OFFSET_VEC4S],
}

impl From<&RayOffsetTable> for GpuRayOffsets {
    fn from(table: &RayOffsetTable) -> Self {
        let mut values = [[0.0; 4]; RAY_OFFSET_VEC4S];
        for (i, v) in table.0.iter().flatten().enumerate() {
            values[i / 4][i % 4] = *v;
        }
        Self { values }
    }
}

/// The seven per-pixel storage arrays a launch writes, plus one staging
/// buffer they are copied into for readback.
pub struct RayOutputBuffers {
    /// Storage buffers in binding order: start xyz, increment xyz, steps.
    pub outputs: [wgpu::Buffer; RAY_OUTPUT_COUNT],
    /// `MAP_READ` buffer holding all seven arrays back to back.
    pub staging: wgpu::Buffer,
    pixel_count: usize,
}

impl RayOutputBuffers {
    /// Allocate outputs for `pixel_count` pixels.
    pub fn new(device: &wgpu::Device, pixel_count: usize) -> Self {
        let size = Self::column_bytes(pixel_count);
        let outputs = RAY_OUTPUT_LABELS.map(|label| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            })
        });
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Ray Readback Buffer"),
            size: size * RAY_OUTPUT_COUNT as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        Self {
            outputs,
            staging,
            pixel_count,
        }
    }

    /// Bytes in one output array.
    pub fn column_bytes(pixel_count: usize) -> u64 {
        (pixel_count * std::mem::size_of::<f32>()) as u64
    }

    /// Pixels per array.
    pub fn pixel_count(&self) -> usize {
        self.pixel_count
    }

    /// Record copies of every output array into the staging buffer.
    pub fn copy_to_staging(&self, encoder: &mut wgpu::CommandEncoder) {
        let size = Self::column_bytes(self.pixel_count);
        for (i, output) in self.outputs.iter().enumerate() {
            encoder.copy_buffer_to_buffer(output, 0, &self.staging, i as u64 * size, size);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Mat4;
    use crate::params::ClippingPlane;

    #[test]
    fn test_uniform_sizes() {
        assert_eq!(std::mem::size_of::<GpuVolumeInfo>(), 48);
        assert_eq!(std::mem::size_of::<GpuRendererInfo>(), 176);
        assert_eq!(std::mem::size_of::<GpuOutputInfo>(), 16);
        assert_eq!(std::mem::size_of::<GpuRayOffsets>(), 1024);
    }

    #[test]
    fn test_volume_packing() {
        let volume = VolumeInfo::new([1.0, 2.0, 3.0, 4.0, 5.0, 6.0], [0.5, 0.25, 1.0]);
        let gpu = GpuVolumeInfo::from(&volume);
        assert_eq!(gpu.bounds_xy, [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(gpu.bounds_z[..2], [5.0, 6.0]);
        assert_eq!(gpu.spacing, [0.5, 0.25, 1.0, 0.25]);
    }

    #[test]
    fn test_renderer_packing() {
        let mut renderer = RendererInfo::new(Mat4::identity());
        let gpu = GpuRendererInfo::from(&renderer);
        assert_eq!(gpu.clipping_plane_count, 0);
        assert_eq!(gpu.view_to_voxels[3], [0.0, 0.0, 0.0, 1.0]);

        renderer.set_clipping_planes(&[ClippingPlane::new([0.0, 1.0, 0.0], -2.0); 6]);
        let gpu = GpuRendererInfo::from(&renderer);
        assert_eq!(gpu.clipping_plane_count, 6);
        assert_eq!(gpu.clipping_planes[5], [0.0, 1.0, 0.0, -2.0]);
    }

    #[test]
    fn test_ray_offsets_packing() {
        let mut table = RayOffsetTable::default();
        table.0[1][5] = 0.75;
        let gpu = GpuRayOffsets::from(&table);
        // Row 1, column 5 is element 21.
        assert_eq!(gpu.values[5][1], 0.75);
    }
}
