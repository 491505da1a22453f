//! wgpu compute pipeline for ray formation.

use voxcast_gpu::GpuContext;

use super::buffers::RAY_OUTPUT_COUNT;
use crate::config::{MAX_TILE_SIZE, MIN_TILE_SIZE};
use crate::error::{RaycastError, Result};

/// Check that a device opened with `limits` can run `tile_size` workgroups
/// writing every ray output.
pub fn check_limits(limits: &wgpu::Limits, tile_size: u32) -> Result<()> {
    let needs = [
        (
            "max_storage_buffers_per_shader_stage",
            RAY_OUTPUT_COUNT as u32,
            limits.max_storage_buffers_per_shader_stage,
        ),
        (
            "max_compute_invocations_per_workgroup",
            tile_size * tile_size,
            limits.max_compute_invocations_per_workgroup,
        ),
        ("max_compute_workgroup_size_x", tile_size, limits.max_compute_workgroup_size_x),
        ("max_compute_workgroup_size_y", tile_size, limits.max_compute_workgroup_size_y),
    ];
    for (limit, required, available) in needs {
        if available < required {
            return Err(RaycastError::DeviceLimits {
                limit,
                required,
                available,
            });
        }
    }
    Ok(())
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn output_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Ray formation compute pipeline for one tile size.
pub struct RayFormPipeline {
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    depth_sampler: wgpu::Sampler,
    tile_size: u32,
}

impl RayFormPipeline {
    /// Build the pipeline with `tile_size × tile_size` workgroups.
    pub fn new(ctx: &GpuContext, tile_size: u32) -> Result<Self> {
        if !(MIN_TILE_SIZE..=MAX_TILE_SIZE).contains(&tile_size) {
            return Err(RaycastError::InvalidTileSize(tile_size));
        }
        check_limits(&ctx.device.limits(), tile_size)?;

        let shader_module = ctx.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Ray Form Shader"),
            source: wgpu::ShaderSource::Wgsl(super::shaders::shader_source(tile_size).into()),
        });

        let bind_group_layout = ctx.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Ray Form Bind Group Layout"),
            entries: &[
                // Volume, renderer, output and ray offset uniforms
                uniform_entry(0),
                uniform_entry(1),
                uniform_entry(2),
                uniform_entry(3),
                // Depth texture
                wgpu::BindGroupLayoutEntry {
                    binding: 4,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                // Depth sampler
                wgpu::BindGroupLayoutEntry {
                    binding: 5,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering),
                    count: None,
                },
                // Ray start, increment and step outputs
                output_entry(6),
                output_entry(7),
                output_entry(8),
                output_entry(9),
                output_entry(10),
                output_entry(11),
                output_entry(12),
            ],
        });

        let pipeline_layout = ctx.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Ray Form Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = ctx.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Ray Form Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader_module,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        let depth_sampler = ctx.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Depth Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Ok(Self {
            pipeline,
            bind_group_layout,
            depth_sampler,
            tile_size,
        })
    }

    /// The compiled pipeline.
    pub fn pipeline(&self) -> &wgpu::ComputePipeline {
        &self.pipeline
    }

    /// Layout of bindings 0 through 12.
    pub fn bind_group_layout(&self) -> &wgpu::BindGroupLayout {
        &self.bind_group_layout
    }

    /// Nearest, clamp-to-edge sampler for the depth texture.
    pub fn depth_sampler(&self) -> &wgpu::Sampler {
        &self.depth_sampler
    }

    /// Workgroup edge length.
    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Workgroup counts covering a `width × height` image.
    pub fn workgroups(&self, width: u32, height: u32) -> (u32, u32) {
        (width.div_ceil(self.tile_size), height.div_ceil(self.tile_size))
    }
}
