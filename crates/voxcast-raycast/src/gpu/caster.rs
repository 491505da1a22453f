//! Host-side launcher for the ray formation shader.

use std::sync::Arc;

use tracing::{debug, warn};
use voxcast_gpu::{CallerId, DeviceId, DeviceManager, GpuError, StreamId, WgpuPlatform, WgpuStream};
use wgpu::util::DeviceExt;

use super::buffers::{GpuOutputInfo, GpuRayOffsets, GpuRendererInfo, GpuVolumeInfo, RayOutputBuffers};
use super::pipeline::RayFormPipeline;
use crate::config::RaycastConfig;
use crate::error::{RaycastError, Result};
use crate::kernel::{check_resolution, RayFormer};
use crate::params::{DepthBuffer, LaunchParams, OutputInfo, RayOffsetTable};
use crate::ray::RayBuffers;

struct DepthTexture {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
    buffer: DepthBuffer,
}

struct PendingLaunch {
    output: OutputInfo,
    buffers: RayOutputBuffers,
}

/// Forms rays on a GPU device claimed from a [`DeviceManager`].
///
/// The caster registers itself as a caller, claims `device` and one stream
/// on it, and gives both back when dropped. Launches are queued on that
/// stream; [`GpuRayCaster::read_rays`] waits for the stream only.
pub struct GpuRayCaster {
    manager: Arc<DeviceManager<WgpuPlatform>>,
    caller: CallerId,
    device: DeviceId,
    stream: StreamId,
    handle: Arc<WgpuStream>,
    pipeline: RayFormPipeline,
    ray_offsets: wgpu::Buffer,
    depth: Option<DepthTexture>,
    pending: Option<PendingLaunch>,
}

impl GpuRayCaster {
    /// Claim `device` and a stream on it, and build the pipeline.
    pub fn new(
        manager: Arc<DeviceManager<WgpuPlatform>>,
        device: DeviceId,
        config: &RaycastConfig,
    ) -> Result<Self> {
        config.validate()?;
        let caller = manager.register_caller();
        match Self::attach(&manager, caller, device, config) {
            Ok((stream, handle, pipeline)) => {
                let ray_offsets = handle.context().device.create_buffer_init(
                    &wgpu::util::BufferInitDescriptor {
                        label: Some("Ray Offsets Buffer"),
                        contents: bytemuck::bytes_of(&GpuRayOffsets::from(&RayOffsetTable::default())),
                        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    },
                );
                debug!(%device, tile_size = config.tile_size, "GPU ray caster ready");
                Ok(Self {
                    manager,
                    caller,
                    device,
                    stream,
                    handle,
                    pipeline,
                    ray_offsets,
                    depth: None,
                    pending: None,
                })
            }
            Err(err) => {
                if let Err(cleanup) = manager.unregister_caller(caller) {
                    warn!(%cleanup, "failed to release caller after setup error");
                }
                Err(err)
            }
        }
    }

    fn attach(
        manager: &DeviceManager<WgpuPlatform>,
        caller: CallerId,
        device: DeviceId,
        config: &RaycastConfig,
    ) -> Result<(StreamId, Arc<WgpuStream>, RayFormPipeline)> {
        manager.acquire_device(caller, device)?;
        let mut slot = None;
        let stream = manager.acquire_stream(caller, &mut slot, device)?;
        let handle = manager.stream_handle(stream)?;
        let pipeline = RayFormPipeline::new(handle.context(), config.tile_size)?;
        Ok((stream, handle, pipeline))
    }

    /// Device the caster runs on.
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Stream launches are queued on.
    pub fn stream(&self) -> StreamId {
        self.stream
    }

    /// Queue a ray formation launch without waiting for it.
    ///
    /// Replaces any launch that has not been read back yet.
    pub fn enqueue_form_rays(&mut self, params: &LaunchParams) -> Result<()> {
        let depth = self.depth.as_ref().ok_or(RaycastError::DepthBufferNotLoaded)?;
        check_resolution(&depth.buffer, &params.output)?;
        self.manager.reserve_accelerator_context(self.stream)?;

        let device = &self.handle.context().device;
        let uniform = |label: &str, contents: &[u8]| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage: wgpu::BufferUsages::UNIFORM,
            })
        };
        let volume_buffer = uniform("Volume Info Buffer", bytemuck::bytes_of(&GpuVolumeInfo::from(&params.volume)));
        let renderer_buffer = uniform(
            "Renderer Info Buffer",
            bytemuck::bytes_of(&GpuRendererInfo::from(&params.renderer)),
        );
        let output_buffer = uniform("Output Info Buffer", bytemuck::bytes_of(&GpuOutputInfo::from(&params.output)));

        let outputs = RayOutputBuffers::new(device, params.output.pixel_count());

        let mut entries = vec![
            wgpu::BindGroupEntry {
                binding: 0,
                resource: volume_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: renderer_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: output_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: self.ray_offsets.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 4,
                resource: wgpu::BindingResource::TextureView(&depth.view),
            },
            wgpu::BindGroupEntry {
                binding: 5,
                resource: wgpu::BindingResource::Sampler(self.pipeline.depth_sampler()),
            },
        ];
        entries.extend(outputs.outputs.iter().zip(6u32..).map(|(buffer, binding)| {
            wgpu::BindGroupEntry {
                binding,
                resource: buffer.as_entire_binding(),
            }
        }));

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Ray Form Bind Group"),
            layout: self.pipeline.bind_group_layout(),
            entries: &entries,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Ray Form Encoder"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Ray Form Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(self.pipeline.pipeline());
            pass.set_bind_group(0, &bind_group, &[]);
            let (groups_x, groups_y) = self.pipeline.workgroups(params.output.width, params.output.height);
            pass.dispatch_workgroups(groups_x, groups_y, 1);
        }
        outputs.copy_to_staging(&mut encoder);

        self.handle.submit(encoder.finish());
        debug!(
            width = params.output.width,
            height = params.output.height,
            stream = ?self.stream,
            "queued ray formation"
        );

        self.pending = Some(PendingLaunch {
            output: params.output,
            buffers: outputs,
        });
        Ok(())
    }

    /// Wait for the last queued launch and read its rays back.
    pub fn read_rays(&mut self) -> Result<RayBuffers> {
        let PendingLaunch { output, buffers } = self.pending.take().ok_or(RaycastError::NoLaunch)?;

        let slice = buffers.staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.manager.synchronize_stream(self.stream)?;
        self.handle.context().device.poll(wgpu::Maintain::Poll);
        rx.recv()
            .map_err(|_| GpuError::BufferMapping)?
            .map_err(|_| GpuError::BufferMapping)?;

        let columns: [Vec<f32>; 7] = {
            let data = slice.get_mapped_range();
            let values: &[f32] = bytemuck::cast_slice(&data);
            let n = buffers.pixel_count();
            std::array::from_fn(|i| values[i * n..(i + 1) * n].to_vec())
        };
        buffers.staging.unmap();

        RayBuffers::from_columns(&output, columns).ok_or_else(|| GpuError::BufferMapping.into())
    }
}

impl RayFormer for GpuRayCaster {
    fn load_depth_buffer(&mut self, depth: &DepthBuffer) -> Result<()> {
        let ctx = self.handle.context();
        let size = wgpu::Extent3d {
            width: depth.width(),
            height: depth.height(),
            depth_or_array_layers: 1,
        };
        let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Depth Texture"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R32Float,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        ctx.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(depth.values()),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(depth.width() * 4),
                rows_per_image: Some(depth.height()),
            },
            size,
        );
        let view = texture.create_view(&Default::default());
        debug!(width = depth.width(), height = depth.height(), "uploaded depth texture");
        self.depth = Some(DepthTexture {
            _texture: texture,
            view,
            buffer: depth.clone(),
        });
        Ok(())
    }

    fn unload_depth_buffer(&mut self) {
        if self.depth.take().is_some() {
            debug!("released depth texture");
        }
    }

    fn load_ray_offsets(&mut self, table: &RayOffsetTable) -> Result<()> {
        self.handle.context().queue.write_buffer(
            &self.ray_offsets,
            0,
            bytemuck::bytes_of(&GpuRayOffsets::from(table)),
        );
        Ok(())
    }

    fn form_rays(&mut self, params: &LaunchParams) -> Result<RayBuffers> {
        self.enqueue_form_rays(params)?;
        self.read_rays()
    }
}

impl Drop for GpuRayCaster {
    fn drop(&mut self) {
        self.pending = None;
        if let Err(err) = self.manager.unregister_caller(self.caller) {
            warn!(%err, "failed to release ray caster resources");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::CpuRayKernel;
    use crate::math::from_row_major;
    use crate::params::{ClippingPlane, RendererInfo, VolumeInfo};
    use voxcast_gpu::GpuConfig;

    fn manager() -> Arc<DeviceManager<WgpuPlatform>> {
        let platform = WgpuPlatform::new(&GpuConfig::default()).unwrap();
        Arc::new(DeviceManager::new(platform))
    }

    fn scene(width: u32, height: u32) -> (LaunchParams, DepthBuffer) {
        let mut renderer = RendererInfo::new(from_row_major(&[
            12.0, 0.0, 0.0, -1.0, //
            0.0, 12.0, 0.0, -1.0, //
            0.0, 0.0, 14.0, -2.0, //
            0.0, 0.0, 0.1, 1.0,
        ]));
        let open = ClippingPlane::new([1.0, 0.0, 0.0], -100.0);
        let cut = ClippingPlane::new([0.0, 0.0, 1.0], -6.0);
        renderer.set_clipping_planes(&[cut, open, open, open, open, open]);
        let params = LaunchParams {
            volume: VolumeInfo::new([0.0, 10.0, 0.0, 10.0, 0.0, 10.0], [1.0, 1.0, 1.0]),
            renderer,
            output: OutputInfo::new(width, height),
        };
        (params, DepthBuffer::filled(width, height, 0.8).unwrap())
    }

    #[test]
    #[ignore = "requires GPU"]
    fn test_matches_cpu_kernel() {
        let (params, depth) = scene(40, 24);
        let mut gpu = GpuRayCaster::new(manager(), DeviceId(0), &RaycastConfig::default()).unwrap();
        let mut cpu = CpuRayKernel::default();
        gpu.load_depth_buffer(&depth).unwrap();
        cpu.load_depth_buffer(&depth).unwrap();

        let expected = cpu.form_rays(&params).unwrap();
        let actual = gpu.form_rays(&params).unwrap();
        for (a, e) in actual.rays().zip(expected.rays()) {
            assert!((a.steps - e.steps).abs() < 1e-3, "{a:?} != {e:?}");
            assert!((a.start - e.start).norm() < 1e-3, "{a:?} != {e:?}");
        }
    }

    #[test]
    #[ignore = "requires GPU"]
    fn test_caster_releases_claims_on_drop() {
        let manager = manager();
        let caster = GpuRayCaster::new(Arc::clone(&manager), DeviceId(0), &RaycastConfig::default()).unwrap();
        assert_eq!(manager.claims_on(DeviceId(0)), 1);
        assert_eq!(manager.stream_owner_count(caster.stream()), 1);
        drop(caster);
        assert_eq!(manager.claims_on(DeviceId(0)), 0);
        assert!(!manager.platform().is_open(DeviceId(0)));
    }

    #[test]
    #[ignore = "requires GPU"]
    fn test_read_without_launch() {
        let mut caster = GpuRayCaster::new(manager(), DeviceId(0), &RaycastConfig::default()).unwrap();
        assert!(matches!(caster.read_rays(), Err(RaycastError::NoLaunch)));

        let (params, _) = scene(4, 4);
        assert!(matches!(
            caster.enqueue_form_rays(&params),
            Err(RaycastError::DepthBufferNotLoaded)
        ));
    }
}
