//! wgpu implementation of [`GpuBackend`].
//!
//! Paints are fullscreen-triangle render passes from the
//! [`rt2d_kernels::BLIT_SOURCE`] module, recorded into one command encoder
//! that `submit` flushes. The `R32Uint` atomic surface is backed by a storage
//! buffer of `atomic<u32>` rather than a texture, since storage-texture atomics
//! are not portable.
//!
//! Blending into `Rgba32Float` targets needs `Features::FLOAT32_BLENDABLE`;
//! [`WgpuBackend::headless`] requests it when the adapter offers it.

mod pipelines;
mod readback;

use std::collections::HashMap;

use smallvec::SmallVec;
use wgpu::util::DeviceExt;

use rt2d_kernels::{BlitParams, ConvertParams, TraceParams, KERNELS_SOURCE};

use super::ops::{BlendMode, BlitOp};
use super::{
    BoundTargets, BufferId, ConvertBindings, GpuBackend, KernelSet, ResourceStats, TextureDesc,
    TextureFormat, TextureId, TextureLevel, TraceBindings,
};
use crate::light::EmittedRay;
use crate::util::{Error, FloatImage, Result};
use pipelines::{BlitPipelines, KernelPipelines};

fn wgpu_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::R32Uint => wgpu::TextureFormat::R32Uint,
    }
}

enum Resource {
    Texture(wgpu::Texture),
    /// `R32Uint` random-write surface
    Atomic(wgpu::Buffer),
}

struct GpuTexture {
    desc: TextureDesc,
    resource: Resource,
}

impl GpuTexture {
    fn texture(&self) -> Result<&wgpu::Texture> {
        match &self.resource {
            Resource::Texture(t) => Ok(t),
            Resource::Atomic(_) => Err(Error::FormatMismatch {
                expected: "color format".into(),
                actual: self.desc.format.name().into(),
            }),
        }
    }

    fn atomic(&self) -> Result<&wgpu::Buffer> {
        match &self.resource {
            Resource::Atomic(b) => Ok(b),
            Resource::Texture(_) => Err(Error::FormatMismatch {
                expected: TextureFormat::R32Uint.name().into(),
                actual: self.desc.format.name().into(),
            }),
        }
    }

    fn check_level(&self, level: u32) -> Result<()> {
        if level >= self.desc.mip_levels {
            return Err(Error::MipOutOfRange { level, count: self.desc.mip_levels });
        }
        Ok(())
    }

    /// View of `count` levels starting at `base`.
    fn view(&self, base: u32, count: u32) -> Result<wgpu::TextureView> {
        Ok(self.texture()?.create_view(&wgpu::TextureViewDescriptor {
            label: Some(&self.desc.label),
            base_mip_level: base,
            mip_level_count: Some(count),
            ..Default::default()
        }))
    }
}

struct GpuRayBuffer {
    buffer: wgpu::Buffer,
    capacity: usize,
}

/// Real-device backend.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    textures: HashMap<u32, GpuTexture>,
    buffers: HashMap<u32, GpuRayBuffer>,
    next_id: u32,
    encoder: Option<wgpu::CommandEncoder>,
    blit: BlitPipelines,
    kernel_source: String,
    kernels: KernelPipelines,
    bound: BoundTargets,
    stats: ResourceStats,
}

impl std::fmt::Debug for WgpuBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuBackend")
            .field("textures", &self.textures.len())
            .field("buffers", &self.buffers.len())
            .field("blit_pipelines", &self.blit.len())
            .field("kernels", &self.kernels.set())
            .field("stats", &self.stats)
            .finish()
    }
}

impl WgpuBackend {
    /// Wrap an existing device, e.g. the host application's.
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let blit = BlitPipelines::new(&device);
        Self {
            device,
            queue,
            textures: HashMap::new(),
            buffers: HashMap::new(),
            next_id: 1,
            encoder: None,
            blit,
            kernel_source: KERNELS_SOURCE.to_string(),
            kernels: KernelPipelines::default(),
            bound: SmallVec::new(),
            stats: ResourceStats::default(),
        }
    }

    /// Create a device without a surface.
    pub fn headless() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| Error::Gpu(format!("no suitable adapter: {e}")))?;
        let info = adapter.get_info();
        tracing::info!(name = %info.name, backend = ?info.backend, "using adapter");

        let required_features = adapter.features() & wgpu::Features::FLOAT32_BLENDABLE;
        if required_features.is_empty() {
            tracing::warn!("adapter lacks FLOAT32_BLENDABLE; blended paints into RGBA32F will fail");
        }
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("rt2d_device"),
            required_features,
            required_limits: adapter.limits(),
            ..Default::default()
        }))
        .map_err(|e| Error::Gpu(format!("device request failed: {e}")))?;
        Ok(Self::new(device, queue))
    }

    /// Use a different kernel source on the next `resolve_kernels`.
    pub fn with_kernel_source(mut self, source: impl Into<String>) -> Self {
        self.kernel_source = source.into();
        self
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Texture behind `id`, for hosts that draw the G-buffer themselves.
    pub fn texture(&self, id: TextureId) -> Option<&wgpu::Texture> {
        self.textures.get(&id.0).and_then(|t| t.texture().ok())
    }

    fn entry(&self, id: TextureId) -> Result<&GpuTexture> {
        self.textures.get(&id.0).ok_or(Error::UnknownTexture(id.0))
    }

    fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        let device = &self.device;
        self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("rt2d_frame") })
        })
    }

    fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Run `f` inside an out-of-memory error scope.
    fn allocate<T>(&self, label: &str, bytes: u64, f: impl FnOnce(&wgpu::Device) -> T) -> Result<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let value = f(&self.device);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(wgpu::Error::OutOfMemory { .. }) => Err(Error::oom(label, bytes)),
            Some(e) => Err(Error::Gpu(e.to_string())),
            None => Ok(value),
        }
    }

    fn uniform<T: bytemuck::Pod>(&self, label: &str, value: &T) -> wgpu::Buffer {
        self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::bytes_of(value),
            usage: wgpu::BufferUsages::UNIFORM,
        })
    }
}

impl GpuBackend for WgpuBackend {
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId> {
        if desc.width == 0 || desc.height == 0 {
            return Err(Error::InvalidDimensions { width: desc.width, height: desc.height });
        }
        let bytes = desc.byte_size();
        let resource = if desc.format == TextureFormat::R32Uint {
            self.allocate(&desc.label, bytes, |device| {
                Resource::Atomic(device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&desc.label),
                    size: desc.width as u64 * desc.height as u64 * 4,
                    usage: wgpu::BufferUsages::STORAGE
                        | wgpu::BufferUsages::COPY_SRC
                        | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                }))
            })?
        } else {
            let mut usage = wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST;
            if desc.random_write {
                usage |= wgpu::TextureUsages::STORAGE_BINDING;
            }
            self.allocate(&desc.label, bytes, |device| {
                Resource::Texture(device.create_texture(&wgpu::TextureDescriptor {
                    label: Some(&desc.label),
                    size: wgpu::Extent3d { width: desc.width, height: desc.height, depth_or_array_layers: 1 },
                    mip_level_count: desc.mip_levels,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: wgpu_format(desc.format),
                    usage,
                    view_formats: &[],
                }))
            })?
        };

        let id = self.alloc_id();
        self.textures.insert(id, GpuTexture { desc: desc.clone(), resource });
        self.stats.textures_created += 1;
        self.stats.bytes_live += bytes;
        tracing::trace!(id, label = %desc.label, w = desc.width, h = desc.height, "create texture");
        Ok(TextureId(id))
    }

    fn release_texture(&mut self, id: TextureId) -> Result<()> {
        let tex = self.textures.remove(&id.0).ok_or(Error::UnknownTexture(id.0))?;
        self.stats.bytes_live -= tex.desc.byte_size();
        self.stats.textures_released += 1;
        self.bound.retain(|t| *t != id);
        Ok(())
    }

    fn texture_desc(&self, id: TextureId) -> Option<&TextureDesc> {
        self.textures.get(&id.0).map(|t| &t.desc)
    }

    fn create_ray_buffer(&mut self, label: &str, capacity: usize) -> Result<BufferId> {
        let bytes = (capacity.max(1) * std::mem::size_of::<EmittedRay>()) as u64;
        let buffer = self.allocate(label, bytes, |device| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: bytes,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        })?;
        let id = self.alloc_id();
        self.buffers.insert(id, GpuRayBuffer { buffer, capacity });
        self.stats.buffers_created += 1;
        self.stats.bytes_live += bytes;
        Ok(BufferId(id))
    }

    fn release_buffer(&mut self, id: BufferId) -> Result<()> {
        let buffer = self.buffers.remove(&id.0).ok_or(Error::UnknownBuffer(id.0))?;
        self.stats.bytes_live -= buffer.buffer.size();
        self.stats.buffers_released += 1;
        Ok(())
    }

    fn write_rays(&mut self, id: BufferId, rays: &[EmittedRay]) -> Result<()> {
        let capacity = self.buffers.get(&id.0).ok_or(Error::UnknownBuffer(id.0))?.capacity;
        if rays.len() > capacity {
            return Err(Error::RayBufferOverflow { count: rays.len(), capacity });
        }
        if rays.is_empty() {
            return Ok(());
        }
        // queue writes land before the next submission; flush earlier users first
        self.submit();
        let buffer = &self.buffers[&id.0].buffer;
        self.queue.write_buffer(buffer, 0, bytemuck::cast_slice(rays));
        Ok(())
    }

    fn clear_texture(&mut self, id: TextureId, color: [f32; 4]) -> Result<()> {
        let entry = self.entry(id)?;
        if let Resource::Atomic(buffer) = &entry.resource {
            let buffer = buffer.clone();
            let value = color[0].max(0.0) as u32;
            if value == 0 {
                self.encoder().clear_buffer(&buffer, 0, None);
            } else {
                self.submit();
                let fill = vec![value; (buffer.size() / 4) as usize];
                self.queue.write_buffer(&buffer, 0, bytemuck::cast_slice(&fill));
            }
            return Ok(());
        }

        let views: Vec<wgpu::TextureView> =
            (0..entry.desc.mip_levels).map(|l| entry.view(l, 1)).collect::<Result<_>>()?;
        let clear = wgpu::Color {
            r: color[0] as f64,
            g: color[1] as f64,
            b: color[2] as f64,
            a: color[3] as f64,
        };
        let encoder = self.encoder();
        for view in &views {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("rt2d_clear"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations { load: wgpu::LoadOp::Clear(clear), store: wgpu::StoreOp::Store },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        Ok(())
    }

    fn bind_render_targets(&mut self, targets: &[TextureId]) -> Result<()> {
        for id in targets {
            self.entry(*id)?.texture()?;
        }
        self.bound = targets.iter().copied().collect();
        Ok(())
    }

    fn bound_targets(&self) -> &[TextureId] {
        &self.bound
    }

    fn paint(&mut self, op: &BlitOp, src: TextureLevel, dst: TextureLevel, blend: BlendMode) -> Result<()> {
        let source = self.entry(src.texture)?;
        source.check_level(src.level)?;
        let target = self.entry(dst.texture)?;
        target.check_level(dst.level)?;
        if src.texture == dst.texture && src.level == dst.level {
            return Err(Error::Unsupported(format!("{} reads and writes the same level", op.name())));
        }

        let level_count = if op.reads_mip_chain() { source.desc.mip_levels - src.level } else { 1 };
        let src_view = source.view(src.level, level_count)?;
        let dst_view = target.view(dst.level, 1)?;
        let (dw, dh) = target.desc.extent(dst.level);
        let format = wgpu_format(target.desc.format);

        let params = BlitParams::new(op.params(), dw, dh, level_count);
        let uniform = self.uniform("rt2d_blit_params", &params);
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("rt2d_blit_bg"),
            layout: &self.blit.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(&src_view) },
                wgpu::BindGroupEntry { binding: 1, resource: uniform.as_entire_binding() },
            ],
        });
        let pipeline = self.blit.get(&self.device, op.kind(), format, blend)?.clone();

        let mut pass = self.encoder().begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(op.name()),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &dst_view,
                resolve_target: None,
                ops: wgpu::Operations { load: wgpu::LoadOp::Load, store: wgpu::StoreOp::Store },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        if let BlendMode::AddDecayed { retain } = blend {
            let r = retain as f64;
            pass.set_blend_constant(wgpu::Color { r, g: r, b: r, a: r });
        }
        pass.draw(0..3, 0..1); // fullscreen triangle
        Ok(())
    }

    fn resolve_kernels(&mut self) -> KernelSet {
        self.kernels = KernelPipelines::build(&self.device, &self.kernel_source);
        let set = self.kernels.set();
        tracing::debug!(?set, "kernels resolved");
        set
    }

    fn dispatch_trace(&mut self, bindings: &TraceBindings, groups: [u32; 3]) -> Result<()> {
        let Some(kernel) = &self.kernels.trace else {
            return Err(Error::Unsupported(super::KERNEL_TRACE.into()));
        };
        let rays = &self.buffers.get(&bindings.rays.0).ok_or(Error::UnknownBuffer(bindings.rays.0))?.buffer;
        let structure = self.entry(bindings.gbuffer_structure)?.view(0, 1)?;
        let atomic = self.entry(bindings.atomic)?;
        let height = atomic.desc.height;
        let atomic = atomic.atomic()?;

        let params = TraceParams::new(
            bindings.world_to_screen,
            bindings.screen_to_pixel,
            bindings.ray_count,
            bindings.atomic_width,
            height,
        );
        let uniform = self.uniform("rt2d_trace_params", &params);
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("rt2d_trace_bg"),
            layout: &kernel.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: rays.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(&structure) },
                wgpu::BindGroupEntry { binding: 2, resource: atomic.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: uniform.as_entire_binding() },
            ],
        });
        let pipeline = kernel.pipeline.clone();

        let mut pass = self.encoder().begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("rt2d_trace_pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(groups[0], groups[1], groups[2]);
        Ok(())
    }

    fn dispatch_convert(&mut self, bindings: &ConvertBindings, groups: [u32; 3]) -> Result<()> {
        let Some(kernel) = &self.kernels.convert else {
            return Err(Error::Unsupported(super::KERNEL_CONVERT_OUTSCATTER.into()));
        };
        let atomic = self.entry(bindings.atomic)?.atomic()?;
        let outscatter = self.entry(bindings.outscatter)?.view(0, 1)?;

        let uniform = self.uniform("rt2d_convert_params", &ConvertParams::new(bindings.width, bindings.height));
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("rt2d_convert_bg"),
            layout: &kernel.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 4, resource: atomic.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 5, resource: wgpu::BindingResource::TextureView(&outscatter) },
                wgpu::BindGroupEntry { binding: 6, resource: uniform.as_entire_binding() },
            ],
        });
        let pipeline = kernel.pipeline.clone();

        let mut pass = self.encoder().begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("rt2d_convert_pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(groups[0], groups[1], groups[2]);
        Ok(())
    }

    fn submit(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(Some(encoder.finish()));
        }
    }

    fn read_texture(&mut self, id: TextureId, level: u32) -> Result<FloatImage> {
        self.submit();
        let entry = self.entry(id)?;
        entry.check_level(level)?;
        let extent = entry.desc.extent(level);
        match &entry.resource {
            Resource::Texture(texture) => {
                readback::read_texture(&self.device, &self.queue, texture, entry.desc.format, level, extent)
            }
            Resource::Atomic(buffer) => readback::read_u32_buffer(&self.device, &self.queue, buffer, extent),
        }
    }

    fn stats(&self) -> ResourceStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_mapping() {
        assert_eq!(wgpu_format(TextureFormat::Bgra8Unorm), wgpu::TextureFormat::Bgra8Unorm);
        for format in [
            TextureFormat::Rgba32Float,
            TextureFormat::Rgba16Float,
            TextureFormat::Rgba8Unorm,
            TextureFormat::R32Uint,
        ] {
            let block = wgpu_format(format).block_copy_size(None);
            assert_eq!(block, Some(format.bytes_per_pixel()), "{format:?}");
        }
    }
}
