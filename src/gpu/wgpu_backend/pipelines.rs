//! Blit and kernel pipeline creation.
//!
//! Blit pipelines are built lazily, one per (op kind, target format, blend
//! kind), and cached for the backend's lifetime.

use std::collections::HashMap;

use rt2d_kernels::{blit_entry, BLIT_SOURCE, BLIT_VERTEX, KERNEL_CONVERT_OUTSCATTER, KERNEL_TRACE};

use crate::gpu::ops::{BlendMode, OpKind};
use crate::gpu::KernelSet;
use crate::util::{Error, Result};

fn fragment_entry(kind: OpKind) -> &'static str {
    match kind {
        OpKind::Copy => blit_entry::COPY,
        OpKind::Modulate => blit_entry::MODULATE,
        OpKind::Diagnostic => blit_entry::DIAGNOSTIC,
        OpKind::Gauss4 => blit_entry::GAUSS4,
        OpKind::Gauss9 => blit_entry::GAUSS9,
        OpKind::Gauss10x10Bilinear => blit_entry::GAUSS10,
        OpKind::IntegratePointCloud => blit_entry::INTEGRATE_POINT_CLOUD,
        OpKind::LogOfIntensity => blit_entry::LOG_INTENSITY,
        OpKind::VarianceMip => blit_entry::VARIANCE_MIP,
    }
}

/// Fixed-function blend equivalent of `blend`. `AddDecayed` reads its
/// factor from the pass blend constant.
pub(super) fn blend_state(blend: BlendMode) -> wgpu::BlendState {
    let component = |src_factor, dst_factor| wgpu::BlendComponent {
        src_factor,
        dst_factor,
        operation: wgpu::BlendOperation::Add,
    };
    let both = |c: wgpu::BlendComponent| wgpu::BlendState { color: c, alpha: c };
    match blend {
        BlendMode::Replace => wgpu::BlendState::REPLACE,
        BlendMode::Additive => both(component(wgpu::BlendFactor::One, wgpu::BlendFactor::One)),
        BlendMode::Alpha => both(component(wgpu::BlendFactor::SrcAlpha, wgpu::BlendFactor::OneMinusSrcAlpha)),
        BlendMode::AddDecayed { .. } => both(component(wgpu::BlendFactor::One, wgpu::BlendFactor::Constant)),
    }
}

type BlitKey = (OpKind, wgpu::TextureFormat, u8);

pub(super) struct BlitPipelines {
    shader: wgpu::ShaderModule,
    pub bind_group_layout: wgpu::BindGroupLayout,
    layout: wgpu::PipelineLayout,
    cache: HashMap<BlitKey, wgpu::RenderPipeline>,
}

impl BlitPipelines {
    pub fn new(device: &wgpu::Device) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("rt2d_blit_shader"),
            source: wgpu::ShaderSource::Wgsl(BLIT_SOURCE.into()),
        });
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("rt2d_blit_bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("rt2d_blit_pl"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        Self { shader, bind_group_layout, layout, cache: HashMap::new() }
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Cached pipeline for `kind` rendering into `format` with `blend`.
    pub fn get(
        &mut self,
        device: &wgpu::Device,
        kind: OpKind,
        format: wgpu::TextureFormat,
        blend: BlendMode,
    ) -> Result<&wgpu::RenderPipeline> {
        let float32 = matches!(format, wgpu::TextureFormat::Rgba32Float);
        if float32 && blend != BlendMode::Replace && !device.features().contains(wgpu::Features::FLOAT32_BLENDABLE) {
            return Err(Error::Unsupported(format!("{format:?} blending needs FLOAT32_BLENDABLE")));
        }

        let key = (kind, format, blend.kind());
        if !self.cache.contains_key(&key) {
            let label = format!("rt2d_blit_{kind:?}_{format:?}_{}", blend.kind());
            let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(&label),
                layout: Some(&self.layout),
                vertex: wgpu::VertexState {
                    module: &self.shader,
                    entry_point: Some(BLIT_VERTEX),
                    compilation_options: Default::default(),
                    buffers: &[],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &self.shader,
                    entry_point: Some(fragment_entry(kind)),
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: Some(blend_state(blend)),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });
            tracing::debug!(%label, "blit pipeline created");
            self.cache.insert(key, pipeline);
        }
        self.cache
            .get(&key)
            .ok_or_else(|| Error::Gpu("blit pipeline cache miss".into()))
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
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

pub(super) struct ComputeKernel {
    pub pipeline: wgpu::ComputePipeline,
    pub bind_group_layout: wgpu::BindGroupLayout,
}

/// Compute pipelines for whichever kernels the source defines.
#[derive(Default)]
pub(super) struct KernelPipelines {
    pub trace: Option<ComputeKernel>,
    pub convert: Option<ComputeKernel>,
}

impl KernelPipelines {
    /// Entry points present in `source`.
    pub fn detect(source: &str) -> KernelSet {
        KernelSet {
            trace: source.contains(&format!("fn {KERNEL_TRACE}(")),
            convert: source.contains(&format!("fn {KERNEL_CONVERT_OUTSCATTER}(")),
        }
    }

    pub fn set(&self) -> KernelSet {
        KernelSet { trace: self.trace.is_some(), convert: self.convert.is_some() }
    }

    pub fn build(device: &wgpu::Device, source: &str) -> Self {
        let found = Self::detect(source);
        if !found.trace && !found.convert {
            return Self::default();
        }
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("rt2d_kernels"),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        let trace = found.trace.then(|| {
            let entries = [
                storage_entry(0, true),
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    },
                    count: None,
                },
                storage_entry(2, false),
                uniform_entry(3),
            ];
            compute_kernel(device, &shader, KERNEL_TRACE, &entries)
        });

        let convert = found.convert.then(|| {
            let entries = [
                storage_entry(4, true),
                wgpu::BindGroupLayoutEntry {
                    binding: 5,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: wgpu::TextureFormat::Rgba32Float,
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
                uniform_entry(6),
            ];
            compute_kernel(device, &shader, KERNEL_CONVERT_OUTSCATTER, &entries)
        });

        Self { trace, convert }
    }
}

fn compute_kernel(
    device: &wgpu::Device,
    shader: &wgpu::ShaderModule,
    entry_point: &str,
    entries: &[wgpu::BindGroupLayoutEntry],
) -> ComputeKernel {
    let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(entry_point),
        entries,
    });
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(entry_point),
        bind_group_layouts: &[&bind_group_layout],
        push_constant_ranges: &[],
    });
    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(entry_point),
        layout: Some(&layout),
        module: shader,
        entry_point: Some(entry_point),
        compilation_options: Default::default(),
        cache: None,
    });
    ComputeKernel { pipeline, bind_group_layout }
}
