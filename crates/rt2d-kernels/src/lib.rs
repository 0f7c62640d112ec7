//! WGSL sources for the rt2d light-transport renderer
//!
//! Two shader modules:
//!
//! - [`KERNELS_SOURCE`] holds the compute kernels `Kernel_Trace` (ray splat
//!   into a fixed-point atomic surface) and `Kernel_ConvertOutscatter`
//!   (atomic surface to RGBA32F accumulation texture).
//! - [`BLIT_SOURCE`] holds one fullscreen fragment entry point per blit
//!   operation (copy, Gaussian filters, point-cloud integration, ...).
//!
//! ## Bindings
//!
//! `Kernel_Trace`, group 0:
//!
//! | binding | resource |
//! |---|---|
//! | 0 | `array<Ray>` read-only storage, 32 bytes per ray |
//! | 1 | structure G-buffer, `texture_2d<f32>` |
//! | 2 | `array<atomic<u32>>` atomic surface |
//! | 3 | [`TraceParams`] uniform |
//!
//! `Kernel_ConvertOutscatter`, group 0:
//!
//! | binding | resource |
//! |---|---|
//! | 4 | `array<u32>` atomic surface, read-only |
//! | 5 | accumulation texture, `texture_storage_2d<rgba32float, write>` |
//! | 6 | [`ConvertParams`] uniform |
//!
//! Blit entry points, group 0: binding 0 is the source view
//! (`texture_2d<f32>`, read with `textureLoad`), binding 1 is [`BlitParams`].
//!
//! ## Usage
//!
//! ```ignore
//! use rt2d_kernels::{KERNELS_SOURCE, KERNEL_TRACE};
//!
//! let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
//!     label: Some("rt2d_kernels"),
//!     source: wgpu::ShaderSource::Wgsl(KERNELS_SOURCE.into()),
//! });
//! // entry_point: Some(KERNEL_TRACE)
//! ```

mod params;

pub use params::{BlitParams, ConvertParams, TraceParams};

/// Compute kernels (trace + convert)
pub const KERNELS_SOURCE: &str = include_str!("shaders/kernels.wgsl");

pub const KERNEL_TRACE: &str = "Kernel_Trace";
pub const KERNEL_CONVERT_OUTSCATTER: &str = "Kernel_ConvertOutscatter";

/// Must match `@workgroup_size` of `Kernel_Trace`
pub const TRACE_WORKGROUP_SIZE: u32 = 256;
/// Texels per side covered by one `Kernel_ConvertOutscatter` workgroup
pub const CONVERT_TILE: u32 = 32;
/// Fixed-point scale of the atomic surface
pub const FIXED_POINT_SCALE: f32 = 65536.0;

/// Fullscreen vertex entry point of [`BLIT_SOURCE`]
pub const BLIT_VERTEX: &str = "vs_fullscreen";

/// Fragment entry points of [`BLIT_SOURCE`]
pub mod blit_entry {
    pub const COPY: &str = "fs_copy";
    pub const MODULATE: &str = "fs_modulate";
    pub const DIAGNOSTIC: &str = "fs_diagnostic";
    pub const GAUSS4: &str = "fs_gauss4";
    pub const GAUSS9: &str = "fs_gauss9";
    pub const GAUSS10: &str = "fs_gauss10";
    pub const INTEGRATE_POINT_CLOUD: &str = "fs_integrate_point_cloud";
    pub const LOG_INTENSITY: &str = "fs_log_intensity";
    pub const VARIANCE_MIP: &str = "fs_variance_mip";
}

/// Blit shaders. Clamp-to-edge addressing, manual bilinear filtering so
/// unfilterable RGBA32F sources work without extra device features.
pub const BLIT_SOURCE: &str = r#"
struct BlitParams {
    params: vec4<f32>,
    dst_size: vec2<f32>,
    level_count: u32,
    _pad: u32,
}

@group(0) @binding(0) var src: texture_2d<f32>;
@group(0) @binding(1) var<uniform> blit: BlitParams;

const LUMINANCE: vec3<f32> = vec3<f32>(0.2126, 0.7152, 0.0722);

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
}

@vertex
fn vs_fullscreen(@builtin(vertex_index) vi: u32) -> VertexOutput {
    let uv = vec2<f32>(f32((vi << 1u) & 2u), f32(vi & 2u));
    var out: VertexOutput;
    out.position = vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
    return out;
}

fn fetch(level: i32, p: vec2<i32>) -> vec4<f32> {
    let dims = vec2<i32>(textureDimensions(src, level));
    return textureLoad(src, clamp(p, vec2<i32>(0), dims - 1), level);
}

fn sample_level(level: i32, uv: vec2<f32>) -> vec4<f32> {
    let dims = vec2<f32>(textureDimensions(src, level));
    let f = uv * dims - 0.5;
    let p0 = floor(f);
    let t = f - p0;
    let i = vec2<i32>(p0);
    let a = fetch(level, i);
    let b = fetch(level, i + vec2<i32>(1, 0));
    let c = fetch(level, i + vec2<i32>(0, 1));
    let d = fetch(level, i + vec2<i32>(1, 1));
    return mix(mix(a, b, t.x), mix(c, d, t.x), t.y);
}

fn dst_uv(position: vec4<f32>) -> vec2<f32> {
    return position.xy / blit.dst_size;
}

// Source texel a destination texel is anchored at
fn anchor(position: vec4<f32>) -> vec2<i32> {
    let x = vec2<u32>(position.xy);
    let src_size = textureDimensions(src, 0);
    return vec2<i32>(x * src_size / vec2<u32>(blit.dst_size));
}

@fragment
fn fs_copy(in: VertexOutput) -> @location(0) vec4<f32> {
    return sample_level(0, dst_uv(in.position));
}

@fragment
fn fs_modulate(in: VertexOutput) -> @location(0) vec4<f32> {
    return sample_level(0, dst_uv(in.position)) * blit.params;
}

@fragment
fn fs_gauss4(in: VertexOutput) -> @location(0) vec4<f32> {
    var w = array<f32, 3>(0.25, 0.5, 0.25);
    let b = anchor(in.position);
    var acc = vec4<f32>(0.0);
    for (var j = 0; j < 3; j++) {
        for (var i = 0; i < 3; i++) {
            acc += fetch(0, b + vec2<i32>(i - 1, j - 1)) * (w[i] * w[j]);
        }
    }
    return acc;
}

@fragment
fn fs_gauss9(in: VertexOutput) -> @location(0) vec4<f32> {
    var w = array<f32, 4>(0.125, 0.375, 0.375, 0.125);
    let b = anchor(in.position);
    var acc = vec4<f32>(0.0);
    for (var j = 0; j < 4; j++) {
        for (var i = 0; i < 4; i++) {
            acc += fetch(0, b + vec2<i32>(i - 1, j - 1)) * (w[i] * w[j]);
        }
    }
    return acc;
}

@fragment
fn fs_gauss10(in: VertexOutput) -> @location(0) vec4<f32> {
    var w = array<f32, 10>(1.0, 9.0, 36.0, 84.0, 126.0, 126.0, 84.0, 36.0, 9.0, 1.0);
    let b = anchor(in.position);
    var acc = vec4<f32>(0.0);
    for (var j = 0; j < 10; j++) {
        for (var i = 0; i < 10; i++) {
            acc += fetch(0, b + vec2<i32>(i - 4, j - 4)) * (w[i] * w[j] / 262144.0);
        }
    }
    return acc;
}

@fragment
fn fs_log_intensity(in: VertexOutput) -> @location(0) vec4<f32> {
    let c = sample_level(0, dst_uv(in.position));
    let l = log(max(dot(c.rgb, LUMINANCE), 1e-4));
    return vec4<f32>(l, l, l, 1.0);
}

fn variance_value(t: vec4<f32>, source: u32) -> f32 {
    switch source {
        case 0u: { return t.x; }
        case 1u: { return t.y; }
        case 2u: { return t.z; }
        case 3u: { return t.w; }
        default: { return dot(t.rgb, LUMINANCE); }
    }
}

@fragment
fn fs_variance_mip(in: VertexOutput) -> @location(0) vec4<f32> {
    let source = u32(blit.params.x);
    let b = anchor(in.position);
    let t0 = fetch(0, b);
    let t1 = fetch(0, b + vec2<i32>(1, 0));
    let t2 = fetch(0, b + vec2<i32>(0, 1));
    let t3 = fetch(0, b + vec2<i32>(1, 1));
    if (source == 5u) {
        // texels are (mean, variance) pairs
        let mean = (t0.x + t1.x + t2.x + t3.x) * 0.25;
        let mean_sq = (t0.x * t0.x + t1.x * t1.x + t2.x * t2.x + t3.x * t3.x) * 0.25;
        let within = (t0.y + t1.y + t2.y + t3.y) * 0.25;
        return vec4<f32>(mean, within + max(mean_sq - mean * mean, 0.0), 0.0, 1.0);
    }
    let v = vec4<f32>(
        variance_value(t0, source),
        variance_value(t1, source),
        variance_value(t2, source),
        variance_value(t3, source),
    );
    let mean = dot(v, vec4<f32>(0.25));
    let mean_sq = dot(v * v, vec4<f32>(0.25));
    return vec4<f32>(mean, max(mean_sq - mean * mean, 0.0), 0.0, 1.0);
}

@fragment
fn fs_diagnostic(in: VertexOutput) -> @location(0) vec4<f32> {
    let last = f32(blit.level_count - 1u);
    let mip = clamp(blit.params.x, 0.0, last);
    let l0 = i32(floor(mip));
    let l1 = min(l0 + 1, i32(last));
    let t = mip - f32(l0);
    let uv = dst_uv(in.position);
    let c = mix(sample_level(l0, uv), sample_level(l1, uv), t) / max(blit.params.y, 1e-6);
    return vec4<f32>(clamp(c.rgb, vec3<f32>(0.0), vec3<f32>(1.0)), 1.0);
}

@fragment
fn fs_integrate_point_cloud(in: VertexOutput) -> @location(0) vec4<f32> {
    let uv = dst_uv(in.position);
    let min_photons = blit.params.x;
    var texel = vec4<f32>(0.0);
    var footprint = 1.0;
    for (var level = 0u; level < blit.level_count; level++) {
        texel = sample_level(i32(level), uv);
        // w is the mean count per base texel; a level-n texel covers 4^n of them
        if (texel.w * footprint >= min_photons) {
            break;
        }
        footprint *= 4.0;
    }
    return vec4<f32>(texel.rgb, 1.0);
}
"#;
