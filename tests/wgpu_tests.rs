//! Smoke tests against a real device. Skipped when no adapter is available.

#![cfg(feature = "gpu")]

use std::sync::Arc;

use rt2d::gpu::wgpu_backend::WgpuBackend;
use rt2d::gpu::{GpuBackend, KernelSet, TextureDesc, TextureFormat};
use rt2d::light::{Emitter, PointLight, PointLightParams};
use rt2d::render::{Camera2D, EmptyScene, Frame, FrameOutcome, Renderer};
use rt2d::util::Error;
use rt2d::{RendererConfig, SimulationSession};

fn device() -> Option<WgpuBackend> {
    match WgpuBackend::headless() {
        Ok(backend) => Some(backend),
        Err(e) => {
            println!("skipping: {e}");
            None
        }
    }
}

#[test]
fn test_kernels_resolve() {
    let Some(mut backend) = device() else { return };
    assert_eq!(backend.resolve_kernels(), KernelSet::ALL);
}

#[test]
fn test_clear_and_readback() {
    let Some(mut backend) = device() else { return };
    let id = backend
        .create_texture(&TextureDesc::new("t", 70, 3, TextureFormat::Rgba16Float).with_full_mip_chain())
        .unwrap();
    backend.clear_texture(id, [0.5, 1.0, 0.0, 1.0]).unwrap();
    let base = backend.read_texture(id, 0).unwrap();
    assert_eq!((base.width, base.height), (70, 3));
    assert_eq!(base.get(69, 2), [0.5, 1.0, 0.0, 1.0]);
    let top = backend.read_texture(id, 6).unwrap();
    assert_eq!((top.width, top.height), (1, 1));
    backend.release_texture(id).unwrap();
    assert!(backend.release_texture(id).is_err());
}

#[test]
fn test_live_frame_on_device() {
    let Some(mut backend) = device() else { return };
    let output = backend
        .create_texture(&TextureDesc::new("Output", 64, 64, TextureFormat::Rgba32Float))
        .unwrap();
    let config = RendererConfig { ray_capacity: 1 << 16, ..Default::default() };
    let mut renderer = Renderer::new(backend, config);
    let mut session = SimulationSession::new();
    let light: Arc<dyn Emitter> =
        Arc::new(PointLight::new(PointLightParams { radius: 0.3, segments: 20_000, ..Default::default() }).with_seed(1));
    session.register_light(&light);

    let camera = Camera2D::new(64, 64);
    let frame = Frame { camera: &camera, scene: &EmptyScene, output };
    match renderer.render(&mut session, &frame) {
        Ok(outcome) => assert_eq!(outcome, FrameOutcome::Live { rays: 20_000 }),
        // adapters without float32 blending cannot compose into RGBA32F
        Err(Error::Unsupported(reason)) => {
            println!("skipping: {reason}");
            return;
        }
        Err(e) => panic!("{e}"),
    }

    let accumulation = renderer.targets().accumulation().unwrap();
    let acc = renderer.backend_mut().read_texture(accumulation, 0).unwrap();
    let photons = acc.channel_sums()[3];
    assert!((photons - 20_000.0).abs() < 1.0, "photons {photons}");
}
