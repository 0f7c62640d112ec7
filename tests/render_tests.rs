//! End-to-end live rendering on the CPU backend.

use std::sync::Arc;

use rt2d::config::RendererConfig;
use rt2d::gpu::cpu::CpuBackend;
use rt2d::gpu::{GpuBackend, KernelSet, TextureDesc, TextureFormat, TextureId};
use rt2d::host::HostEvent;
use rt2d::light::{Emitter, PointLight, PointLightParams};
use rt2d::render::{Camera2D, EmptyScene, Frame, FrameOutcome, Renderer, Sprite, SpriteScene};
use rt2d::util::{Error, Vec2};
use rt2d::SimulationSession;

const SIZE: u32 = 32;

fn setup(mut backend: CpuBackend, ray_capacity: usize) -> (Renderer<CpuBackend>, TextureId) {
    let output = backend
        .create_texture(&TextureDesc::new("Output", SIZE, SIZE, TextureFormat::Rgba32Float))
        .expect("output texture");
    let config = RendererConfig { ray_capacity, ..Default::default() };
    (Renderer::new(backend, config), output)
}

fn light(params: PointLightParams, seed: u64) -> Arc<PointLight> {
    Arc::new(PointLight::new(params).with_seed(seed))
}

fn register(session: &SimulationSession, light: &Arc<PointLight>) {
    let emitter: Arc<dyn Emitter> = light.clone();
    session.register_light(&emitter);
}

#[test]
fn test_live_frame_lights_center() {
    let (mut renderer, output) = setup(CpuBackend::new(), 1 << 16);
    let mut session = SimulationSession::new();
    let lamp = light(PointLightParams { radius: 0.3, segments: 20_000, ..Default::default() }, 1);
    register(&session, &lamp);

    let camera = Camera2D::new(SIZE, SIZE);
    let frame = Frame { camera: &camera, scene: &EmptyScene, output };
    let outcome = renderer.render(&mut session, &frame).unwrap();
    assert_eq!(outcome, FrameOutcome::Live { rays: 20_000 });

    let image = renderer.backend_mut().read_texture(output, 0).unwrap();
    let center = image.get(SIZE / 2, SIZE / 2);
    let corner = image.get(0, 0);
    println!("center {center:?} corner {corner:?}");
    assert!(center[0] > corner[0]);
    assert!(image.channel_sums()[0] > 0.0);
}

#[test]
fn test_opaque_sprite_blocks_energy() {
    let (mut renderer, output) = setup(CpuBackend::new(), 1 << 16);
    let mut session = SimulationSession::new();
    // disc covers the whole [-1, 1]^2 view
    let lamp = light(PointLightParams { radius: 2.0, segments: 40_000, ..Default::default() }, 2);
    register(&session, &lamp);

    // right half opaque
    let scene = SpriteScene::new().with_sprite(Sprite {
        center: Vec2::new(0.5, 0.0),
        size: Vec2::new(1.0, 2.0),
        density: 1.0,
        ..Default::default()
    });
    let camera = Camera2D::new(SIZE, SIZE);
    renderer.render(&mut session, &Frame { camera: &camera, scene: &scene, output }).unwrap();

    let atomic = renderer.targets().atomic().unwrap();
    let values = renderer.backend().atomic_values(atomic).unwrap();
    let (mut left, mut right, mut right_photons) = (0u64, 0u64, 0u64);
    for y in 0..SIZE as usize {
        for x in 0..SIZE as usize {
            let base = (y * SIZE as usize + x) * 4;
            if x < SIZE as usize / 2 {
                left += values[base] as u64;
            } else {
                right += values[base] as u64;
                right_photons += values[base + 3] as u64;
            }
        }
    }
    assert!(left > 0);
    assert_eq!(right, 0);
    // photon counts are not attenuated
    assert!(right_photons > 0);
}

#[test]
fn test_stale_lights_are_pruned() {
    let (mut renderer, output) = setup(CpuBackend::new(), 1 << 16);
    let mut session = SimulationSession::new();
    let kept = light(PointLightParams { segments: 1000, ..Default::default() }, 3);
    let dropped = light(PointLightParams { segments: 2000, ..Default::default() }, 4);
    register(&session, &kept);
    register(&session, &dropped);
    dropped.destroy();

    let camera = Camera2D::new(SIZE, SIZE);
    let frame = Frame { camera: &camera, scene: &EmptyScene, output };
    assert_eq!(renderer.render(&mut session, &frame).unwrap(), FrameOutcome::Live { rays: 1000 });
    assert_eq!(session.registry().len(), 1);

    // disabled lights stay registered but emit nothing
    kept.set_enabled(false);
    assert_eq!(renderer.render(&mut session, &frame).unwrap(), FrameOutcome::Live { rays: 0 });
    assert_eq!(session.registry().len(), 1);
}

#[test]
fn test_ray_budget_truncated_to_capacity() {
    let (mut renderer, output) = setup(CpuBackend::new(), 1000);
    let mut session = SimulationSession::new();
    let a = light(PointLightParams { segments: 800, ..Default::default() }, 5);
    let b = light(PointLightParams { segments: 800, ..Default::default() }, 6);
    register(&session, &a);
    register(&session, &b);

    let camera = Camera2D::new(SIZE, SIZE);
    let frame = Frame { camera: &camera, scene: &EmptyScene, output };
    assert_eq!(renderer.render(&mut session, &frame).unwrap(), FrameOutcome::Live { rays: 1000 });
}

#[test]
fn test_missing_trace_kernel_keeps_rendering() {
    let kernels = KernelSet { trace: false, convert: true };
    let (mut renderer, output) = setup(CpuBackend::new().with_kernels(kernels), 1 << 14);
    let mut session = SimulationSession::new();
    let lamp = light(PointLightParams { segments: 500, ..Default::default() }, 7);
    register(&session, &lamp);

    let camera = Camera2D::new(SIZE, SIZE);
    let frame = Frame { camera: &camera, scene: &EmptyScene, output };
    for _ in 0..2 {
        assert_eq!(renderer.render(&mut session, &frame).unwrap(), FrameOutcome::Live { rays: 500 });
    }
    assert_eq!(renderer.kernels(), Some(kernels));
    let counters = renderer.backend().counters();
    assert_eq!(counters.trace_dispatches, 0);
    assert_eq!(counters.convert_dispatches, 2);

    let accumulation = renderer.targets().accumulation().unwrap();
    let image = renderer.backend_mut().read_texture(accumulation, 0).unwrap();
    assert_eq!(image.channel_sums(), [0.0; 4]);
}

#[test]
fn test_out_of_memory_is_reported() {
    // room for the output texture only
    let (mut renderer, output) = setup(CpuBackend::new().with_memory_budget(20 * 1024), 1 << 14);
    let mut session = SimulationSession::new();
    let camera = Camera2D::new(SIZE, SIZE);
    let frame = Frame { camera: &camera, scene: &EmptyScene, output };

    let err = renderer.render(&mut session, &frame).unwrap_err();
    assert!(matches!(err, Error::OutOfMemory { .. }), "{err}");
    assert!(!renderer.targets().is_allocated());
    assert_eq!(renderer.backend().stats().live_textures(), 1);
}

#[test]
fn test_resize_does_not_leak() {
    let (mut renderer, output) = setup(CpuBackend::new(), 1 << 14);
    let mut session = SimulationSession::new();
    let lamp = light(PointLightParams { segments: 500, ..Default::default() }, 8);
    register(&session, &lamp);

    let large = Camera2D::new(SIZE, SIZE);
    renderer.render(&mut session, &Frame { camera: &large, scene: &EmptyScene, output }).unwrap();
    let live = renderer.backend().stats().live_textures();

    let small = Camera2D::new(SIZE / 2, SIZE / 4);
    renderer.render(&mut session, &Frame { camera: &small, scene: &EmptyScene, output }).unwrap();
    assert_eq!(renderer.targets().size(), (SIZE / 2, SIZE / 4));
    assert_eq!(renderer.backend().stats().live_textures(), live);

    // same size again: targets are kept
    let light_target = renderer.targets().light().unwrap();
    renderer.render(&mut session, &Frame { camera: &small, scene: &EmptyScene, output }).unwrap();
    assert_eq!(renderer.targets().light().unwrap(), light_target);
    assert_eq!(renderer.backend().stats().live_textures(), live);
}

#[test]
fn test_diagnostic_view_paints_selected_mip() {
    let (mut renderer, output) = setup(CpuBackend::new(), 1 << 14);
    renderer.config_mut().diagnostics.enable = true;
    renderer.config_mut().diagnostics.select_mip = 2.0;
    let mut session = SimulationSession::new();
    let lamp = light(PointLightParams { segments: 500, ..Default::default() }, 9);
    register(&session, &lamp);

    let camera = Camera2D::new(SIZE, SIZE);
    renderer.render(&mut session, &Frame { camera: &camera, scene: &EmptyScene, output }).unwrap();
    let log = renderer.backend_mut().take_paint_log();
    assert_eq!(log.last(), Some(&"diagnostic"));
    assert!(!log.contains(&"integrate_point_cloud"));
}

#[test]
fn test_exiting_play_mode_returns_to_live() {
    use rt2d::training::session::SessionConfig;
    use rt2d::training::SessionTrainer;

    let dir = tempfile::tempdir().unwrap();
    let (mut renderer, output) = setup(CpuBackend::new(), 1 << 16);
    let mut session = SimulationSession::new();
    let config = SessionConfig { samples: 3, output_size: 16, seed: Some(1), ..Default::default() };
    session.set_trainer(Box::new(SessionTrainer::new(config, dir.path())));

    let camera = Camera2D::new(SIZE, SIZE);
    let frame = Frame { camera: &camera, scene: &EmptyScene, output };
    let outcome = renderer.render(&mut session, &frame).unwrap();
    assert!(matches!(outcome, FrameOutcome::Training { pass: 1, .. }), "{outcome:?}");
    assert!(renderer.training_target().is_some());

    session.handle_event(HostEvent::ExitingPlayMode);
    assert!(!session.is_training());

    let outcome = renderer.render(&mut session, &frame).unwrap();
    assert!(matches!(outcome, FrameOutcome::Live { .. }), "{outcome:?}");
    assert!(renderer.training_target().is_none());
    assert_eq!(renderer.targets().size(), (SIZE, SIZE));
}
