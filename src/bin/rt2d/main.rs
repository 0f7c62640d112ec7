//! rt2d CLI - headless rendering and training capture.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use rt2d::gpu::cpu::CpuBackend;
use rt2d::gpu::{GpuBackend, TextureDesc, TextureFormat};
use rt2d::light::{Emitter, PointLight, PointLightParams};
use rt2d::render::{Camera2D, EmptyScene, Frame, FrameOutcome, Renderer};
use rt2d::training::session::{RandomLightSample, SessionConfig};
use rt2d::training::{ExrExporter, SessionTrainer};
use rt2d::{RendererConfig, SimulationSession};

/// Verbosity from -q / -v / -vv
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verbosity {
    Quiet,
    Info,
    Debug,
    Trace,
}

impl Verbosity {
    fn directive(self) -> &'static str {
        match self {
            Self::Quiet => "error",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

/// fmt logging filtered by RUST_LOG (or verbosity), plus a chrome trace when
/// `RT2D_TRACE=1`.
fn init_tracing(verbosity: Verbosity) -> Option<tracing_chrome::FlushGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(verbosity.directive()));
    let fmt = tracing_subscriber::fmt::layer().with_target(false);

    if std::env::var("RT2D_TRACE").ok().as_deref() != Some("1") {
        let _ = tracing_subscriber::registry().with(filter).with(fmt).try_init();
        return None;
    }

    let (chrome_layer, guard) = tracing_chrome::ChromeLayerBuilder::new()
        .file("trace.json")
        .build();
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt)
        .with(chrome_layer)
        .try_init();
    Some(guard)
}

/// `--key value` lookup over the remaining args
struct Args<'a> {
    args: Vec<&'a str>,
}

impl<'a> Args<'a> {
    fn value(&self, key: &str) -> Option<&'a str> {
        self.args
            .iter()
            .position(|a| *a == key)
            .and_then(|i| self.args.get(i + 1).copied())
    }

    fn flag(&self, key: &str) -> bool {
        self.args.contains(&key)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T>
    where
        T::Err: std::fmt::Display,
    {
        match self.value(key) {
            Some(v) => v.parse().map_err(|e| anyhow::anyhow!("invalid {key} '{v}': {e}")),
            None => Ok(default),
        }
    }

    fn positional(&self, index: usize) -> Option<&'a str> {
        self.args.get(index).copied().filter(|a| !a.starts_with("--"))
    }
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let mut verbosity = Verbosity::Info;
    let mut filtered: Vec<&str> = Vec::new();
    for arg in &args[1..] {
        match arg.as_str() {
            "-v" | "--verbose" => verbosity = Verbosity::Debug,
            "-vv" | "--trace" => verbosity = Verbosity::Trace,
            "-q" | "--quiet" => verbosity = Verbosity::Quiet,
            _ => filtered.push(arg),
        }
    }
    let _trace_guard = init_tracing(verbosity);

    if filtered.is_empty() {
        print_help();
        return;
    }

    let rest = Args { args: filtered[1..].to_vec() };
    let result = match filtered[0] {
        "train" | "t" => cmd_train(&rest),
        "render" | "r" => cmd_render(&rest),
        "info" | "i" => cmd_info(&rest),
        "config" | "c" => cmd_config(&rest),
        "help" | "h" | "-h" | "--help" => {
            print_help();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_help();
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn print_help() {
    println!("rt2d - 2D photon light-transport renderer");
    println!();
    println!("USAGE:");
    println!("    rt2d-cli [OPTIONS] <COMMAND> [ARGS]");
    println!();
    println!("COMMANDS:");
    println!("    t, train   [--samples N] [--size N] [--out DIR] [--session NAME] [--seed N] [--max-frames N]");
    println!("               Render random light samples to convergence and export In/Out EXR pairs");
    println!("    r, render  [--width N] [--height N] [--lights N] [--frames N] [--seed N] [--out FILE]");
    println!("               Render live frames of random lights and save the last one as EXR");
    println!("    i, info    Show build and backend info");
    println!("    c, config  [show|path|reset]  Inspect or reset persisted settings");
    println!("    h, help    Show this help");
    println!();
    println!("OPTIONS:");
    println!("    --gpu           Use the wgpu backend instead of the CPU reference backend");
    println!("    -v, --verbose   Debug output");
    println!("    -vv, --trace    Trace output (very verbose)");
    println!("    -q, --quiet     Errors only");
    println!();
    println!("ENVIRONMENT:");
    println!("    RUST_LOG        Overrides the log filter");
    println!("    RT2D_TRACE=1    Write a chrome trace to trace.json");
}

/// Evaluate `$body` with `$backend` bound to the backend selected by `--gpu`.
macro_rules! with_backend {
    ($args:expr, |$backend:ident| $body:expr) => {{
        if $args.flag("--gpu") {
            #[cfg(feature = "gpu")]
            {
                let $backend = rt2d::gpu::wgpu_backend::WgpuBackend::headless().context("creating wgpu device")?;
                $body
            }
            #[cfg(not(feature = "gpu"))]
            {
                bail!("wgpu backend not available. Rebuild with: cargo build --features gpu")
            }
        } else {
            let $backend = CpuBackend::new();
            $body
        }
    }};
}

fn cmd_train(args: &Args<'_>) -> Result<()> {
    let defaults = SessionConfig::default();
    let config = SessionConfig {
        samples: args.parse("--samples", 4)?,
        session_name: args.value("--session").unwrap_or(&defaults.session_name).to_string(),
        convergence_threshold: args.parse("--threshold", defaults.convergence_threshold)?,
        output_size: args.parse("--size", 256)?,
        seed: args.value("--seed").map(str::parse).transpose().context("invalid --seed")?,
    };
    let root = args.value("--out").map(PathBuf::from).unwrap_or_else(ExrExporter::default_root);
    let max_frames: u64 = args.parse("--max-frames", 100_000)?;
    with_backend!(args, |backend| train(backend, config, root, max_frames))
}

fn train<B: GpuBackend>(mut backend: B, config: SessionConfig, root: PathBuf, max_frames: u64) -> Result<()> {
    let size = config.output_size;
    let output = backend.create_texture(&TextureDesc::new("Output", size, size, TextureFormat::Rgba32Float))?;
    let mut renderer = Renderer::new(backend, RendererConfig::load());
    let mut session = SimulationSession::new();

    let samples = config.samples;
    let trainer = SessionTrainer::new(config, root);
    tracing::info!(samples, dir = %trainer.exporter().session_dir().display(), "training");
    session.set_trainer(Box::new(trainer));

    let camera = Camera2D::new(size, size);
    let frame = Frame { camera: &camera, scene: &EmptyScene, output };
    let mut frames = 0;
    while session.is_training() {
        if frames >= max_frames {
            bail!("training did not finish within {max_frames} frames");
        }
        if let FrameOutcome::Training { pass, outcome } = renderer.render(&mut session, &frame)? {
            tracing::debug!(pass, ?outcome, "frame {frames}");
        }
        frames += 1;
    }
    println!("Trained {samples} samples in {frames} frames");
    Ok(())
}

fn cmd_render(args: &Args<'_>) -> Result<()> {
    let width: u32 = args.parse("--width", 512)?;
    let height: u32 = args.parse("--height", width)?;
    let lights: usize = args.parse("--lights", 3)?;
    let frames: u32 = args.parse("--frames", 1)?;
    let seed: u64 = args.parse("--seed", 1)?;
    let out = PathBuf::from(args.value("--out").unwrap_or("render.exr"));
    if width == 0 || height == 0 {
        bail!("image size must be non-zero");
    }
    with_backend!(args, |backend| render(backend, width, height, lights, frames, seed, &out))
}

fn render<B: GpuBackend>(
    mut backend: B,
    width: u32,
    height: u32,
    lights: usize,
    frames: u32,
    seed: u64,
    out: &std::path::Path,
) -> Result<()> {
    let output = backend.create_texture(&TextureDesc::new("Output", width, height, TextureFormat::Rgba32Float))?;
    let mut renderer = Renderer::new(backend, RendererConfig::load());
    let mut session = SimulationSession::new();
    let mut rng = SmallRng::seed_from_u64(seed);

    let mut scene_lights = Vec::with_capacity(lights);
    for i in 0..lights {
        let sample = RandomLightSample::random(format!("light{i}"), &mut rng);
        let params = PointLightParams { segments: rng.gen_range(5_000..50_000), ..sample.light_params() };
        let light: Arc<dyn Emitter> = Arc::new(PointLight::new(params).with_seed(seed + i as u64));
        session.register_light(&light);
        scene_lights.push(light);
    }

    let camera = Camera2D::new(width, height);
    let frame = Frame { camera: &camera, scene: &EmptyScene, output };
    for i in 0..frames {
        let outcome = renderer.render(&mut session, &frame)?;
        tracing::debug!(frame = i, ?outcome);
    }

    let image = renderer.backend_mut().read_texture(output, 0)?;
    image.save_exr(out).with_context(|| format!("writing {}", out.display()))?;
    println!("Wrote {} ({}x{})", out.display(), width, height);
    Ok(())
}

fn cmd_info(args: &Args<'_>) -> Result<()> {
    println!("rt2d {} (built {} {})", env!("CARGO_PKG_VERSION"), rt2d::BUILD_DATE, rt2d::BUILD_TIME);
    match RendererConfig::default_path() {
        Some(path) => println!("Settings: {}", path.display()),
        None => println!("Settings: <no config dir>"),
    }
    println!("Training output: {}", ExrExporter::default_root().display());

    #[cfg(feature = "gpu")]
    if args.flag("--gpu") {
        let backend = rt2d::gpu::wgpu_backend::WgpuBackend::headless().context("creating wgpu device")?;
        let features = backend.device().features();
        println!(
            "wgpu device: FLOAT32_BLENDABLE={}",
            features.contains(wgpu::Features::FLOAT32_BLENDABLE)
        );
    }
    #[cfg(not(feature = "gpu"))]
    let _ = args;
    Ok(())
}

fn cmd_config(args: &Args<'_>) -> Result<()> {
    match args.positional(0).unwrap_or("show") {
        "show" => {
            println!("{}", serde_json::to_string_pretty(&RendererConfig::load())?);
        }
        "path" => match RendererConfig::default_path() {
            Some(path) => println!("{}", path.display()),
            None => bail!("no config directory on this platform"),
        },
        "reset" => {
            let path = RendererConfig::default_path().context("no config directory on this platform")?;
            RendererConfig::default().save_to(&path)?;
            println!("Reset {}", path.display());
        }
        other => bail!("unknown config action '{other}' (expected show, path or reset)"),
    }
    Ok(())
}
