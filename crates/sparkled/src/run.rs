use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use glam::Vec2;
use sparkle::{
    EffectParams, FrameRateMeter, GpuContext, OffscreenTarget, ParticleSystem, Renderer,
    SimulationMode, Viewport,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use winit::dpi::PhysicalSize;
use winit::event::{Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::window::WindowBuilder;

use crate::cli::Cli;
use crate::emitter::Fountain;
use crate::scene::{self, LoadedScene};

const HEADLESS_FRAMES: u64 = 120;
const HEADLESS_DT: f32 = 1.0 / 60.0;
/// Longest step fed to the simulation after a stall.
const MAX_DT: f32 = 0.1;

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

pub fn run(cli: Cli) -> Result<()> {
    let scene = scene::load(cli.config.as_deref())?;

    if cli.check_config {
        for line in scene::summary(&scene) {
            println!("{line}");
        }
        println!("configuration ok");
        return Ok(());
    }

    if cli.headless {
        run_headless(&cli, &scene)
    } else {
        run_window(&cli, &scene)
    }
}

/// Per-run state shared by the headless and windowed loops.
struct Show {
    system: ParticleSystem,
    fountain: Fountain,
    effects: Vec<String>,
    params: HashMap<String, EffectParams>,
    meter: FrameRateMeter,
    log_interval: Duration,
    last_log: Instant,
    overlay: bool,
    frames: u64,
}

impl Show {
    fn new(cli: &Cli, scene: &LoadedScene, renderer: &Renderer) -> Self {
        let config = &scene.config;
        let mut system = ParticleSystem::bounded(config.particles.max_particles);
        system.blend_mode = scene::blend_mode(config);
        system.gravity = scene::gravity(config);
        system.global_damping = config.particles.damping;

        if scene::simulation_mode(config, cli.simulation) == SimulationMode::Gpu
            && !system.enable_gpu_simulation(renderer.device(), renderer.queue())
        {
            warn!("GPU simulation requested but unavailable; simulating on the CPU");
        }

        let now = Instant::now();
        Self {
            system,
            fountain: Fountain::new(
                config.particles.emit_rate,
                config.particles.lifetime,
                cli.seed,
            ),
            effects: config.renderer.effects.clone(),
            params: scene::effect_params(config),
            meter: FrameRateMeter::starting_at(Duration::from_secs(1), now),
            log_interval: config.diagnostics.log_interval,
            last_log: now,
            overlay: config.diagnostics.overlay,
            frames: 0,
        }
    }

    /// Emits, advances, and renders one frame. Returns whether it was presented.
    fn frame(&mut self, renderer: &mut Renderer, dt: f32, viewport: Viewport) -> bool {
        let origin = Vec2::new(viewport.width * 0.5, viewport.height * 0.08);
        self.fountain
            .emit(&mut self.system, dt, origin, viewport.height);
        self.system.advance(dt);

        let presented = if self.effects.is_empty() {
            renderer.render_particle_frame(&mut self.system, viewport)
        } else {
            self.render_with_effects(renderer, viewport)
        };
        self.frames += 1;

        let now = Instant::now();
        self.meter.tick(now);
        if now.duration_since(self.last_log) >= self.log_interval {
            self.last_log = now;
            self.log_status(renderer);
        }
        presented
    }

    fn render_with_effects(&mut self, renderer: &mut Renderer, viewport: Viewport) -> bool {
        if let Err(error) = renderer.begin_frame() {
            debug!(%error, "skipping frame");
            return false;
        }
        let drawn = renderer.draw_particle_system(&mut self.system, viewport);
        let applied = renderer.apply_effects(&self.effects, &self.params);
        if applied < self.effects.len() {
            debug!(
                applied,
                requested = self.effects.len(),
                "some effects were skipped"
            );
        }
        renderer.end_frame();
        drawn.is_ok()
    }

    fn log_status(&self, renderer: &Renderer) {
        let diagnostics = renderer.diagnostics();
        if self.overlay && diagnostics.overlay_enabled {
            let extra = vec![
                format!("particles: {}", self.system.alive_count()),
                format!("simulation: {:?}", self.system.simulation_mode()),
            ];
            let text = diagnostics.overlay_text("sparkled", &extra, self.meter.frames_per_second());
            for line in text.lines() {
                info!("{line}");
            }
        } else {
            info!(
                fps = self.meter.frames_per_second(),
                particles = self.system.alive_count(),
                presented = diagnostics.success_count(),
                skipped = diagnostics.failure_count(),
                "render status"
            );
        }
    }
}

fn run_headless(cli: &Cli, scene: &LoadedScene) -> Result<()> {
    let (width, height) = cli.size;
    let context = GpuContext::headless().context("failed to create a headless GPU device")?;
    info!(adapter = %context.describe(), width, height, "rendering headless");

    let target = OffscreenTarget::new(&context.device, width, height);
    let mut renderer = Renderer::new(&context, target, scene::renderer_settings(&scene.config));
    renderer
        .diagnostics_mut()
        .set_renderer_status("renderer: headless");
    let mut show = Show::new(cli, scene, &renderer);
    let viewport = Viewport::new(width as f32, height as f32);

    let frames = cli.frames.unwrap_or(HEADLESS_FRAMES);
    let presented = (0..frames)
        .filter(|_| show.frame(&mut renderer, HEADLESS_DT, viewport))
        .count();

    show.log_status(&renderer);
    info!(
        frames,
        presented,
        particles = show.system.alive_count(),
        "headless run finished"
    );
    if presented == 0 && frames > 0 {
        return Err(anyhow!("no frame was presented"));
    }
    Ok(())
}

fn run_window(cli: &Cli, scene: &LoadedScene) -> Result<()> {
    let (width, height) = cli.size;
    let event_loop = EventLoop::new().map_err(|err| anyhow!("failed to create event loop: {err}"))?;
    let window = WindowBuilder::new()
        .with_title("sparkled")
        .with_inner_size(PhysicalSize::new(width, height))
        .build(&event_loop)
        .map_err(|err| anyhow!("failed to create preview window: {err}"))?;
    let window = Arc::new(window);

    let size = window.inner_size();
    let (context, target) = GpuContext::for_window(window.clone(), size.width, size.height)
        .context("failed to initialise window renderer")?;
    info!(adapter = %context.describe(), "window renderer ready");

    let mut renderer = Renderer::new(&context, target, scene::renderer_settings(&scene.config));
    let mut show = Show::new(cli, scene, &renderer);
    let frame_limit = cli.frames;
    let mut last_frame = Instant::now();

    event_loop
        .run(move |event, elwt| match event {
            Event::WindowEvent { window_id, event } if window_id == window.id() => match event {
                WindowEvent::CloseRequested | WindowEvent::Destroyed => elwt.exit(),
                WindowEvent::Resized(new_size) => {
                    renderer.resize(new_size.width, new_size.height);
                }
                WindowEvent::RedrawRequested => {
                    let now = Instant::now();
                    let dt = now
                        .duration_since(last_frame)
                        .as_secs_f32()
                        .min(MAX_DT);
                    last_frame = now;

                    let logical = window.inner_size().to_logical::<f32>(window.scale_factor());
                    let viewport = Viewport::new(logical.width, logical.height);
                    show.frame(&mut renderer, dt, viewport);

                    if frame_limit.is_some_and(|limit| show.frames >= limit) {
                        elwt.exit();
                    }
                }
                _ => {}
            },
            Event::AboutToWait => {
                window.request_redraw();
                elwt.set_control_flow(ControlFlow::Wait);
            }
            _ => {}
        })
        .map_err(|err| anyhow!("window event loop error: {err}"))
}
