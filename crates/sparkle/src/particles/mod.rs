//! Particle records and the system that spawns, advances, and retires them.
//!
//! Simulation runs on the CPU by default. A [`GpuSimulator`] can be attached
//! to move the built-in physics onto a compute shader. GPU steps are
//! pipelined: each lands in the CPU collection one `advance` later, and a
//! readback that is late is finished on the CPU rather than waited for.

mod gpu;

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec4};
use tracing::{debug, warn};

use crate::types::BlendMode;

pub use gpu::{GpuSimulator, SimulationError, StepOutcome};

bitflags! {
    /// Per-particle behaviour switches evaluated by the simulation and renderer.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct ParticleBehavior: u32 {
        /// Fade alpha towards zero as the particle ages (render time only).
        const FADE_ALPHA = 1 << 0;
        /// Interpolate size across `size_over_life` as the particle ages.
        const FADE_SIZE = 1 << 1;
    }
}

/// A single particle. Owned by the [`ParticleSystem`] that spawned it.
#[derive(Debug, Clone, PartialEq)]
pub struct Particle {
    pub position: Vec2,
    pub velocity: Vec2,
    /// Remaining lifetime in seconds; the particle is alive while this is > 0.
    pub life: f32,
    /// Lifetime at spawn in seconds.
    pub max_life: f32,
    pub size: f32,
    /// Reference size scaled by `size_over_life` when `FADE_SIZE` is set.
    pub base_size: f32,
    pub size_velocity: f32,
    /// Straight (non-premultiplied) RGBA.
    pub color: Vec4,
    pub rotation: f32,
    pub rotation_velocity: f32,
    /// Fraction of velocity removed per second.
    pub damping: f32,
    pub behavior: ParticleBehavior,
    /// Size multiplier at normalized age 0 and 1.
    pub size_over_life: (f32, f32),
    pub user_scalar: f32,
    pub user_vector: Vec2,
}

impl Default for Particle {
    fn default() -> Self {
        Self {
            position: Vec2::ZERO,
            velocity: Vec2::ZERO,
            life: 1.0,
            max_life: 1.0,
            size: 1.0,
            base_size: 0.0,
            size_velocity: 0.0,
            color: Vec4::ONE,
            rotation: 0.0,
            rotation_velocity: 0.0,
            damping: 0.0,
            behavior: ParticleBehavior::empty(),
            size_over_life: (1.0, 1.0),
            user_scalar: 0.0,
            user_vector: Vec2::ZERO,
        }
    }
}

impl Particle {
    pub fn is_alive(&self) -> bool {
        self.life > 0.0
    }

    /// `(max_life - life) / max_life`, clamped to `[0, 1]`.
    pub fn normalized_age(&self) -> f32 {
        if self.max_life <= 0.0 {
            return 1.0;
        }
        ((self.max_life - self.life) / self.max_life).clamp(0.0, 1.0)
    }

    /// Color used for drawing. `FADE_ALPHA` scales alpha by the remaining
    /// life fraction without touching the stored color.
    pub fn effective_color(&self) -> Vec4 {
        if self.behavior.contains(ParticleBehavior::FADE_ALPHA) {
            let remaining = 1.0 - self.normalized_age();
            Vec4::new(
                self.color.x,
                self.color.y,
                self.color.z,
                self.color.w * remaining,
            )
        } else {
            self.color
        }
    }

    /// Instance record consumed by the particle draw pipeline.
    pub fn sprite(&self) -> ParticleSprite {
        ParticleSprite {
            center: self.position.to_array(),
            size: self.size,
            rotation: self.rotation,
            color: self.effective_color().to_array(),
        }
    }

    /// Applies the built-in physics for one step. Shared with the GPU shader,
    /// which must follow the same order of operations.
    pub(crate) fn integrate(&mut self, dt: f32, gravity: Vec2, global_damping: f32) {
        self.velocity += gravity * dt;
        let damping =
            (1.0 - self.damping * dt).max(0.0) * (1.0 - global_damping * dt).max(0.0);
        self.velocity *= damping;
        self.position += self.velocity * dt;
        self.life -= dt;

        if self.behavior.contains(ParticleBehavior::FADE_SIZE) {
            self.base_size = (self.base_size + self.size_velocity * dt).max(0.0);
            let (start, end) = self.size_over_life;
            let progress = self.normalized_age();
            self.size = self.base_size * (start + (end - start) * progress);
        } else {
            self.size = (self.size + self.size_velocity * dt).max(0.0);
        }

        self.rotation += self.rotation_velocity * dt;
    }
}

/// GPU instance layout for one particle quad.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ParticleSprite {
    pub center: [f32; 2],
    pub size: f32,
    pub rotation: f32,
    pub color: [f32; 4],
}

/// Where [`ParticleSystem::advance`] runs the built-in physics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimulationMode {
    #[default]
    Cpu,
    Gpu,
}

pub type ParticleInitializer<'a> = dyn FnMut(&mut Particle) + 'a;
pub type ParticleUpdateHandler = Box<dyn FnMut(&mut Particle, f32)>;
pub type ParticleRenderHandler = Box<dyn FnMut(&Particle, &mut ParticleSprite)>;

/// Owns a particle collection and advances it every frame.
pub struct ParticleSystem {
    particles: Vec<Particle>,
    max_particles: Option<usize>,
    pub blend_mode: BlendMode,
    /// Acceleration applied to every particle (units per second squared).
    pub gravity: Vec2,
    /// Fraction of velocity removed per second, on top of per-particle damping.
    pub global_damping: f32,
    update_handler: Option<ParticleUpdateHandler>,
    render_handler: Option<ParticleRenderHandler>,
    mode: SimulationMode,
    gpu_locked_out: bool,
    simulator: Option<GpuSimulator>,
}

impl ParticleSystem {
    /// Creates a growable system with room for `capacity` particles.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            particles: Vec::with_capacity(capacity),
            max_particles: None,
            blend_mode: BlendMode::default(),
            gravity: Vec2::ZERO,
            global_damping: 0.0,
            update_handler: None,
            render_handler: None,
            mode: SimulationMode::Cpu,
            gpu_locked_out: false,
            simulator: None,
        }
    }

    /// Creates a system that never holds more than `max_particles`.
    pub fn bounded(max_particles: usize) -> Self {
        let mut system = Self::with_capacity(max_particles);
        system.max_particles = Some(max_particles);
        system
    }

    /// Appends up to `count` particles, each configured by `initializer`
    /// exactly once. Returns how many were spawned.
    pub fn spawn(&mut self, count: usize, initializer: &mut ParticleInitializer<'_>) -> usize {
        let room = self
            .max_particles
            .map_or(count, |max| max.saturating_sub(self.particles.len()));
        let spawned = count.min(room);
        if spawned < count {
            debug!(
                requested = count,
                spawned,
                "particle system is full; dropping spawn requests"
            );
        }

        self.particles.reserve(spawned);
        for _ in 0..spawned {
            let mut particle = Particle::default();
            initializer(&mut particle);
            if particle.base_size <= 0.0 {
                particle.base_size = particle.size;
            }
            debug_assert!(particle.max_life > 0.0, "particles need a positive max_life");
            self.particles.push(particle);
        }
        spawned
    }

    /// Advances every alive particle by `dt` seconds and removes expired ones.
    ///
    /// A non-positive `dt` leaves all particles untouched. In GPU mode the
    /// step is queued on the device and lands on the next `advance` (or
    /// [`finish_gpu_step`](Self::finish_gpu_step)), so the collection trails
    /// the simulation by one step.
    pub fn advance(&mut self, dt: f32) {
        if dt <= 0.0 {
            self.particles.retain(Particle::is_alive);
            return;
        }

        self.settle_gpu_step(false);
        self.particles.retain(Particle::is_alive);
        if self.particles.is_empty() {
            return;
        }
        if self.wants_gpu() && self.submit_gpu_step(dt) {
            return;
        }

        let gravity = self.gravity;
        let global_damping = self.global_damping;
        for particle in self.particles.iter_mut().filter(|p| p.is_alive()) {
            particle.integrate(dt, gravity, global_damping);
        }
        if let Some(handler) = self.update_handler.as_mut() {
            for particle in self.particles.iter_mut().filter(|p| p.is_alive()) {
                handler(particle, dt);
            }
        }
        self.particles.retain(Particle::is_alive);
    }

    /// Blocks until the queued GPU step has been written back, then removes
    /// expired particles. Does nothing on the CPU path.
    pub fn finish_gpu_step(&mut self) {
        self.settle_gpu_step(true);
        self.particles.retain(Particle::is_alive);
    }

    /// Whether a GPU step has been queued but not yet written back.
    pub fn has_pending_gpu_step(&self) -> bool {
        self.simulator
            .as_ref()
            .is_some_and(GpuSimulator::has_pending_step)
    }

    fn settle_gpu_step(&mut self, wait: bool) {
        let Some(simulator) = self.simulator.as_mut() else {
            return;
        };
        if let Err(error) = simulator.collect(&mut self.particles, wait) {
            warn!(%error, "GPU particle readback failed; continuing on the CPU");
            self.simulator = None;
        }
    }

    fn submit_gpu_step(&mut self, dt: f32) -> bool {
        let Some(simulator) = self.simulator.as_mut() else {
            return false;
        };
        match simulator.submit(&self.particles, dt, self.gravity, self.global_damping) {
            Ok(()) => true,
            Err(error) => {
                warn!(%error, "GPU particle simulation failed; continuing on the CPU");
                self.simulator = None;
                false
            }
        }
    }

    fn wants_gpu(&self) -> bool {
        self.mode == SimulationMode::Gpu && !self.gpu_locked_out && self.simulator.is_some()
    }

    /// Requests a simulation mode. GPU mode only takes effect once a
    /// simulator is attached and no update handler has been set.
    pub fn set_simulation_mode(&mut self, mode: SimulationMode) {
        if mode == SimulationMode::Gpu && self.gpu_locked_out {
            debug!("GPU simulation requested after an update handler was set; staying on CPU");
        }
        self.mode = mode;
    }

    /// Builds a compute simulator on `device` and switches to GPU mode.
    /// Falls back to CPU silently (with a warning) if compute is unavailable.
    pub fn enable_gpu_simulation(&mut self, device: &wgpu::Device, queue: &wgpu::Queue) -> bool {
        if self.gpu_locked_out {
            return false;
        }
        self.settle_gpu_step(false);
        match GpuSimulator::new(device, queue) {
            Ok(simulator) => {
                self.simulator = Some(simulator);
                self.mode = SimulationMode::Gpu;
                true
            }
            Err(error) => {
                warn!(%error, "GPU particle simulation unavailable; using the CPU path");
                self.simulator = None;
                self.mode = SimulationMode::Cpu;
                false
            }
        }
    }

    /// The path the next `advance` will take.
    pub fn simulation_mode(&self) -> SimulationMode {
        if self.wants_gpu() {
            SimulationMode::Gpu
        } else {
            SimulationMode::Cpu
        }
    }

    /// Installs a per-particle callback run after the built-in physics.
    ///
    /// Host closures cannot run on the GPU, so this pins the system to CPU
    /// simulation for the rest of its life.
    pub fn set_update_handler(&mut self, handler: impl FnMut(&mut Particle, f32) + 'static) {
        self.settle_gpu_step(false);
        self.update_handler = Some(Box::new(handler));
        if !self.gpu_locked_out {
            debug!("particle update handler installed; GPU simulation disabled");
        }
        self.gpu_locked_out = true;
        self.simulator = None;
    }

    pub fn clear_update_handler(&mut self) {
        self.update_handler = None;
    }

    /// Installs a callback that may adjust each sprite just before drawing.
    pub fn set_render_handler(
        &mut self,
        handler: impl FnMut(&Particle, &mut ParticleSprite) + 'static,
    ) {
        self.render_handler = Some(Box::new(handler));
    }

    pub fn clear_render_handler(&mut self) {
        self.render_handler = None;
    }

    /// Draw instances for all alive particles, in collection order.
    pub fn sprites(&mut self) -> Vec<ParticleSprite> {
        let mut sprites = Vec::with_capacity(self.particles.len());
        for particle in self.particles.iter().filter(|p| p.is_alive()) {
            let mut sprite = particle.sprite();
            if let Some(handler) = self.render_handler.as_mut() {
                handler(particle, &mut sprite);
            }
            sprites.push(sprite);
        }
        sprites
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn alive_count(&self) -> usize {
        self.particles.iter().filter(|p| p.is_alive()).count()
    }

    pub fn max_particles(&self) -> Option<usize> {
        self.max_particles
    }

    /// Removes every particle.
    pub fn reset(&mut self) {
        if let Some(simulator) = self.simulator.as_mut() {
            simulator.discard();
        }
        self.particles.clear();
    }
}
