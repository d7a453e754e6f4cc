//! Particle simulation and post-processing core for screensavers and
//! wallpapers.
//!
//! A host owns a [`ParticleSystem`], advances it once per tick, and hands it
//! to a [`Renderer`] which draws it into a pooled scene texture, runs named
//! effect stages over the result, and presents it:
//!
//! ```text
//!   host tick ──▶ ParticleSystem::advance(dt) ──(cpu | GpuSimulator)
//!        │
//!        ▼
//!   Renderer::begin_frame ──▶ draw_particle_system ──▶ apply_effects(["blur", "bloom"])
//!        │                          │                          │
//!        │                    ParticlePass               EffectRegistry ─▶ RenderPass
//!        │                                                     │
//!        └──────────────── end_frame ◀── TextureCache ◀────────┘
//!                             │
//!                             └─▶ BlitPass ─▶ PresentTarget (surface | offscreen)
//! ```
//!
//! Everything runs on the thread that owns the renderer. Passes whose setup
//! fails are disabled rather than fatal, so a degraded device still renders
//! whatever it can.

mod cache;
mod diagnostics;
mod effects;
mod gpu;
mod particles;
mod passes;
mod renderer;
mod shaders;
mod types;

pub use cache::{DeviceAllocator, TextureAllocator, TextureCache, TextureKey};
pub use diagnostics::{FrameRateMeter, RenderDiagnostics};
pub use effects::{
    EffectContext, EffectError, EffectHandler, EffectParams, EffectRegistry, EffectStage,
    EFFECT_BLOOM, EFFECT_BLUR, EFFECT_COLOR_GRADING,
};
pub use gpu::{read_rgba8, Drawable, GpuContext, OffscreenTarget, PresentTarget, SurfaceTarget};
pub use particles::{
    GpuSimulator, Particle, ParticleBehavior, ParticleInitializer, ParticleSprite, ParticleSystem,
    SimulationError, SimulationMode, StepOutcome,
};
pub use passes::{
    gaussian_kernel, BlitMode, BlitPass, BloomPass, BlurOwnership, BlurPass, ColorGrading,
    ColorGradingPass, ParticlePass, PassError, RenderPass, BLUR_EPSILON, MAX_BLUR_RADIUS,
};
pub use renderer::{FrameError, Renderer};
pub use types::{BlendMode, Rect, RendererSettings, Viewport, SCENE_FORMAT, SCENE_USAGE};
