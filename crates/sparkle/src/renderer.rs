use std::collections::HashMap;
use std::rc::Rc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::{TextureCache, TextureKey};
use crate::diagnostics::RenderDiagnostics;
use crate::effects::{
    EffectContext, EffectError, EffectParams, EffectRegistry, EffectStage, EFFECT_BLOOM,
    EFFECT_BLUR, EFFECT_COLOR_GRADING,
};
use crate::gpu::{Drawable, GpuContext, PresentTarget};
use crate::particles::{Particle, ParticleSystem};
use crate::passes::{
    check_render_target, BlitMode, BlitPass, BloomPass, BlurOwnership, BlurPass, ColorGrading,
    ColorGradingPass, PassError, ParticlePass, RenderPass,
};
use crate::types::{BlendMode, Rect, RendererSettings, Viewport, SCENE_FORMAT, SCENE_USAGE};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("a frame is already open")]
    AlreadyOpen,
    #[error("the presentation target has no drawable")]
    NoDrawable,
    #[error("the scene texture could not be allocated")]
    SceneUnavailable,
}

struct FrameState {
    encoder: wgpu::CommandEncoder,
    drawable: Drawable,
    scene: wgpu::Texture,
    render_target: Option<wgpu::Texture>,
}

impl FrameState {
    fn target(&self) -> &wgpu::Texture {
        self.render_target.as_ref().unwrap_or(&self.scene)
    }
}

/// Owns the frame lifecycle and every built-in pass.
///
/// A frame renders into a pooled scene texture in [`SCENE_FORMAT`]; draws and
/// effects all encode into one command encoder in call order. `end_frame`
/// copies the scene into the drawable and presents it.
///
/// ```text
/// Idle --begin_frame--> FrameOpen --end_frame--> Idle
/// ```
pub struct Renderer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    target: Box<dyn PresentTarget>,
    cache: TextureCache,
    particle_pass: ParticlePass,
    blit: BlitPass,
    registry: EffectRegistry,
    frame: Option<FrameState>,
    settings: RendererSettings,
    diagnostics: RenderDiagnostics,
}

impl Renderer {
    /// Builds the renderer and sets up its passes. A pass whose setup fails
    /// is disabled and logged; construction itself never fails.
    pub fn new(
        context: &GpuContext,
        target: impl PresentTarget + 'static,
        settings: RendererSettings,
    ) -> Self {
        let device = context.device.clone();

        let mut blur = BlurPass::new(settings.particle_blur_radius);
        setup_or_warn(&mut blur, &device);
        let blur = Rc::new(blur);

        let mut particle_pass = ParticlePass::new(SCENE_FORMAT);
        setup_or_warn(&mut particle_pass, &device);
        let mut blit = BlitPass::new();
        setup_or_warn(&mut blit, &device);

        let mut diagnostics = RenderDiagnostics::new();
        diagnostics.set_device_status(format!("device: {}", context.describe()));
        diagnostics.set_target_status(format!("target: {}", target.describe()));

        let mut renderer = Self {
            cache: TextureCache::for_device(&device),
            device,
            queue: context.queue.clone(),
            target: Box::new(target),
            particle_pass,
            blit,
            registry: EffectRegistry::new(),
            frame: None,
            settings,
            diagnostics,
        };

        let bloom = BloomPass::with_blur(
            renderer.settings.bloom_threshold,
            renderer.settings.bloom_intensity,
            renderer.settings.bloom_blur_sigma,
            BlurOwnership::Shared(Rc::clone(&blur)),
        );
        renderer.register_effect_stage(EffectStage::new(EFFECT_BLUR, blur));
        renderer.register_effect_stage(EffectStage::new(EFFECT_BLOOM, bloom));
        renderer.register_effect_stage(EffectStage::new(
            EFFECT_COLOR_GRADING,
            ColorGradingPass::new(ColorGrading::default()),
        ));

        let ready = renderer
            .registry
            .identifiers()
            .iter()
            .filter(|id| {
                renderer
                    .registry
                    .get(id)
                    .is_some_and(|stage| stage.pass().is_ready())
            })
            .count();
        renderer.diagnostics.set_renderer_status(format!(
            "renderer: {ready}/{} effects ready",
            renderer.registry.len()
        ));
        renderer
    }

    /// Opens a frame: acquires a drawable and a scene texture and clears the
    /// scene to [`RendererSettings::clear_color`].
    pub fn begin_frame(&mut self) -> Result<(), FrameError> {
        if self.frame.is_some() {
            warn!("begin_frame called while a frame is open");
            return Err(FrameError::AlreadyOpen);
        }

        let Some(drawable) = self.target.acquire() else {
            self.diagnostics.set_drawable_status("drawable: unavailable");
            self.diagnostics.record_attempt(false);
            return Err(FrameError::NoDrawable);
        };
        let (width, height) = drawable.size();
        let Some(scene) = self
            .cache
            .acquire(TextureKey::new(width, height, SCENE_FORMAT, SCENE_USAGE))
        else {
            warn!(width, height, "scene texture unavailable");
            self.diagnostics.record_attempt(false);
            return Err(FrameError::SceneUnavailable);
        };
        self.diagnostics
            .set_drawable_status(format!("drawable: {width}x{height}"));

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("sparkle frame"),
            });
        clear_texture(&mut encoder, &scene, self.settings.clear_color);
        self.frame = Some(FrameState {
            encoder,
            drawable,
            scene,
            render_target: None,
        });
        Ok(())
    }

    /// Presents the open frame. Does nothing when no frame is open.
    pub fn end_frame(&mut self) {
        let Some(frame) = self.frame.take() else {
            return;
        };
        let FrameState {
            mut encoder,
            drawable,
            scene,
            ..
        } = frame;

        let (width, height) = drawable.size();
        let full = Rect::new(0.0, 0.0, width as f32, height as f32);
        let presented = match self.blit.encode_blit(
            &mut encoder,
            &scene,
            drawable.texture(),
            full,
            BlitMode::Replace,
            Some(self.settings.clear_color),
        ) {
            Ok(()) => true,
            Err(error) => {
                warn!(%error, "could not copy the scene into the drawable");
                false
            }
        };

        self.queue.submit(std::iter::once(encoder.finish()));
        drawable.present();
        self.cache.release(scene);
        self.cache.trim(self.settings.texture_cache_limit);
        self.diagnostics.record_attempt(presented);
    }

    pub fn is_frame_open(&self) -> bool {
        self.frame.is_some()
    }

    /// Redirects draws and effects to `texture` until the end of the frame.
    /// `None` restores the scene.
    pub fn set_render_target(&mut self, texture: Option<wgpu::Texture>) {
        match self.frame.as_mut() {
            Some(frame) => {
                if let Some(Err(error)) = texture.as_ref().map(check_render_target) {
                    warn!(%error, "draws into this render target will be rejected");
                }
                frame.render_target = texture;
            }
            None => debug!("set_render_target ignored outside a frame"),
        }
    }

    pub fn clear_with_color(&mut self, color: wgpu::Color) {
        match self.frame.as_mut() {
            Some(frame) => {
                let FrameState {
                    encoder,
                    scene,
                    render_target,
                    ..
                } = frame;
                let target = render_target.as_ref().unwrap_or(scene);
                match check_render_target(target) {
                    Ok(()) => clear_texture(encoder, target, color),
                    Err(error) => warn!(%error, "clear_with_color skipped"),
                }
            }
            None => debug!("clear_with_color ignored outside a frame"),
        }
    }

    /// Draws every alive particle in `particles` into the current target.
    pub fn draw_particles(
        &mut self,
        particles: &[Particle],
        blend_mode: BlendMode,
        viewport: Viewport,
    ) -> Result<(), EffectError> {
        let frame = self.frame.as_mut().ok_or(EffectError::NoFrame)?;
        let FrameState {
            encoder,
            scene,
            render_target,
            ..
        } = frame;
        self.particle_pass
            .encode_particles(
                encoder,
                particles,
                blend_mode,
                viewport,
                render_target.as_ref().unwrap_or(scene),
                wgpu::LoadOp::Load,
            )
            .map_err(|source| pass_failure(self.particle_pass.name(), source))
    }

    /// Draws `system` using its blend mode and render handler.
    pub fn draw_particle_system(
        &mut self,
        system: &mut ParticleSystem,
        viewport: Viewport,
    ) -> Result<(), EffectError> {
        let frame = self.frame.as_mut().ok_or(EffectError::NoFrame)?;
        let sprites = system.sprites();
        let FrameState {
            encoder,
            scene,
            render_target,
            ..
        } = frame;
        self.particle_pass
            .encode_sprites(
                encoder,
                &sprites,
                system.blend_mode,
                viewport,
                render_target.as_ref().unwrap_or(scene),
                wgpu::LoadOp::Load,
            )
            .map_err(|source| pass_failure(self.particle_pass.name(), source))
    }

    /// Alpha-blends `texture` into `rect` of the current target.
    pub fn draw_texture(&mut self, texture: &wgpu::Texture, rect: Rect) -> Result<(), EffectError> {
        let frame = self.frame.as_mut().ok_or(EffectError::NoFrame)?;
        let FrameState {
            encoder,
            scene,
            render_target,
            ..
        } = frame;
        self.blit
            .encode_blit(
                encoder,
                texture,
                render_target.as_ref().unwrap_or(scene),
                rect,
                BlitMode::Blend,
                None,
            )
            .map_err(|source| pass_failure(self.blit.name(), source))
    }

    pub fn apply_blur(&mut self, radius: f32) -> Result<(), EffectError> {
        self.apply_effect(EFFECT_BLUR, &EffectParams::new().with("radius", radius))
    }

    /// Bloom with the configured threshold and sigma.
    pub fn apply_bloom(&mut self, intensity: f32) -> Result<(), EffectError> {
        let params = EffectParams::new()
            .with("threshold", self.settings.bloom_threshold)
            .with("intensity", intensity)
            .with("blur_sigma", self.settings.bloom_blur_sigma);
        self.apply_effect(EFFECT_BLOOM, &params)
    }

    pub fn apply_color_grading(&mut self, grading: ColorGrading) -> Result<(), EffectError> {
        self.apply_effect(EFFECT_COLOR_GRADING, &grading_params(grading))
    }

    /// Sets up `stage` and registers it, replacing any stage with the same
    /// identifier. A stage whose setup fails stays registered but disabled.
    pub fn register_effect_stage(&mut self, mut stage: EffectStage) -> Option<EffectStage> {
        if let Err(error) = stage.setup(&self.device) {
            warn!(effect = stage.identifier(), %error, "effect stage is disabled");
        }
        self.registry.register(stage)
    }

    pub fn unregister_effect_stage(&mut self, identifier: &str) -> Option<EffectStage> {
        self.registry.unregister(identifier)
    }

    pub fn effect_stage(&self, identifier: &str) -> Option<&EffectStage> {
        self.registry.get(identifier)
    }

    pub fn registered_effect_identifiers(&self) -> Vec<String> {
        self.registry.identifiers()
    }

    /// Runs the stage registered as `identifier` on the current target.
    pub fn apply_effect(
        &mut self,
        identifier: &str,
        params: &EffectParams,
    ) -> Result<(), EffectError> {
        let Some(frame) = self.frame.as_mut() else {
            debug!(effect = identifier, "effect ignored outside a frame");
            return Err(EffectError::NoFrame);
        };
        let Some(stage) = self.registry.get_mut(identifier) else {
            warn!(effect = identifier, "unknown effect");
            return Err(EffectError::UnknownEffect(identifier.to_string()));
        };
        let FrameState {
            encoder,
            scene,
            render_target,
            ..
        } = frame;
        let mut ctx = EffectContext {
            device: &self.device,
            encoder,
            cache: &mut self.cache,
            target: render_target.as_ref().unwrap_or(scene),
        };
        stage.encode(&mut ctx, params).map_err(|source| {
            warn!(effect = identifier, error = %source, "effect failed");
            pass_failure(identifier, source)
        })
    }

    /// Applies `identifiers` strictly in order, looking parameters up by
    /// identifier. Failing effects are skipped. Returns how many succeeded.
    pub fn apply_effects<S: AsRef<str>>(
        &mut self,
        identifiers: impl IntoIterator<Item = S>,
        params: &HashMap<String, EffectParams>,
    ) -> usize {
        let empty = EffectParams::new();
        identifiers
            .into_iter()
            .filter(|identifier| {
                let identifier = identifier.as_ref();
                let params = params.get(identifier).unwrap_or(&empty);
                self.apply_effect(identifier, params).is_ok()
            })
            .count()
    }

    /// One complete frame: clear, particles, optional blur and bloom from
    /// the settings, present. Returns whether a frame was presented.
    pub fn render_particle_frame(&mut self, system: &mut ParticleSystem, viewport: Viewport) -> bool {
        if self.begin_frame().is_err() {
            return false;
        }
        let mut rendered = self.draw_particle_system(system, viewport).is_ok();
        if self.settings.particle_blur_radius > 0.0 {
            rendered &= self.apply_blur(self.settings.particle_blur_radius).is_ok();
        }
        if self.settings.bloom_intensity > 0.0 {
            rendered &= self.apply_bloom(self.settings.bloom_intensity).is_ok();
        }
        self.end_frame();
        rendered
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.target.resize(width, height);
        self.diagnostics
            .set_target_status(format!("target: {}", self.target.describe()));
    }

    pub fn settings(&self) -> &RendererSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut RendererSettings {
        &mut self.settings
    }

    pub fn clear_color(&self) -> wgpu::Color {
        self.settings.clear_color
    }

    pub fn set_clear_color(&mut self, color: wgpu::Color) {
        self.settings.clear_color = color;
    }

    pub fn drawable_size(&self) -> (u32, u32) {
        self.frame
            .as_ref()
            .map(|frame| frame.drawable.size())
            .unwrap_or_else(|| self.target.size())
    }

    /// Texture the next draw or effect will write, while a frame is open.
    pub fn current_target(&self) -> Option<&wgpu::Texture> {
        self.frame.as_ref().map(FrameState::target)
    }

    pub fn texture_cache(&self) -> &TextureCache {
        &self.cache
    }

    pub fn texture_cache_mut(&mut self) -> &mut TextureCache {
        &mut self.cache
    }

    pub fn diagnostics(&self) -> &RenderDiagnostics {
        &self.diagnostics
    }

    pub fn diagnostics_mut(&mut self) -> &mut RenderDiagnostics {
        &mut self.diagnostics
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }
}

fn setup_or_warn(pass: &mut impl RenderPass, device: &wgpu::Device) {
    if let Err(error) = pass.setup(device) {
        warn!(pass = pass.name(), %error, "render pass is disabled");
    }
}

fn pass_failure(effect: &str, source: PassError) -> EffectError {
    EffectError::Pass {
        effect: effect.to_string(),
        source,
    }
}

fn grading_params(grading: ColorGrading) -> EffectParams {
    EffectParams::new()
        .with("exposure", grading.exposure)
        .with("contrast", grading.contrast)
        .with("saturation", grading.saturation)
        .with("brightness", grading.brightness)
}

fn clear_texture(encoder: &mut wgpu::CommandEncoder, texture: &wgpu::Texture, color: wgpu::Color) {
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("clear"),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: &view,
            depth_slice: None,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(color),
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grading_params_round_trip_through_overrides() {
        let grading = ColorGrading {
            exposure: 0.5,
            contrast: 1.1,
            saturation: 0.8,
            brightness: -0.05,
        };
        let params = grading_params(grading);
        assert_eq!(ColorGrading::default().overridden_by(&params), grading);
    }

    #[test]
    fn pass_failures_name_the_effect() {
        let error = pass_failure(EFFECT_BLOOM, PassError::TextureUnavailable);
        assert_eq!(
            error.to_string(),
            "effect `bloom` failed: no scratch texture available"
        );
    }
}
