//! End-to-end checks against a real device. Every test returns early when no
//! adapter (hardware or software) is available.

use std::collections::HashMap;
use std::rc::Rc;

use glam::{Vec2, Vec4};
use sparkle::{
    read_rgba8, BlendMode, BlurPass, ColorGrading, EffectError, EffectParams, FrameError, GpuContext,
    OffscreenTarget, Particle, ParticleBehavior, ParticlePass, ParticleSystem, PassError, Rect,
    RenderPass, Renderer, RendererSettings, SimulationMode, Viewport, EFFECT_BLOOM, EFFECT_BLUR,
    SCENE_FORMAT, SCENE_USAGE,
};

const SIZE: u32 = 32;

fn context() -> Option<GpuContext> {
    match GpuContext::headless() {
        Ok(context) => Some(context),
        Err(err) => {
            eprintln!("skipping GPU test: {err:#}");
            None
        }
    }
}

fn renderer(context: &GpuContext) -> Renderer {
    let target = OffscreenTarget::new(&context.device, SIZE, SIZE);
    Renderer::new(context, target, RendererSettings::default())
}

fn texture(
    context: &GpuContext,
    format: wgpu::TextureFormat,
    usage: wgpu::TextureUsages,
) -> wgpu::Texture {
    context.device.create_texture(&wgpu::TextureDescriptor {
        label: Some("test texture"),
        size: wgpu::Extent3d {
            width: SIZE,
            height: SIZE,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage,
        view_formats: &[],
    })
}

fn scene_texture(context: &GpuContext, pixels: &[u8]) -> wgpu::Texture {
    let texture = context.device.create_texture(&wgpu::TextureDescriptor {
        label: Some("test target"),
        size: wgpu::Extent3d {
            width: SIZE,
            height: SIZE,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: SCENE_FORMAT,
        usage: SCENE_USAGE,
        view_formats: &[],
    });
    context.queue.write_texture(
        texture.as_image_copy(),
        pixels,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(SIZE * 4),
            rows_per_image: Some(SIZE),
        },
        texture.size(),
    );
    texture
}

fn solid(rgba: [u8; 4]) -> Vec<u8> {
    rgba.repeat((SIZE * SIZE) as usize)
}

fn noise_pattern() -> Vec<u8> {
    (0..SIZE * SIZE * 4)
        .map(|i| (i.wrapping_mul(2_654_435_761) >> 7) as u8)
        .collect()
}

/// Black image with one white pixel in the middle.
fn point_source() -> Vec<u8> {
    let mut pixels = vec![0u8; (SIZE * SIZE * 4) as usize];
    for y in 0..SIZE {
        for x in 0..SIZE {
            let offset = ((y * SIZE + x) * 4) as usize;
            pixels[offset + 3] = 255;
            if (x, y) == (SIZE / 2, SIZE / 2) {
                pixels[offset..offset + 3].fill(255);
            }
        }
    }
    pixels
}

/// Runs `effects` over a fresh target holding `pixels` and reads it back.
fn render_with(
    context: &GpuContext,
    pixels: &[u8],
    effects: impl FnOnce(&mut Renderer),
) -> Vec<u8> {
    let mut renderer = renderer(context);
    let target = scene_texture(context, pixels);
    renderer.begin_frame().expect("offscreen frame");
    renderer.set_render_target(Some(target.clone()));
    effects(&mut renderer);
    renderer.end_frame();
    read_rgba8(&context.device, &context.queue, &target).expect("readback")
}

fn bloom_params() -> EffectParams {
    EffectParams::new()
        .with("threshold", 0.02)
        .with("intensity", 1.0)
        .with("blur_sigma", 2.0)
}

#[test]
fn tiny_blur_leaves_image_untouched() {
    let Some(context) = context() else { return };
    let pattern = noise_pattern();

    let output = render_with(&context, &pattern, |renderer| {
        renderer.apply_blur(0.005).expect("identity blur");
    });

    assert_eq!(output, pattern);
}

#[test]
fn effect_chain_matches_manual_sequence_and_order_matters() {
    let Some(context) = context() else { return };
    let source = point_source();

    let mut params = HashMap::new();
    params.insert(
        EFFECT_BLUR.to_string(),
        EffectParams::new().with("radius", 2.0),
    );
    params.insert(EFFECT_BLOOM.to_string(), bloom_params());

    let chained = render_with(&context, &source, |renderer| {
        let applied = renderer.apply_effects([EFFECT_BLUR, EFFECT_BLOOM], &params);
        assert_eq!(applied, 2);
    });
    let manual = render_with(&context, &source, |renderer| {
        renderer.apply_blur(2.0).expect("blur");
        renderer
            .apply_effect(EFFECT_BLOOM, &bloom_params())
            .expect("bloom");
    });
    let reversed = render_with(&context, &source, |renderer| {
        let applied = renderer.apply_effects([EFFECT_BLOOM, EFFECT_BLUR], &params);
        assert_eq!(applied, 2);
    });

    let blurred = render_with(&context, &source, |renderer| {
        renderer.apply_blur(2.0).expect("blur");
    });

    assert_eq!(chained, manual);
    assert_ne!(chained, reversed);
    assert_ne!(chained, source);
    // Bloom still finds bright pixels after the blur, so it adds a glow.
    assert_ne!(chained, blurred);
}

#[test]
fn unknown_effects_are_skipped_in_a_chain() {
    let Some(context) = context() else { return };
    let source = point_source();

    let output = render_with(&context, &source, |renderer| {
        let applied = renderer.apply_effects(["missing", EFFECT_BLUR], &HashMap::new());
        assert_eq!(applied, 1);
        assert_eq!(
            renderer.apply_effect("missing", &EffectParams::new()),
            Err(EffectError::UnknownEffect("missing".into()))
        );
    });

    // The default blur radius is zero, so the image is unchanged.
    assert_eq!(output, source);
}

#[test]
fn second_begin_frame_is_rejected_and_first_frame_survives() {
    let Some(context) = context() else { return };
    let mut renderer = renderer(&context);

    renderer.begin_frame().expect("first frame");
    assert_eq!(renderer.begin_frame(), Err(FrameError::AlreadyOpen));
    assert!(renderer.is_frame_open());

    renderer.end_frame();
    assert!(!renderer.is_frame_open());
    assert_eq!(renderer.diagnostics().success_count(), 1);
    renderer.begin_frame().expect("frame after end_frame");
    renderer.end_frame();
}

#[test]
fn end_frame_without_open_frame_does_nothing() {
    let Some(context) = context() else { return };
    let mut renderer = renderer(&context);

    renderer.end_frame();

    assert_eq!(renderer.diagnostics().success_count(), 0);
    assert_eq!(renderer.diagnostics().failure_count(), 0);
    assert_eq!(renderer.texture_cache().allocation_count(), 0);
}

#[test]
fn unavailable_target_skips_the_frame() {
    let Some(context) = context() else { return };
    let mut target = OffscreenTarget::new(&context.device, SIZE, SIZE);
    target.set_available(false);
    let mut renderer = Renderer::new(&context, target, RendererSettings::default());

    assert_eq!(renderer.begin_frame(), Err(FrameError::NoDrawable));
    assert_eq!(renderer.apply_blur(3.0), Err(EffectError::NoFrame));
    assert_eq!(renderer.diagnostics().failure_count(), 1);
    let mut system = ParticleSystem::with_capacity(0);
    assert!(!renderer.render_particle_frame(&mut system, Viewport::new(32.0, 32.0)));
}

#[test]
fn scene_textures_are_recycled_between_frames() {
    let Some(context) = context() else { return };
    let mut renderer = renderer(&context);

    for _ in 0..3 {
        renderer.begin_frame().expect("frame");
        renderer.end_frame();
    }

    assert_eq!(renderer.texture_cache().allocation_count(), 1);
    assert_eq!(renderer.texture_cache().checked_out_count(), 0);
}

#[test]
fn builtin_effects_are_registered_and_replaceable() {
    let Some(context) = context() else { return };
    let mut renderer = renderer(&context);

    assert_eq!(
        renderer.registered_effect_identifiers(),
        vec!["bloom", "blur", "color-grading"]
    );
    assert!(renderer
        .effect_stage(EFFECT_BLUR)
        .is_some_and(|stage| stage.pass().is_ready()));

    let removed = renderer.unregister_effect_stage(EFFECT_BLOOM);
    assert!(removed.is_some());
    assert_eq!(renderer.registered_effect_identifiers().len(), 2);
}

fn fountain(system: &mut ParticleSystem) {
    let mut index = 0.0f32;
    system.spawn(200, &mut |particle: &mut Particle| {
        particle.position = Vec2::new(index * 0.05, 1.0);
        particle.velocity = Vec2::new((index * 0.37).sin() * 3.0, 4.0 + index * 0.01);
        particle.life = 0.35 + (index % 7.0) * 0.1;
        particle.max_life = 1.2;
        particle.size = 2.0;
        particle.size_velocity = 0.5;
        particle.damping = 0.3;
        particle.rotation_velocity = 1.5;
        particle.color = Vec4::new(1.0, 0.6, 0.2, 1.0);
        particle.behavior = ParticleBehavior::FADE_SIZE | ParticleBehavior::FADE_ALPHA;
        particle.size_over_life = (1.0, 0.0);
        index += 1.0;
    });
    system.gravity = Vec2::new(0.0, -9.8);
    system.global_damping = 0.1;
}

#[test]
fn gpu_simulation_matches_cpu_simulation() {
    let Some(context) = context() else { return };
    let mut cpu = ParticleSystem::with_capacity(200);
    let mut gpu = ParticleSystem::with_capacity(200);
    fountain(&mut cpu);
    fountain(&mut gpu);
    if !gpu.enable_gpu_simulation(&context.device, &context.queue) {
        eprintln!("skipping: compute simulation unavailable on this adapter");
        return;
    }
    assert_eq!(gpu.simulation_mode(), SimulationMode::Gpu);

    for _ in 0..30 {
        cpu.advance(1.0 / 60.0);
        gpu.advance(1.0 / 60.0);
    }
    gpu.finish_gpu_step();

    assert_eq!(cpu.alive_count(), gpu.alive_count());
    for (a, b) in cpu.particles().iter().zip(gpu.particles()) {
        assert!(a.position.distance(b.position) < 1e-3, "{a:?} vs {b:?}");
        assert!(a.velocity.distance(b.velocity) < 1e-3);
        assert!((a.life - b.life).abs() < 1e-4);
        assert!((a.size - b.size).abs() < 1e-3);
        assert!((a.rotation - b.rotation).abs() < 1e-3);
    }
}

#[test]
fn gpu_steps_land_on_the_following_advance() {
    let Some(context) = context() else { return };
    let mut system = ParticleSystem::with_capacity(200);
    fountain(&mut system);
    if !system.enable_gpu_simulation(&context.device, &context.queue) {
        eprintln!("skipping: compute simulation unavailable on this adapter");
        return;
    }
    let before = system.particles().to_vec();

    system.advance(1.0 / 60.0);
    assert!(system.has_pending_gpu_step());
    assert_eq!(system.particles(), &before[..]);

    system.finish_gpu_step();
    assert!(!system.has_pending_gpu_step());
    let mut cpu = ParticleSystem::with_capacity(200);
    fountain(&mut cpu);
    cpu.advance(1.0 / 60.0);
    assert_eq!(cpu.alive_count(), system.alive_count());
    for (a, b) in cpu.particles().iter().zip(system.particles()) {
        assert!(a.position.distance(b.position) < 1e-4, "{a:?} vs {b:?}");
    }

    system.advance(1.0 / 60.0);
    system.reset();
    assert!(!system.has_pending_gpu_step());
    system.advance(1.0 / 60.0);
    assert_eq!(system.alive_count(), 0);
}

fn disc(color: Vec4) -> Particle {
    Particle {
        position: Vec2::splat(SIZE as f32 / 2.0),
        life: 1.0,
        max_life: 1.0,
        size: SIZE as f32 * 2.0,
        base_size: SIZE as f32 * 2.0,
        color,
        ..Particle::default()
    }
}

fn near(actual: &[u8], expected: [u8; 4]) -> bool {
    actual
        .iter()
        .zip(expected)
        .all(|(&a, e)| a.abs_diff(e) <= 2)
}

#[test]
fn blend_modes_follow_source_over_and_additive_rules() {
    let Some(context) = context() else { return };
    let background = solid([0, 0, 128, 128]);
    let red = disc(Vec4::new(1.0, 0.0, 0.0, 0.5));
    let viewport = Viewport::new(SIZE as f32, SIZE as f32);

    let alpha = render_with(&context, &background, |renderer| {
        renderer
            .draw_particles(&[red.clone()], BlendMode::Alpha, viewport)
            .expect("alpha draw");
    });
    let additive = render_with(&context, &background, |renderer| {
        renderer
            .draw_particles(&[red], BlendMode::Additive, viewport)
            .expect("additive draw");
    });

    let center = ((SIZE / 2 * SIZE + SIZE / 2) * 4) as usize;
    // src * a + dst * (1 - a), alpha accumulates.
    let alpha = &alpha[center..center + 4];
    assert!(near(alpha, [128, 0, 64, 191]), "{alpha:?}");
    // src * a + dst, destination alpha kept.
    let additive = &additive[center..center + 4];
    assert!(near(additive, [128, 0, 128, 128]), "{additive:?}");
}

#[test]
fn rejected_draws_leave_the_frame_intact() {
    let Some(context) = context() else { return };
    let mut renderer = renderer(&context);
    let good = scene_texture(&context, &solid([0, 0, 0, 255]));
    let unattachable = texture(
        &context,
        SCENE_FORMAT,
        wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
    );
    let unfilterable = texture(
        &context,
        wgpu::TextureFormat::R32Float,
        wgpu::TextureUsages::TEXTURE_BINDING,
    );
    let viewport = Viewport::new(SIZE as f32, SIZE as f32);
    let white = disc(Vec4::ONE);

    renderer.begin_frame().expect("frame");
    renderer.set_render_target(Some(good.clone()));
    renderer.clear_with_color(wgpu::Color::WHITE);

    renderer.set_render_target(Some(unattachable));
    renderer.clear_with_color(wgpu::Color::RED);
    let drawn = renderer.draw_particles(&[white], BlendMode::Alpha, viewport);
    assert!(matches!(
        drawn,
        Err(EffectError::Pass {
            source: PassError::IncompatibleTarget(_),
            ..
        })
    ));

    renderer.set_render_target(Some(good.clone()));
    let blitted = renderer.draw_texture(&unfilterable, Rect::new(0.0, 0.0, 8.0, 8.0));
    assert!(matches!(
        blitted,
        Err(EffectError::Pass {
            source: PassError::IncompatibleTarget(_),
            ..
        })
    ));
    renderer.end_frame();

    assert!(renderer.diagnostics().last_attempt_succeeded());
    let pixels = read_rgba8(&context.device, &context.queue, &good).expect("readback");
    assert_eq!(pixels, solid([255, 255, 255, 255]));
}

#[test]
fn failed_setup_disables_a_pass_for_good() {
    let Some(context) = context() else { return };
    let mut pass = ParticlePass::new(wgpu::TextureFormat::Depth32Float);

    assert!(matches!(pass.setup(&context.device), Err(PassError::Setup(_))));
    assert!(!pass.is_ready());
    assert_eq!(pass.setup(&context.device), Err(PassError::NotReady));

    let target = scene_texture(&context, &solid([0, 0, 0, 255]));
    let mut encoder = context
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
    let encoded = pass.encode_particles(
        &mut encoder,
        &[disc(Vec4::ONE)],
        BlendMode::Alpha,
        Viewport::new(SIZE as f32, SIZE as f32),
        &target,
        wgpu::LoadOp::Load,
    );
    assert_eq!(encoded, Err(PassError::NotReady));
}

#[test]
fn effects_return_every_scratch_texture() {
    let Some(context) = context() else { return };
    let mut renderer = renderer(&context);
    let target = scene_texture(&context, &point_source());
    let not_storage = texture(
        &context,
        SCENE_FORMAT,
        wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
    );

    renderer.begin_frame().expect("frame");
    // Only the scene texture is checked out while a frame is open.
    assert_eq!(renderer.texture_cache().checked_out_count(), 1);
    renderer.set_render_target(Some(target));

    renderer.apply_blur(2.0).expect("blur");
    assert_eq!(renderer.texture_cache().checked_out_count(), 1);
    renderer.apply_bloom(1.0).expect("bloom");
    assert_eq!(renderer.texture_cache().checked_out_count(), 1);
    renderer
        .apply_color_grading(ColorGrading {
            exposure: 0.5,
            ..ColorGrading::default()
        })
        .expect("grading");
    assert_eq!(renderer.texture_cache().checked_out_count(), 1);

    renderer.set_render_target(Some(not_storage));
    assert!(renderer.apply_bloom(1.0).is_err());
    assert!(renderer.apply_blur(2.0).is_err());
    assert_eq!(renderer.texture_cache().checked_out_count(), 1);

    renderer.end_frame();
    assert_eq!(renderer.texture_cache().checked_out_count(), 0);
}

#[test]
fn shared_blur_is_built_only_through_its_last_handle() {
    let Some(context) = context() else { return };
    let mut blur = Rc::new(BlurPass::new(1.0));
    let other = Rc::clone(&blur);

    assert_eq!(
        RenderPass::setup(&mut blur, &context.device),
        Err(PassError::NotReady)
    );
    drop(other);
    assert_eq!(RenderPass::setup(&mut blur, &context.device), Ok(()));

    let _shared = Rc::clone(&blur);
    assert_eq!(RenderPass::setup(&mut blur, &context.device), Ok(()));
    assert!(blur.is_ready());
}
