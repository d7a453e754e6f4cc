//! WGSL sources for every built-in pass.
//!
//! Compute shaders bind the scene as `texture_storage_2d<rgba8unorm, write>`,
//! which must stay in sync with [`crate::types::SCENE_FORMAT`].

use std::borrow::Cow;

/// Compiles a WGSL module. Validation errors are caught by the caller's
/// error scope (see [`crate::gpu::with_validation`]).
pub(crate) fn compile(device: &wgpu::Device, label: &str, source: &'static str) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source)),
    })
}

/// One direction of the separable Gaussian blur.
///
/// Dispatched twice per blur (horizontal, then vertical). Samples outside the
/// image clamp to the nearest edge pixel.
pub(crate) const BLUR_SHADER: &str = r#"
struct BlurParams {
    radius: u32,
    direction: u32,  // 0 = horizontal, 1 = vertical
    width: u32,
    height: u32,
};

@group(0) @binding(0) var input_tex: texture_2d<f32>;
@group(0) @binding(1) var output_tex: texture_storage_2d<rgba8unorm, write>;
@group(0) @binding(2) var<uniform> params: BlurParams;
@group(0) @binding(3) var<storage, read> kernel: array<f32>;

@compute @workgroup_size(16, 16)
fn cs_blur(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x >= params.width || gid.y >= params.height) { return; }

    let radius = i32(params.radius);
    let origin = vec2<i32>(i32(gid.x), i32(gid.y));
    var axis = vec2<i32>(1, 0);
    if (params.direction == 1u) {
        axis = vec2<i32>(0, 1);
    }
    let max_coord = vec2<i32>(i32(params.width) - 1, i32(params.height) - 1);

    var color = vec4<f32>(0.0);
    for (var k: i32 = -radius; k <= radius; k = k + 1) {
        let coord = clamp(origin + axis * k, vec2<i32>(0), max_coord);
        color = color + textureLoad(input_tex, coord, 0) * kernel[u32(k + radius)];
    }
    textureStore(output_tex, origin, color);
}
"#;

/// Keeps pixels whose Rec. 709 luminance reaches the threshold and zeroes
/// the rest.
pub(crate) const THRESHOLD_SHADER: &str = r#"
struct ThresholdParams {
    threshold: f32,
    width: u32,
    height: u32,
    _pad: u32,
};

@group(0) @binding(0) var input_tex: texture_2d<f32>;
@group(0) @binding(1) var output_tex: texture_storage_2d<rgba8unorm, write>;
@group(0) @binding(2) var<uniform> params: ThresholdParams;

@compute @workgroup_size(16, 16)
fn cs_threshold(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x >= params.width || gid.y >= params.height) { return; }

    let px = textureLoad(input_tex, vec2<u32>(gid.x, gid.y), 0);
    let luminance = dot(px.rgb, vec3<f32>(0.2126, 0.7152, 0.0722));
    var out = vec4<f32>(0.0);
    if (luminance >= params.threshold) {
        out = px;
    }
    textureStore(output_tex, vec2<u32>(gid.x, gid.y), out);
}
"#;

/// Fullscreen triangle that adds the blurred bright buffer onto the target.
/// The pipeline blends color `One + One` and leaves destination alpha alone.
pub(crate) const COMPOSITE_SHADER: &str = r#"
struct CompositeParams {
    intensity: f32,
    _pad0: f32,
    _pad1: f32,
    _pad2: f32,
};

@group(0) @binding(0) var bright_tex: texture_2d<f32>;
@group(0) @binding(1) var<uniform> params: CompositeParams;

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    return vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
}

@fragment
fn fs_main(@builtin(position) frag: vec4<f32>) -> @location(0) vec4<f32> {
    let bright = textureLoad(bright_tex, vec2<i32>(frag.xy), 0);
    return vec4<f32>(bright.rgb * params.intensity, 0.0);
}
"#;

/// Exposure, contrast, saturation and brightness in one compute pass.
pub(crate) const GRADING_SHADER: &str = r#"
struct GradingParams {
    exposure: f32,
    contrast: f32,
    saturation: f32,
    brightness: f32,
    width: u32,
    height: u32,
    _pad0: u32,
    _pad1: u32,
};

@group(0) @binding(0) var input_tex: texture_2d<f32>;
@group(0) @binding(1) var output_tex: texture_storage_2d<rgba8unorm, write>;
@group(0) @binding(2) var<uniform> params: GradingParams;

@compute @workgroup_size(16, 16)
fn cs_grade(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x >= params.width || gid.y >= params.height) { return; }

    let px = textureLoad(input_tex, vec2<u32>(gid.x, gid.y), 0);
    var rgb = px.rgb * exp2(params.exposure);
    rgb = (rgb - vec3<f32>(0.5)) * params.contrast + vec3<f32>(0.5);
    let luminance = dot(rgb, vec3<f32>(0.2126, 0.7152, 0.0722));
    rgb = mix(vec3<f32>(luminance), rgb, params.saturation);
    rgb = rgb + vec3<f32>(params.brightness);
    textureStore(output_tex, vec2<u32>(gid.x, gid.y), vec4<f32>(clamp(rgb, vec3<f32>(0.0), vec3<f32>(1.0)), px.a));
}
"#;

/// Instanced particle quads with a soft circular coverage mask.
pub(crate) const PARTICLE_SHADER: &str = r#"
struct Viewport {
    size: vec2<f32>,
    _pad: vec2<f32>,
};

@group(0) @binding(0) var<uniform> viewport: Viewport;

struct Instance {
    @location(0) center: vec2<f32>,
    @location(1) size: f32,
    @location(2) rotation: f32,
    @location(3) color: vec4<f32>,
};

struct VertexOut {
    @builtin(position) position: vec4<f32>,
    @location(0) local: vec2<f32>,
    @location(1) color: vec4<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) index: u32, instance: Instance) -> VertexOut {
    var corners = array<vec2<f32>, 6>(
        vec2<f32>(-1.0, -1.0),
        vec2<f32>(1.0, -1.0),
        vec2<f32>(1.0, 1.0),
        vec2<f32>(-1.0, -1.0),
        vec2<f32>(1.0, 1.0),
        vec2<f32>(-1.0, 1.0),
    );
    let corner = corners[index];
    let c = cos(instance.rotation);
    let s = sin(instance.rotation);
    let rotated = vec2<f32>(corner.x * c - corner.y * s, corner.x * s + corner.y * c);
    let point = instance.center + rotated * instance.size * 0.5;

    var out: VertexOut;
    out.position = vec4<f32>(point / viewport.size * 2.0 - 1.0, 0.0, 1.0);
    out.local = corner;
    out.color = instance.color;
    return out;
}

@fragment
fn fs_main(in: VertexOut) -> @location(0) vec4<f32> {
    let coverage = 1.0 - smoothstep(0.75, 1.0, length(in.local));
    return vec4<f32>(in.color.rgb, in.color.a * coverage);
}
"#;

/// Textured quad covering a rect given in NDC as `[left, bottom, right, top]`.
pub(crate) const BLIT_SHADER: &str = r#"
struct BlitRect {
    bounds: vec4<f32>,
};

@group(0) @binding(0) var source_tex: texture_2d<f32>;
@group(0) @binding(1) var source_sampler: sampler;
@group(0) @binding(2) var<uniform> rect: BlitRect;

struct VertexOut {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOut {
    var corners = array<vec2<f32>, 6>(
        vec2<f32>(0.0, 0.0),
        vec2<f32>(1.0, 0.0),
        vec2<f32>(1.0, 1.0),
        vec2<f32>(0.0, 0.0),
        vec2<f32>(1.0, 1.0),
        vec2<f32>(0.0, 1.0),
    );
    let corner = corners[index];
    let position = mix(rect.bounds.xy, rect.bounds.zw, corner);

    var out: VertexOut;
    out.position = vec4<f32>(position, 0.0, 1.0);
    out.uv = vec2<f32>(corner.x, 1.0 - corner.y);
    return out;
}

@fragment
fn fs_main(in: VertexOut) -> @location(0) vec4<f32> {
    return textureSample(source_tex, source_sampler, in.uv);
}
"#;

/// Built-in particle physics. Must follow `Particle::integrate` step for step.
pub(crate) const SIMULATION_SHADER: &str = r#"
struct Particle {
    position: vec2<f32>,
    velocity: vec2<f32>,
    life: f32,
    max_life: f32,
    size: f32,
    base_size: f32,
    size_velocity: f32,
    rotation: f32,
    rotation_velocity: f32,
    damping: f32,
    size_start: f32,
    size_end: f32,
    flags: u32,
    _pad: u32,
};

struct SimParams {
    gravity: vec2<f32>,
    dt: f32,
    global_damping: f32,
    count: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
};

const FADE_SIZE: u32 = 2u;

@group(0) @binding(0) var<storage, read_write> particles: array<Particle>;
@group(0) @binding(1) var<uniform> params: SimParams;

@compute @workgroup_size(64)
fn cs_simulate(@builtin(global_invocation_id) gid: vec3<u32>) {
    let index = gid.x;
    if (index >= params.count) { return; }

    var p = particles[index];
    if (p.life <= 0.0) { return; }

    let dt = params.dt;
    p.velocity = p.velocity + params.gravity * dt;
    let damping = max(1.0 - p.damping * dt, 0.0) * max(1.0 - params.global_damping * dt, 0.0);
    p.velocity = p.velocity * damping;
    p.position = p.position + p.velocity * dt;
    p.life = p.life - dt;

    if ((p.flags & FADE_SIZE) != 0u) {
        p.base_size = max(p.base_size + p.size_velocity * dt, 0.0);
        var progress = 1.0;
        if (p.max_life > 0.0) {
            progress = clamp((p.max_life - p.life) / p.max_life, 0.0, 1.0);
        }
        p.size = p.base_size * (p.size_start + (p.size_end - p.size_start) * progress);
    } else {
        p.size = max(p.size + p.size_velocity * dt, 0.0);
    }

    p.rotation = p.rotation + p.rotation_velocity * dt;
    particles[index] = p;
}
"#;
