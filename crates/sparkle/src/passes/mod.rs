//! Render passes: self-contained units of GPU work with a fallible setup
//! phase and an encode phase that writes into a target texture.
//!
//! Compute passes (blur, bloom threshold, color grading) read the target as a
//! sampled texture and write a pooled scratch texture, so targets must carry
//! [`SCENE_USAGE`] and use [`SCENE_FORMAT`].

mod blit;
mod bloom;
mod blur;
mod grading;
mod particle;

use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::TextureKey;
use crate::effects::{EffectContext, EffectParams};
use crate::gpu::with_validation;
use crate::types::{SCENE_FORMAT, SCENE_USAGE};

pub use blit::{BlitMode, BlitPass};
pub use bloom::{BloomPass, BlurOwnership};
pub use blur::{gaussian_kernel, BlurPass, MAX_BLUR_RADIUS};
pub use grading::{ColorGrading, ColorGradingPass};
pub use particle::ParticlePass;

/// Sigma at or below which a blur is the identity.
pub const BLUR_EPSILON: f32 = 0.01;

const WORKGROUP_SIZE: u32 = 16;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PassError {
    #[error("render pass is not set up or was disabled by a failed setup")]
    NotReady,
    #[error("pipeline setup failed: {0}")]
    Setup(String),
    #[error("no scratch texture available")]
    TextureUnavailable,
    #[error("target texture is incompatible: {0}")]
    IncompatibleTarget(&'static str),
    #[error("`{0}` cannot be applied as an effect")]
    Unsupported(&'static str),
}

/// A unit of GPU work.
///
/// `setup` is called once with the renderer's device. If it fails the pass
/// stays disabled for good and every later encode returns
/// [`PassError::NotReady`].
pub trait RenderPass: 'static {
    fn name(&self) -> &'static str;

    fn setup(&mut self, device: &wgpu::Device) -> Result<(), PassError>;

    fn is_ready(&self) -> bool;

    /// Applies the pass to `ctx.target` in place. Passes that cannot run as
    /// a post-processing effect keep the default.
    fn encode(
        &mut self,
        ctx: &mut EffectContext<'_>,
        params: &EffectParams,
    ) -> Result<(), PassError> {
        let _ = (ctx, params);
        Err(PassError::Unsupported(self.name()))
    }
}

/// Pipeline lifecycle shared by the built-in passes.
pub(crate) enum PassState<T> {
    Pending,
    Ready(T),
    Disabled,
}

impl<T> PassState<T> {
    pub(crate) fn is_ready(&self) -> bool {
        matches!(self, PassState::Ready(_))
    }

    pub(crate) fn get(&self) -> Result<&T, PassError> {
        match self {
            PassState::Ready(resources) => Ok(resources),
            PassState::Pending | PassState::Disabled => Err(PassError::NotReady),
        }
    }

    /// Builds the resources on first call. A build that trips wgpu
    /// validation disables the pass permanently.
    pub(crate) fn build_once(
        &mut self,
        pass: &'static str,
        device: &wgpu::Device,
        build: impl FnOnce(&wgpu::Device) -> T,
    ) -> Result<(), PassError> {
        match self {
            PassState::Ready(_) => Ok(()),
            PassState::Disabled => Err(PassError::NotReady),
            PassState::Pending => match with_validation(device, || build(device)) {
                Ok(resources) => {
                    debug!(pass, "render pass ready");
                    *self = PassState::Ready(resources);
                    Ok(())
                }
                Err(error) => {
                    warn!(pass, %error, "render pass setup failed; pass disabled");
                    *self = PassState::Disabled;
                    Err(PassError::Setup(error.to_string()))
                }
            },
        }
    }
}

/// Key for a scratch texture shaped like `texture`.
pub(crate) fn scratch_key(texture: &wgpu::Texture) -> TextureKey {
    TextureKey::new(texture.width(), texture.height(), SCENE_FORMAT, SCENE_USAGE)
}

/// Rejects targets the compute passes cannot read and write.
pub(crate) fn check_scene_target(texture: &wgpu::Texture) -> Result<(), PassError> {
    if texture.format() != SCENE_FORMAT {
        return Err(PassError::IncompatibleTarget("format must be rgba8unorm"));
    }
    if !texture.usage().contains(SCENE_USAGE) {
        return Err(PassError::IncompatibleTarget("usage must include SCENE_USAGE"));
    }
    Ok(())
}

/// Rejects textures a render pass cannot attach as its color target.
pub(crate) fn check_render_target(texture: &wgpu::Texture) -> Result<(), PassError> {
    if !texture
        .usage()
        .contains(wgpu::TextureUsages::RENDER_ATTACHMENT)
    {
        return Err(PassError::IncompatibleTarget(
            "render target must allow RENDER_ATTACHMENT",
        ));
    }
    if texture.dimension() != wgpu::TextureDimension::D2 || texture.sample_count() != 1 {
        return Err(PassError::IncompatibleTarget(
            "render target must be a single-sampled 2D texture",
        ));
    }
    Ok(())
}

/// Rejects textures that cannot be bound to a filtering sampler.
pub(crate) fn check_filterable_source(texture: &wgpu::Texture) -> Result<(), PassError> {
    if !texture
        .usage()
        .contains(wgpu::TextureUsages::TEXTURE_BINDING)
    {
        return Err(PassError::IncompatibleTarget(
            "source must allow TEXTURE_BINDING",
        ));
    }
    if texture.dimension() != wgpu::TextureDimension::D2 || texture.sample_count() != 1 {
        return Err(PassError::IncompatibleTarget(
            "source must be a single-sampled 2D texture",
        ));
    }
    match texture.format().sample_type(None, None) {
        Some(wgpu::TextureSampleType::Float { filterable: true }) => Ok(()),
        _ => Err(PassError::IncompatibleTarget(
            "source format must be filterable float",
        )),
    }
}

pub(crate) fn view(texture: &wgpu::Texture) -> wgpu::TextureView {
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

/// Input texture, output storage texture, uniform params, and optionally a
/// read-only storage buffer at binding 3.
pub(crate) fn filter_layout(
    device: &wgpu::Device,
    label: &str,
    with_storage_buffer: bool,
) -> wgpu::BindGroupLayout {
    let mut entries = vec![
        wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        },
        wgpu::BindGroupLayoutEntry {
            binding: 1,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::StorageTexture {
                access: wgpu::StorageTextureAccess::WriteOnly,
                format: SCENE_FORMAT,
                view_dimension: wgpu::TextureViewDimension::D2,
            },
            count: None,
        },
        wgpu::BindGroupLayoutEntry {
            binding: 2,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        },
    ];
    if with_storage_buffer {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: 3,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        });
    }
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &entries,
    })
}

pub(crate) fn compute_pipeline(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::BindGroupLayout,
    module: &wgpu::ShaderModule,
    entry_point: &str,
) -> wgpu::ComputePipeline {
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[layout],
        push_constant_ranges: &[],
    });
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        module,
        entry_point: Some(entry_point),
        compilation_options: wgpu::PipelineCompilationOptions::default(),
        cache: None,
    })
}

/// One 16x16-workgroup dispatch covering `width`x`height` pixels.
pub(crate) fn dispatch_filter(
    encoder: &mut wgpu::CommandEncoder,
    label: &str,
    pipeline: &wgpu::ComputePipeline,
    bind_group: &wgpu::BindGroup,
    width: u32,
    height: u32,
) {
    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
        label: Some(label),
        timestamp_writes: None,
    });
    pass.set_pipeline(pipeline);
    pass.set_bind_group(0, bind_group, &[]);
    pass.dispatch_workgroups(
        width.div_ceil(WORKGROUP_SIZE),
        height.div_ceil(WORKGROUP_SIZE),
        1,
    );
}

/// Copies all of `source` into `destination`; both must share size and format.
pub(crate) fn copy_whole(
    encoder: &mut wgpu::CommandEncoder,
    source: &wgpu::Texture,
    destination: &wgpu::Texture,
) {
    encoder.copy_texture_to_texture(
        source.as_image_copy(),
        destination.as_image_copy(),
        source.size(),
    );
}
