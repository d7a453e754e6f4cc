use std::rc::Rc;

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::cache::TextureCache;
use crate::effects::{EffectContext, EffectParams};
use crate::shaders;

use super::{
    check_scene_target, compute_pipeline, copy_whole, dispatch_filter, filter_layout, scratch_key,
    view, PassError, PassState, RenderPass, BLUR_EPSILON,
};

/// Largest kernel radius in taps on each side of the center.
pub const MAX_BLUR_RADIUS: usize = 64;

/// Normalized 1D Gaussian weights for `sigma`, `2r + 1` entries long with
/// `r = ceil(3 * sigma)` capped at [`MAX_BLUR_RADIUS`].
pub fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    if sigma <= BLUR_EPSILON {
        return vec![1.0];
    }
    let radius = ((sigma * 3.0).ceil() as usize).min(MAX_BLUR_RADIUS);
    let two_sigma_sq = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (0..=radius * 2)
        .map(|i| {
            let x = i as f32 - radius as f32;
            (-x * x / two_sigma_sq).exp()
        })
        .collect();
    let sum: f32 = kernel.iter().sum();
    for weight in &mut kernel {
        *weight /= sum;
    }
    kernel
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct BlurParams {
    radius: u32,
    direction: u32,
    width: u32,
    height: u32,
}

struct BlurPipelines {
    device: wgpu::Device,
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
}

/// Separable Gaussian blur run as two compute dispatches.
///
/// `radius` is the Gaussian sigma used when the pass runs as an effect
/// without an explicit `radius` parameter.
pub struct BlurPass {
    pub radius: f32,
    state: PassState<BlurPipelines>,
}

impl BlurPass {
    pub fn new(radius: f32) -> Self {
        Self {
            radius,
            state: PassState::Pending,
        }
    }

    /// Blurs `source` into `destination` with the given sigma. Both textures
    /// must have the same size; they may be the same texture.
    ///
    /// A sigma at or below [`BLUR_EPSILON`] copies `source` unchanged.
    pub fn encode_blur(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        cache: &mut TextureCache,
        source: &wgpu::Texture,
        destination: &wgpu::Texture,
        sigma: f32,
    ) -> Result<(), PassError> {
        let pipelines = self.state.get()?;
        check_scene_target(destination)?;
        if source.size() != destination.size() {
            return Err(PassError::IncompatibleTarget(
                "blur source and destination differ in size",
            ));
        }

        if sigma <= BLUR_EPSILON {
            if source != destination {
                copy_whole(encoder, source, destination);
            }
            return Ok(());
        }

        cache
            .with_texture(scratch_key(destination), |_, scratch| {
                pipelines.encode(encoder, source, scratch, destination, sigma);
            })
            .ok_or(PassError::TextureUnavailable)
    }

    /// Blurs `texture` in place. A sigma at or below [`BLUR_EPSILON`] does
    /// nothing.
    pub fn encode_blur_in_place(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        cache: &mut TextureCache,
        texture: &wgpu::Texture,
        sigma: f32,
    ) -> Result<(), PassError> {
        self.state.get()?;
        if sigma <= BLUR_EPSILON {
            return Ok(());
        }
        self.encode_blur(encoder, cache, texture, texture, sigma)
    }
}

impl BlurPipelines {
    fn build(device: &wgpu::Device) -> Self {
        let module = shaders::compile(device, "blur shader", shaders::BLUR_SHADER);
        let layout = filter_layout(device, "blur layout", true);
        let pipeline = compute_pipeline(device, "blur pipeline", &layout, &module, "cs_blur");
        Self {
            device: device.clone(),
            pipeline,
            layout,
        }
    }

    /// Horizontal pass `source -> scratch`, vertical pass `scratch -> destination`.
    fn encode(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        source: &wgpu::Texture,
        scratch: &wgpu::Texture,
        destination: &wgpu::Texture,
        sigma: f32,
    ) {
        let kernel = gaussian_kernel(sigma);
        let radius = (kernel.len() / 2) as u32;
        let kernel_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("blur kernel"),
                contents: bytemuck::cast_slice(&kernel),
                usage: wgpu::BufferUsages::STORAGE,
            });

        let (width, height) = (destination.width(), destination.height());
        let passes = [
            ("blur horizontal", 0u32, source, scratch),
            ("blur vertical", 1u32, scratch, destination),
        ];
        for (label, direction, input, output) in passes {
            let params = self
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("blur params"),
                    contents: bytemuck::bytes_of(&BlurParams {
                        radius,
                        direction,
                        width,
                        height,
                    }),
                    usage: wgpu::BufferUsages::UNIFORM,
                });
            let input_view = view(input);
            let output_view = view(output);
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: &self.layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&input_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(&output_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: params.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: kernel_buffer.as_entire_binding(),
                    },
                ],
            });
            dispatch_filter(encoder, label, &self.pipeline, &bind_group, width, height);
        }
    }
}

impl RenderPass for BlurPass {
    fn name(&self) -> &'static str {
        "blur"
    }

    fn setup(&mut self, device: &wgpu::Device) -> Result<(), PassError> {
        self.state.build_once("blur", device, BlurPipelines::build)
    }

    fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    fn encode(
        &mut self,
        ctx: &mut EffectContext<'_>,
        params: &EffectParams,
    ) -> Result<(), PassError> {
        let sigma = params.get_or("radius", self.radius);
        self.encode_blur_in_place(ctx.encoder, ctx.cache, ctx.target, sigma)
    }
}

/// A blur pass shared with other passes (see [`super::BlurOwnership`]).
///
/// Setup only builds pipelines while this is the sole handle; once shared the
/// pass must already be set up.
impl RenderPass for Rc<BlurPass> {
    fn name(&self) -> &'static str {
        "blur"
    }

    fn setup(&mut self, device: &wgpu::Device) -> Result<(), PassError> {
        if let Some(pass) = Rc::get_mut(self) {
            return pass.setup(device);
        }
        if self.is_ready() {
            Ok(())
        } else {
            Err(PassError::NotReady)
        }
    }

    fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    fn encode(
        &mut self,
        ctx: &mut EffectContext<'_>,
        params: &EffectParams,
    ) -> Result<(), PassError> {
        let sigma = params.get_or("radius", self.radius);
        self.encode_blur_in_place(ctx.encoder, ctx.cache, ctx.target, sigma)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_is_normalized_and_symmetric() {
        let kernel = gaussian_kernel(2.0);
        assert_eq!(kernel.len(), 2 * 6 + 1);
        let sum: f32 = kernel.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        for i in 0..kernel.len() / 2 {
            assert!((kernel[i] - kernel[kernel.len() - 1 - i]).abs() < 1e-7);
        }
        let center = kernel.len() / 2;
        assert!(kernel.iter().all(|&w| w <= kernel[center]));
    }

    #[test]
    fn tiny_sigma_is_identity_kernel() {
        assert_eq!(gaussian_kernel(0.0), vec![1.0]);
        assert_eq!(gaussian_kernel(BLUR_EPSILON), vec![1.0]);
    }

    #[test]
    fn kernel_radius_is_capped() {
        assert_eq!(gaussian_kernel(500.0).len(), 2 * MAX_BLUR_RADIUS + 1);
    }

    #[test]
    fn unset_pass_reports_not_ready() {
        let pass = BlurPass::new(3.0);
        assert!(!RenderPass::is_ready(&pass));
        assert!(!RenderPass::is_ready(&Rc::new(BlurPass::new(1.0))));
    }
}
