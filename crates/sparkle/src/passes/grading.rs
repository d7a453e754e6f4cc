use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::cache::TextureCache;
use crate::effects::{EffectContext, EffectParams};
use crate::shaders;

use super::{
    check_scene_target, compute_pipeline, copy_whole, dispatch_filter, filter_layout, scratch_key,
    view, PassError, PassState, RenderPass,
};

/// Per-channel adjustments applied in order: exposure, contrast, saturation,
/// brightness. The result is clamped to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorGrading {
    /// Exposure in EV stops; color is multiplied by `2^exposure`.
    pub exposure: f32,
    /// Contrast around mid-grey; `1` is neutral.
    pub contrast: f32,
    /// `0` is greyscale, `1` is neutral.
    pub saturation: f32,
    /// Offset added to every channel.
    pub brightness: f32,
}

impl Default for ColorGrading {
    fn default() -> Self {
        Self {
            exposure: 0.0,
            contrast: 1.0,
            saturation: 1.0,
            brightness: 0.0,
        }
    }
}

impl ColorGrading {
    /// Reads `exposure`, `contrast`, `saturation` and `brightness` from
    /// `params`, falling back to `self` for missing entries.
    pub fn overridden_by(&self, params: &EffectParams) -> Self {
        Self {
            exposure: params.get_or("exposure", self.exposure),
            contrast: params.get_or("contrast", self.contrast),
            saturation: params.get_or("saturation", self.saturation),
            brightness: params.get_or("brightness", self.brightness),
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::default()
    }

    /// Reference implementation of the shader math for one linear RGB triple.
    pub fn apply(&self, rgb: [f32; 3]) -> [f32; 3] {
        let scale = self.exposure.exp2();
        let graded = rgb.map(|c| (c * scale - 0.5) * self.contrast + 0.5);
        let luminance = 0.2126 * graded[0] + 0.7152 * graded[1] + 0.0722 * graded[2];
        graded.map(|c| {
            let saturated = luminance + (c - luminance) * self.saturation;
            (saturated + self.brightness).clamp(0.0, 1.0)
        })
    }
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct GradingParams {
    exposure: f32,
    contrast: f32,
    saturation: f32,
    brightness: f32,
    width: u32,
    height: u32,
    _pad: [u32; 2],
}

struct GradingPipeline {
    device: wgpu::Device,
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
}

pub struct ColorGradingPass {
    pub grading: ColorGrading,
    state: PassState<GradingPipeline>,
}

impl ColorGradingPass {
    pub fn new(grading: ColorGrading) -> Self {
        Self {
            grading,
            state: PassState::Pending,
        }
    }

    /// Grades `target` in place through a pooled scratch texture.
    pub fn encode_grading(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        cache: &mut TextureCache,
        target: &wgpu::Texture,
        grading: ColorGrading,
    ) -> Result<(), PassError> {
        let resources = self.state.get()?;
        check_scene_target(target)?;
        if grading.is_identity() {
            return Ok(());
        }

        cache
            .with_texture(scratch_key(target), |_, scratch| {
                resources.encode(encoder, target, scratch, grading);
                copy_whole(encoder, scratch, target);
            })
            .ok_or(PassError::TextureUnavailable)
    }
}

impl GradingPipeline {
    fn build(device: &wgpu::Device) -> Self {
        let module = shaders::compile(device, "color grading", shaders::GRADING_SHADER);
        let layout = filter_layout(device, "color grading layout", false);
        let pipeline =
            compute_pipeline(device, "color grading pipeline", &layout, &module, "cs_grade");
        Self {
            device: device.clone(),
            pipeline,
            layout,
        }
    }

    fn encode(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        source: &wgpu::Texture,
        output: &wgpu::Texture,
        grading: ColorGrading,
    ) {
        let (width, height) = (source.width(), source.height());
        let params = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("color grading params"),
                contents: bytemuck::bytes_of(&GradingParams {
                    exposure: grading.exposure,
                    contrast: grading.contrast,
                    saturation: grading.saturation,
                    brightness: grading.brightness,
                    width,
                    height,
                    _pad: [0; 2],
                }),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let source_view = view(source);
        let output_view = view(output);
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("color grading bind group"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&source_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&output_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: params.as_entire_binding(),
                },
            ],
        });
        dispatch_filter(
            encoder,
            "color grading",
            &self.pipeline,
            &bind_group,
            width,
            height,
        );
    }
}

impl RenderPass for ColorGradingPass {
    fn name(&self) -> &'static str {
        "color-grading"
    }

    fn setup(&mut self, device: &wgpu::Device) -> Result<(), PassError> {
        self.state
            .build_once("color-grading", device, GradingPipeline::build)
    }

    fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    fn encode(
        &mut self,
        ctx: &mut EffectContext<'_>,
        params: &EffectParams,
    ) -> Result<(), PassError> {
        let grading = self.grading.overridden_by(params);
        self.encode_grading(ctx.encoder, ctx.cache, ctx.target, grading)
    }
}
