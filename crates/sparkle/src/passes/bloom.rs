use std::rc::Rc;

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::cache::TextureCache;
use crate::effects::{EffectContext, EffectParams};
use crate::shaders;
use crate::types::SCENE_FORMAT;

use super::blur::BlurPass;
use super::{
    check_scene_target, compute_pipeline, dispatch_filter, filter_layout, scratch_key, view,
    PassError, PassState, RenderPass,
};

/// Who owns the blur a [`BloomPass`] runs on its bright buffer.
pub enum BlurOwnership {
    /// Private pass, set up together with the bloom pass.
    Owned(BlurPass),
    /// Pass shared with other stages. It must be set up by its creator; the
    /// bloom pass only checks that it is ready.
    Shared(Rc<BlurPass>),
}

impl BlurOwnership {
    fn pass(&self) -> &BlurPass {
        match self {
            BlurOwnership::Owned(pass) => pass,
            BlurOwnership::Shared(pass) => pass,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ThresholdParams {
    threshold: f32,
    width: u32,
    height: u32,
    _pad: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct CompositeParams {
    intensity: f32,
    _pad: [f32; 3],
}

struct BloomPipelines {
    device: wgpu::Device,
    threshold_pipeline: wgpu::ComputePipeline,
    threshold_layout: wgpu::BindGroupLayout,
    composite_pipeline: wgpu::RenderPipeline,
    composite_layout: wgpu::BindGroupLayout,
}

/// Threshold, blur, then additive composite of the bright regions.
pub struct BloomPass {
    /// Rec. 709 luminance below which pixels do not bloom.
    pub threshold: f32,
    /// Scale of the composited glow; `<= 0` disables the pass.
    pub intensity: f32,
    /// Gaussian sigma applied to the bright buffer.
    pub blur_sigma: f32,
    blur: BlurOwnership,
    state: PassState<BloomPipelines>,
}

impl BloomPass {
    pub fn new(threshold: f32, intensity: f32, blur_sigma: f32) -> Self {
        Self::with_blur(
            threshold,
            intensity,
            blur_sigma,
            BlurOwnership::Owned(BlurPass::new(blur_sigma)),
        )
    }

    pub fn with_blur(threshold: f32, intensity: f32, blur_sigma: f32, blur: BlurOwnership) -> Self {
        Self {
            threshold,
            intensity,
            blur_sigma,
            blur,
            state: PassState::Pending,
        }
    }

    pub fn blur_ownership(&self) -> &BlurOwnership {
        &self.blur
    }

    /// Adds a blurred copy of the bright parts of `target` back onto it.
    ///
    /// The scratch texture is acquired before anything touches `target`, so a
    /// failure leaves the target unmodified.
    pub fn encode_bloom(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        cache: &mut TextureCache,
        target: &wgpu::Texture,
        threshold: f32,
        intensity: f32,
        blur_sigma: f32,
    ) -> Result<(), PassError> {
        let pipelines = self.state.get()?;
        let blur = self.blur.pass();
        if !blur.is_ready() {
            return Err(PassError::NotReady);
        }
        check_scene_target(target)?;
        if intensity <= 0.0 {
            return Ok(());
        }

        cache
            .with_texture(scratch_key(target), |cache, bright| {
                pipelines.encode_threshold(encoder, target, bright, threshold);
                blur.encode_blur_in_place(encoder, cache, bright, blur_sigma)?;
                pipelines.encode_composite(encoder, bright, target, intensity);
                Ok(())
            })
            .unwrap_or(Err(PassError::TextureUnavailable))
    }
}

impl BloomPipelines {
    fn build(device: &wgpu::Device) -> Self {
        let threshold_module = shaders::compile(device, "bloom threshold", shaders::THRESHOLD_SHADER);
        let threshold_layout = filter_layout(device, "bloom threshold layout", false);
        let threshold_pipeline = compute_pipeline(
            device,
            "bloom threshold pipeline",
            &threshold_layout,
            &threshold_module,
            "cs_threshold",
        );

        let composite_module = shaders::compile(device, "bloom composite", shaders::COMPOSITE_SHADER);
        let composite_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("bloom composite layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("bloom composite pipeline layout"),
            bind_group_layouts: &[&composite_layout],
            push_constant_ranges: &[],
        });
        let composite_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("bloom composite pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &composite_module,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &composite_module,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: SCENE_FORMAT,
                    blend: Some(wgpu::BlendState {
                        color: wgpu::BlendComponent {
                            src_factor: wgpu::BlendFactor::One,
                            dst_factor: wgpu::BlendFactor::One,
                            operation: wgpu::BlendOperation::Add,
                        },
                        alpha: wgpu::BlendComponent {
                            src_factor: wgpu::BlendFactor::Zero,
                            dst_factor: wgpu::BlendFactor::One,
                            operation: wgpu::BlendOperation::Add,
                        },
                    }),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            multiview: None,
            cache: None,
        });

        Self {
            device: device.clone(),
            threshold_pipeline,
            threshold_layout,
            composite_pipeline,
            composite_layout,
        }
    }

    fn encode_threshold(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        source: &wgpu::Texture,
        bright: &wgpu::Texture,
        threshold: f32,
    ) {
        let (width, height) = (source.width(), source.height());
        let params = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("bloom threshold params"),
                contents: bytemuck::bytes_of(&ThresholdParams {
                    threshold,
                    width,
                    height,
                    _pad: 0,
                }),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let source_view = view(source);
        let bright_view = view(bright);
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("bloom threshold bind group"),
            layout: &self.threshold_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&source_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&bright_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: params.as_entire_binding(),
                },
            ],
        });
        dispatch_filter(
            encoder,
            "bloom threshold",
            &self.threshold_pipeline,
            &bind_group,
            width,
            height,
        );
    }

    fn encode_composite(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        bright: &wgpu::Texture,
        target: &wgpu::Texture,
        intensity: f32,
    ) {
        let params = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("bloom composite params"),
                contents: bytemuck::bytes_of(&CompositeParams {
                    intensity,
                    _pad: [0.0; 3],
                }),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let bright_view = view(bright);
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("bloom composite bind group"),
            layout: &self.composite_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&bright_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: params.as_entire_binding(),
                },
            ],
        });

        let target_view = view(target);
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("bloom composite"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &target_view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&self.composite_pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..3, 0..1);
    }
}

impl RenderPass for BloomPass {
    fn name(&self) -> &'static str {
        "bloom"
    }

    fn setup(&mut self, device: &wgpu::Device) -> Result<(), PassError> {
        self.state
            .build_once("bloom", device, BloomPipelines::build)?;
        match &mut self.blur {
            BlurOwnership::Owned(blur) => blur.setup(device),
            BlurOwnership::Shared(blur) if blur.is_ready() => Ok(()),
            BlurOwnership::Shared(_) => Err(PassError::NotReady),
        }
    }

    fn is_ready(&self) -> bool {
        self.state.is_ready() && self.blur.pass().is_ready()
    }

    fn encode(
        &mut self,
        ctx: &mut EffectContext<'_>,
        params: &EffectParams,
    ) -> Result<(), PassError> {
        self.encode_bloom(
            ctx.encoder,
            ctx.cache,
            ctx.target,
            params.get_or("threshold", self.threshold),
            params.get_or("intensity", self.intensity),
            params.get_or("blur_sigma", self.blur_sigma),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bloom_is_not_ready_before_setup() {
        let owned = BloomPass::new(0.8, 1.0, 3.0);
        assert!(!owned.is_ready());

        let shared = BloomPass::with_blur(
            0.8,
            1.0,
            3.0,
            BlurOwnership::Shared(Rc::new(BlurPass::new(3.0))),
        );
        assert!(!shared.is_ready());
        assert!(matches!(shared.blur_ownership(), BlurOwnership::Shared(_)));
    }

    #[test]
    fn uniform_layouts_are_sixteen_bytes() {
        assert_eq!(std::mem::size_of::<ThresholdParams>(), 16);
        assert_eq!(std::mem::size_of::<CompositeParams>(), 16);
    }
}
