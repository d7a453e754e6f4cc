use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};
use tracing::debug;
use wgpu::util::DeviceExt;

use crate::gpu::with_validation;
use crate::shaders;
use crate::types::Rect;

use super::{
    check_filterable_source, check_render_target, view, PassError, PassState, RenderPass,
};

/// How blitted texels combine with the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlitMode {
    /// Overwrite the destination (used to present the scene).
    Replace,
    /// Source-over alpha blending.
    Blend,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct BlitRect {
    bounds: [f32; 4],
}

struct BlitResources {
    device: wgpu::Device,
    module: wgpu::ShaderModule,
    layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    sampler: wgpu::Sampler,
}

/// Draws a sampled texture into a rectangle of another texture.
///
/// Render pipelines are built on demand per destination format and
/// [`BlitMode`], then kept for the life of the pass.
pub struct BlitPass {
    state: PassState<BlitResources>,
    pipelines: HashMap<(wgpu::TextureFormat, BlitMode), wgpu::RenderPipeline>,
}

impl Default for BlitPass {
    fn default() -> Self {
        Self::new()
    }
}

impl BlitPass {
    pub fn new() -> Self {
        Self {
            state: PassState::Pending,
            pipelines: HashMap::new(),
        }
    }

    /// Draws `source` into `rect` of `destination` (pixels, origin
    /// bottom-left). `clear` clears the destination first.
    ///
    /// Both textures are validated before anything is encoded, so a rejected
    /// blit leaves the encoder untouched.
    pub fn encode_blit(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        source: &wgpu::Texture,
        destination: &wgpu::Texture,
        rect: Rect,
        mode: BlitMode,
        clear: Option<wgpu::Color>,
    ) -> Result<(), PassError> {
        check_filterable_source(source)?;
        check_render_target(destination)?;
        if source == destination {
            return Err(PassError::IncompatibleTarget(
                "blit source and destination must differ",
            ));
        }
        let format = destination.format();
        let pipeline = self.pipeline(format, mode)?;
        let resources = self.state.get()?;

        let bounds = rect.to_ndc(destination.width(), destination.height());
        let uniform = resources
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("blit rect"),
                contents: bytemuck::bytes_of(&BlitRect { bounds }),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let source_view = view(source);
        let bind_group = resources
            .device
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("blit bind group"),
                layout: &resources.layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&source_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&resources.sampler),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: uniform.as_entire_binding(),
                    },
                ],
            });

        let destination_view = view(destination);
        let load = clear.map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear);
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("blit"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &destination_view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..6, 0..1);
        Ok(())
    }

    fn pipeline(
        &mut self,
        format: wgpu::TextureFormat,
        mode: BlitMode,
    ) -> Result<wgpu::RenderPipeline, PassError> {
        if let Some(pipeline) = self.pipelines.get(&(format, mode)) {
            return Ok(pipeline.clone());
        }
        let resources = self.state.get()?;
        let pipeline = with_validation(&resources.device, || resources.build_pipeline(format, mode))
            .map_err(|error| PassError::Setup(error.to_string()))?;
        debug!(?format, ?mode, "built blit pipeline");
        self.pipelines.insert((format, mode), pipeline.clone());
        Ok(pipeline)
    }
}

impl BlitResources {
    fn build(device: &wgpu::Device) -> Self {
        let module = shaders::compile(device, "blit shader", shaders::BLIT_SHADER);
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("blit layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::VERTEX,
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
            label: Some("blit pipeline layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("blit sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        Self {
            device: device.clone(),
            module,
            layout,
            pipeline_layout,
            sampler,
        }
    }

    fn build_pipeline(&self, format: wgpu::TextureFormat, mode: BlitMode) -> wgpu::RenderPipeline {
        let blend = match mode {
            BlitMode::Replace => None,
            BlitMode::Blend => Some(wgpu::BlendState::ALPHA_BLENDING),
        };
        self.device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("blit pipeline"),
                layout: Some(&self.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &self.module,
                    entry_point: Some("vs_main"),
                    buffers: &[],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &self.module,
                    entry_point: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                multiview: None,
                cache: None,
            })
    }
}

impl RenderPass for BlitPass {
    fn name(&self) -> &'static str {
        "blit"
    }

    fn setup(&mut self, device: &wgpu::Device) -> Result<(), PassError> {
        self.state.build_once("blit", device, BlitResources::build)
    }

    fn is_ready(&self) -> bool {
        self.state.is_ready()
    }
}
