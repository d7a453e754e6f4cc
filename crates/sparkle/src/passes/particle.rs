use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::particles::{Particle, ParticleSprite};
use crate::shaders;
use crate::types::{BlendMode, Viewport};

use super::{check_render_target, view, PassError, PassState, RenderPass};

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ViewportUniform {
    size: [f32; 2],
    _pad: [f32; 2],
}

const SPRITE_ATTRIBUTES: [wgpu::VertexAttribute; 4] = wgpu::vertex_attr_array![
    0 => Float32x2,
    1 => Float32,
    2 => Float32,
    3 => Float32x4
];

/// Additive blending: color is `src * src_alpha + dst`, destination alpha is kept.
const ADDITIVE_BLENDING: wgpu::BlendState = wgpu::BlendState {
    color: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::SrcAlpha,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    },
    alpha: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::Zero,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    },
};

struct ParticlePipelines {
    device: wgpu::Device,
    layout: wgpu::BindGroupLayout,
    alpha: wgpu::RenderPipeline,
    additive: wgpu::RenderPipeline,
}

/// Draws particles as instanced, rotated quads with a soft round mask.
pub struct ParticlePass {
    format: wgpu::TextureFormat,
    state: PassState<ParticlePipelines>,
}

impl ParticlePass {
    /// Pass drawing into targets of `format`.
    pub fn new(format: wgpu::TextureFormat) -> Self {
        Self {
            format,
            state: PassState::Pending,
        }
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    /// Draws every alive particle in collection order.
    pub fn encode_particles(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        particles: &[Particle],
        blend_mode: BlendMode,
        viewport: Viewport,
        target: &wgpu::Texture,
        load: wgpu::LoadOp<wgpu::Color>,
    ) -> Result<(), PassError> {
        let sprites: Vec<ParticleSprite> = particles
            .iter()
            .filter(|particle| particle.is_alive())
            .map(Particle::sprite)
            .collect();
        self.encode_sprites(encoder, &sprites, blend_mode, viewport, target, load)
    }

    /// Draws prepared instances, e.g. the output of
    /// [`crate::ParticleSystem::sprites`].
    pub fn encode_sprites(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        sprites: &[ParticleSprite],
        blend_mode: BlendMode,
        viewport: Viewport,
        target: &wgpu::Texture,
        load: wgpu::LoadOp<wgpu::Color>,
    ) -> Result<(), PassError> {
        let pipelines = self.state.get()?;
        if target.format() != self.format {
            return Err(PassError::IncompatibleTarget(
                "particle target format differs from the pass format",
            ));
        }
        check_render_target(target)?;
        if sprites.is_empty() && matches!(load, wgpu::LoadOp::Load) {
            return Ok(());
        }

        let target_view = view(target);
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("particles"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &target_view,
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
        if sprites.is_empty() {
            return Ok(());
        }

        let size = viewport.size();
        let uniform = pipelines
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("particle viewport"),
                contents: bytemuck::bytes_of(&ViewportUniform {
                    size: size.to_array(),
                    _pad: [0.0; 2],
                }),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let instances = pipelines
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("particle instances"),
                contents: bytemuck::cast_slice(sprites),
                usage: wgpu::BufferUsages::VERTEX,
            });
        let bind_group = pipelines
            .device
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("particle bind group"),
                layout: &pipelines.layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform.as_entire_binding(),
                }],
            });

        let pipeline = match blend_mode {
            BlendMode::Alpha => &pipelines.alpha,
            BlendMode::Additive => &pipelines.additive,
        };
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.set_vertex_buffer(0, instances.slice(..));
        pass.draw(0..6, 0..sprites.len() as u32);
        Ok(())
    }
}

impl ParticlePipelines {
    fn build(device: &wgpu::Device, format: wgpu::TextureFormat) -> Self {
        let module = shaders::compile(device, "particle shader", shaders::PARTICLE_SHADER);
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("particle layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("particle pipeline layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let build = |label: &str, blend: wgpu::BlendState| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: Some("vs_main"),
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: std::mem::size_of::<ParticleSprite>() as u64,
                        step_mode: wgpu::VertexStepMode::Instance,
                        attributes: &SPRITE_ATTRIBUTES,
                    }],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: Some(blend),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                multiview: None,
                cache: None,
            })
        };

        Self {
            device: device.clone(),
            alpha: build("particle pipeline (alpha)", wgpu::BlendState::ALPHA_BLENDING),
            additive: build("particle pipeline (additive)", ADDITIVE_BLENDING),
            layout,
        }
    }
}

impl RenderPass for ParticlePass {
    fn name(&self) -> &'static str {
        "particles"
    }

    fn setup(&mut self, device: &wgpu::Device) -> Result<(), PassError> {
        let format = self.format;
        self.state.build_once("particles", device, |device| {
            ParticlePipelines::build(device, format)
        })
    }

    fn is_ready(&self) -> bool {
        self.state.is_ready()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sprite_attributes_cover_instance_stride() {
        let last = SPRITE_ATTRIBUTES[3];
        assert_eq!(last.offset + last.format.size(), 32);
        assert_eq!(std::mem::size_of::<ParticleSprite>(), 32);
    }

    #[test]
    fn additive_blend_keeps_destination_alpha() {
        assert_eq!(ADDITIVE_BLENDING.alpha.src_factor, wgpu::BlendFactor::Zero);
        assert_eq!(ADDITIVE_BLENDING.alpha.dst_factor, wgpu::BlendFactor::One);
        assert_eq!(ADDITIVE_BLENDING.color.dst_factor, wgpu::BlendFactor::One);
    }
}
