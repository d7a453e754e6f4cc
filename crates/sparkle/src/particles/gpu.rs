use std::sync::mpsc;

use bytemuck::{Pod, Zeroable};
use glam::Vec2;
use thiserror::Error;
use tracing::debug;

use crate::gpu::with_validation;
use crate::shaders;

use super::Particle;

const WORKGROUP_SIZE: u32 = 64;

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("device does not support compute shaders")]
    ComputeUnsupported,
    #[error("failed to build simulation pipeline: {0}")]
    Pipeline(String),
    #[error("{count} particles exceed the device storage buffer limit")]
    TooManyParticles { count: usize },
    #[error("simulation dispatch rejected by the device: {0}")]
    Dispatch(String),
    #[error("failed to read simulated particles back: {0}")]
    Readback(String),
}

/// GPU-side particle layout; must match `Particle` in the simulation shader.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
struct GpuParticle {
    position: [f32; 2],
    velocity: [f32; 2],
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
}

impl From<&Particle> for GpuParticle {
    fn from(particle: &Particle) -> Self {
        Self {
            position: particle.position.to_array(),
            velocity: particle.velocity.to_array(),
            life: particle.life,
            max_life: particle.max_life,
            size: particle.size,
            base_size: particle.base_size,
            size_velocity: particle.size_velocity,
            rotation: particle.rotation,
            rotation_velocity: particle.rotation_velocity,
            damping: particle.damping,
            size_start: particle.size_over_life.0,
            size_end: particle.size_over_life.1,
            flags: particle.behavior.bits(),
            _pad: 0,
        }
    }
}

impl GpuParticle {
    fn write_back(&self, particle: &mut Particle) {
        particle.position = Vec2::from_array(self.position);
        particle.velocity = Vec2::from_array(self.velocity);
        particle.life = self.life;
        particle.size = self.size;
        particle.base_size = self.base_size;
        particle.rotation = self.rotation;
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct SimParams {
    gravity: [f32; 2],
    dt: f32,
    global_damping: f32,
    count: u32,
    _pad: [u32; 3],
}

struct ParticleBuffers {
    capacity: usize,
    storage: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

type MapReceiver = mpsc::Receiver<Result<(), wgpu::BufferAsyncError>>;

/// A staging buffer whose `map_async` has not reported back yet.
struct Mapping {
    buffer: wgpu::Buffer,
    ready: MapReceiver,
}

/// A submitted step whose results have not been applied.
struct InFlight {
    count: usize,
    dt: f32,
    gravity: Vec2,
    global_damping: f32,
    bytes: u64,
    mapping: Mapping,
}

/// What [`GpuSimulator::collect`] did with the in-flight step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Nothing was in flight.
    Idle,
    /// GPU results were written back.
    Applied,
    /// The readback was not ready; the step was finished on the CPU.
    CompletedOnCpu,
    /// The collection shrank below the submitted count, so the step was dropped.
    Discarded,
}

/// Runs the built-in particle physics in a compute shader.
///
/// Steps are pipelined: [`submit`](Self::submit) queues a step and returns
/// without waiting, and the next [`collect`](Self::collect) writes its results
/// back. A readback that has not landed by then is finished on the CPU with
/// the same integration, so the frame thread never waits on the device.
pub struct GpuSimulator {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
    params: wgpu::Buffer,
    buffers: Option<ParticleBuffers>,
    in_flight: Option<InFlight>,
    idle_staging: Vec<wgpu::Buffer>,
    retiring: Vec<Mapping>,
    max_binding_size: u64,
    max_workgroups: u32,
}

impl GpuSimulator {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Result<Self, SimulationError> {
        let limits = device.limits();
        if limits.max_compute_workgroups_per_dimension == 0
            || limits.max_storage_buffers_per_shader_stage == 0
        {
            return Err(SimulationError::ComputeUnsupported);
        }

        let (pipeline, layout) = with_validation(device, || {
            let module = shaders::compile(device, "particle simulation", shaders::SIMULATION_SHADER);
            let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("particle simulation layout"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Storage { read_only: false },
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::COMPUTE,
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
                label: Some("particle simulation pipeline layout"),
                bind_group_layouts: &[&layout],
                push_constant_ranges: &[],
            });
            let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("particle simulation pipeline"),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: Some("cs_simulate"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });
            (pipeline, layout)
        })
        .map_err(|error| SimulationError::Pipeline(error.to_string()))?;

        let params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("particle simulation params"),
            size: std::mem::size_of::<SimParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        debug!("GPU particle simulator ready");
        Ok(Self {
            device: device.clone(),
            queue: queue.clone(),
            pipeline,
            layout,
            params,
            buffers: None,
            in_flight: None,
            idle_staging: Vec::new(),
            retiring: Vec::new(),
            max_binding_size: u64::from(limits.max_storage_buffer_binding_size),
            max_workgroups: limits.max_compute_workgroups_per_dimension,
        })
    }

    pub fn has_pending_step(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Uploads `particles` and queues one step of `dt` seconds. Does not wait
    /// for the device; call [`collect`](Self::collect) on a later frame.
    ///
    /// Any step still in flight is discarded first, so callers collect before
    /// submitting again.
    pub fn submit(
        &mut self,
        particles: &[Particle],
        dt: f32,
        gravity: Vec2,
        global_damping: f32,
    ) -> Result<(), SimulationError> {
        self.discard();
        if particles.is_empty() {
            return Ok(());
        }

        let count = particles.len();
        let bytes = (count * std::mem::size_of::<GpuParticle>()) as u64;
        let workgroups = (count as u32).div_ceil(WORKGROUP_SIZE);
        if bytes > self.max_binding_size || workgroups > self.max_workgroups {
            return Err(SimulationError::TooManyParticles { count });
        }

        self.ensure_capacity(count);
        let staging = self.staging_buffer(bytes);
        let Some(buffers) = self.buffers.as_ref() else {
            return Err(SimulationError::Dispatch("particle buffers missing".into()));
        };

        let packed: Vec<GpuParticle> = particles.iter().map(GpuParticle::from).collect();
        let params = SimParams {
            gravity: gravity.to_array(),
            dt,
            global_damping,
            count: count as u32,
            _pad: [0; 3],
        };
        self.queue
            .write_buffer(&buffers.storage, 0, bytemuck::cast_slice(&packed));
        self.queue
            .write_buffer(&self.params, 0, bytemuck::bytes_of(&params));

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("particle simulation encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("particle simulation pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &buffers.bind_group, &[]);
            pass.dispatch_workgroups(workgroups, 1, 1);
        }
        encoder.copy_buffer_to_buffer(&buffers.storage, 0, &staging, 0, bytes);
        self.queue.submit(std::iter::once(encoder.finish()));

        let (tx, rx) = mpsc::channel();
        staging
            .slice(..bytes)
            .map_async(wgpu::MapMode::Read, move |result| {
                let _ = tx.send(result);
            });
        self.in_flight = Some(InFlight {
            count,
            dt,
            gravity,
            global_damping,
            bytes,
            mapping: Mapping {
                buffer: staging,
                ready: rx,
            },
        });
        Ok(())
    }

    /// Writes the in-flight step back into `particles`, which must still start
    /// with the particles that were submitted (later spawns may follow them).
    ///
    /// With `wait == false` the device is only polled; a step whose readback
    /// has not landed is integrated on the CPU instead. `wait == true` blocks
    /// until the readback arrives.
    pub fn collect(
        &mut self,
        particles: &mut [Particle],
        wait: bool,
    ) -> Result<StepOutcome, SimulationError> {
        let poll = if wait {
            wgpu::PollType::Wait
        } else {
            wgpu::PollType::Poll
        };
        self.device
            .poll(poll)
            .map_err(|error| SimulationError::Readback(error.to_string()))?;
        self.recycle_retired();

        let Some(step) = self.in_flight.take() else {
            return Ok(StepOutcome::Idle);
        };
        let Some(submitted) = particles.get_mut(..step.count) else {
            self.retiring.push(step.mapping);
            return Ok(StepOutcome::Discarded);
        };

        match step.mapping.ready.try_recv() {
            Ok(Ok(())) => {
                let buffer = step.mapping.buffer;
                {
                    let mapped = buffer.slice(..step.bytes).get_mapped_range();
                    let simulated: &[GpuParticle] = bytemuck::cast_slice(&mapped[..]);
                    for (particle, result) in submitted.iter_mut().zip(simulated) {
                        result.write_back(particle);
                    }
                }
                buffer.unmap();
                self.idle_staging.push(buffer);
                Ok(StepOutcome::Applied)
            }
            Ok(Err(error)) => Err(SimulationError::Readback(error.to_string())),
            Err(mpsc::TryRecvError::Empty) => {
                debug!(count = step.count, "GPU step not ready; finishing it on the CPU");
                for particle in submitted.iter_mut().filter(|p| p.is_alive()) {
                    particle.integrate(step.dt, step.gravity, step.global_damping);
                }
                self.retiring.push(step.mapping);
                Ok(StepOutcome::CompletedOnCpu)
            }
            Err(mpsc::TryRecvError::Disconnected) => Err(SimulationError::Readback(
                "readback callback dropped".into(),
            )),
        }
    }

    /// Drops the in-flight step without applying it.
    pub fn discard(&mut self) {
        if let Some(step) = self.in_flight.take() {
            self.retiring.push(step.mapping);
        }
    }

    /// Returns staging buffers whose mapping has since completed to the idle
    /// pool.
    fn recycle_retired(&mut self) {
        let mut pending = Vec::with_capacity(self.retiring.len());
        for mapping in self.retiring.drain(..) {
            match mapping.ready.try_recv() {
                Ok(Ok(())) => {
                    mapping.buffer.unmap();
                    self.idle_staging.push(mapping.buffer);
                }
                Err(mpsc::TryRecvError::Empty) => pending.push(mapping),
                Ok(Err(_)) | Err(mpsc::TryRecvError::Disconnected) => {}
            }
        }
        self.retiring = pending;
    }

    fn staging_buffer(&mut self, bytes: u64) -> wgpu::Buffer {
        if let Some(index) = self
            .idle_staging
            .iter()
            .position(|buffer| buffer.size() >= bytes)
        {
            return self.idle_staging.swap_remove(index);
        }
        let capacity = self
            .buffers
            .as_ref()
            .map_or(bytes, |buffers| {
                (buffers.capacity * std::mem::size_of::<GpuParticle>()) as u64
            })
            .max(bytes);
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("particle readback"),
            size: capacity,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    fn ensure_capacity(&mut self, count: usize) {
        if self
            .buffers
            .as_ref()
            .is_some_and(|buffers| buffers.capacity >= count)
        {
            return;
        }

        let capacity = count.next_power_of_two().max(WORKGROUP_SIZE as usize);
        let size = ((capacity * std::mem::size_of::<GpuParticle>()) as u64).min(self.max_binding_size);
        let storage = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("particle storage"),
            size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("particle simulation bind group"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: storage.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: self.params.as_entire_binding(),
                },
            ],
        });

        debug!(capacity, "resized GPU particle buffers");
        self.buffers = Some(ParticleBuffers {
            capacity: (size as usize) / std::mem::size_of::<GpuParticle>(),
            storage,
            bind_group,
        });
    }
}
