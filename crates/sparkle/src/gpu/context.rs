use anyhow::{anyhow, Context as AnyhowContext, Result};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, warn};

use super::target::SurfaceTarget;

/// Owns the wgpu instance, device, and queue shared by a renderer.
pub struct GpuContext {
    pub instance: wgpu::Instance,
    pub adapter_info: wgpu::AdapterInfo,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Creates a device with no surface. Tries a hardware adapter first and
    /// falls back to a software rasterizer.
    pub fn headless() -> Result<Self> {
        let instance = new_instance();
        let adapter = match request_adapter(&instance, None, false) {
            Ok(adapter) => adapter,
            Err(err) => {
                warn!(error = %err, "hardware adapter unavailable; trying software fallback");
                request_adapter(&instance, None, true)
                    .context("failed to find any GPU adapter")?
            }
        };
        Self::from_adapter(instance, adapter)
    }

    /// Creates a device able to present to `window` and the matching surface
    /// target sized `width`x`height` in physical pixels.
    pub fn for_window<T>(window: T, width: u32, height: u32) -> Result<(Self, SurfaceTarget)>
    where
        T: HasDisplayHandle + HasWindowHandle + Send + Sync + 'static,
    {
        let instance = new_instance();
        let surface = instance
            .create_surface(window)
            .context("failed to create rendering surface")?;
        let adapter = request_adapter(&instance, Some(&surface), false)
            .context("failed to find a GPU adapter compatible with the window")?;

        let max_dimension = adapter.limits().max_texture_dimension_2d;
        if width > max_dimension || height > max_dimension {
            anyhow::bail!(
                "GPU max texture dimension is {max_dimension}, requested surface is {width}x{height}"
            );
        }

        let capabilities = surface.get_capabilities(&adapter);
        let context = Self::from_adapter(instance, adapter)?;
        let target = SurfaceTarget::new(&context.device, surface, &capabilities, width, height)
            .ok_or_else(|| anyhow!("surface reports no supported formats"))?;
        Ok((context, target))
    }

    fn from_adapter(instance: wgpu::Instance, adapter: wgpu::Adapter) -> Result<Self> {
        let adapter_info = adapter.get_info();
        debug!(
            name = %adapter_info.name,
            backend = ?adapter_info.backend,
            device_type = ?adapter_info.device_type,
            "selected GPU adapter"
        );

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("sparkle device"),
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        }))
        .context("failed to create GPU device")?;

        device.on_uncaptured_error(Box::new(|error| {
            warn!(%error, "uncaptured wgpu error");
        }));

        Ok(Self {
            instance,
            adapter_info,
            device,
            queue,
        })
    }

    /// Short adapter description for diagnostics.
    pub fn describe(&self) -> String {
        format!("{} ({:?})", self.adapter_info.name, self.adapter_info.backend)
    }

    pub fn is_software(&self) -> bool {
        matches!(self.adapter_info.device_type, wgpu::DeviceType::Cpu)
    }
}

fn new_instance() -> wgpu::Instance {
    wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        flags: wgpu::InstanceFlags::default(),
        memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
        backend_options: wgpu::BackendOptions::default(),
    })
}

fn request_adapter(
    instance: &wgpu::Instance,
    surface: Option<&wgpu::Surface<'_>>,
    force_fallback_adapter: bool,
) -> Result<wgpu::Adapter, wgpu::RequestAdapterError> {
    pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: surface,
        force_fallback_adapter,
    }))
}
