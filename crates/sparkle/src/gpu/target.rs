use tracing::{debug, warn};

use crate::types::SCENE_FORMAT;

/// Destination for finished frames.
///
/// `acquire` returning `None` is a normal condition (minimized window,
/// surface being reconfigured) and callers skip the frame.
pub trait PresentTarget {
    fn format(&self) -> wgpu::TextureFormat;

    fn size(&self) -> (u32, u32);

    fn acquire(&mut self) -> Option<Drawable>;

    fn resize(&mut self, width: u32, height: u32);

    /// Human readable status for diagnostics.
    fn describe(&self) -> String;
}

/// The image a frame is presented into.
pub struct Drawable {
    texture: wgpu::Texture,
    frame: Option<wgpu::SurfaceTexture>,
}

impl Drawable {
    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn size(&self) -> (u32, u32) {
        (self.texture.width(), self.texture.height())
    }

    /// Queues the drawable for display. Offscreen drawables are simply dropped.
    pub fn present(self) {
        if let Some(frame) = self.frame {
            frame.present();
        }
    }
}

pub struct SurfaceTarget {
    device: wgpu::Device,
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
}

impl SurfaceTarget {
    pub(crate) fn new(
        device: &wgpu::Device,
        surface: wgpu::Surface<'static>,
        capabilities: &wgpu::SurfaceCapabilities,
        width: u32,
        height: u32,
    ) -> Option<Self> {
        let format = capabilities
            .formats
            .iter()
            .copied()
            .find(|format| !format.is_srgb())
            .or_else(|| capabilities.formats.first().copied())?;
        let present_mode = if capabilities
            .present_modes
            .contains(&wgpu::PresentMode::Fifo)
        {
            wgpu::PresentMode::Fifo
        } else {
            capabilities.present_modes.first().copied()?
        };
        let alpha_mode = capabilities.alpha_modes.first().copied()?;

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: width.max(1),
            height: height.max(1),
            present_mode,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(device, &config);
        debug!(?format, ?present_mode, width, height, "configured window surface");

        Some(Self {
            device: device.clone(),
            surface,
            config,
        })
    }

    fn reconfigure(&self) {
        self.surface.configure(&self.device, &self.config);
    }
}

impl PresentTarget for SurfaceTarget {
    fn format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    fn size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    fn acquire(&mut self) -> Option<Drawable> {
        match self.surface.get_current_texture() {
            Ok(frame) => {
                if frame.suboptimal {
                    debug!("surface frame is suboptimal; reconfiguring after this frame");
                }
                let drawable = Drawable {
                    texture: frame.texture.clone(),
                    frame: Some(frame),
                };
                Some(drawable)
            }
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                debug!("surface lost or outdated; reconfiguring");
                self.reconfigure();
                None
            }
            Err(wgpu::SurfaceError::Timeout) => {
                debug!("timed out waiting for a drawable");
                None
            }
            Err(error) => {
                warn!(%error, "failed to acquire a drawable");
                None
            }
        }
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.config.width = width;
        self.config.height = height;
        self.reconfigure();
    }

    fn describe(&self) -> String {
        format!(
            "surface {}x{} {:?}",
            self.config.width, self.config.height, self.config.format
        )
    }
}

/// Renders into a plain texture; used headless and in tests.
pub struct OffscreenTarget {
    device: wgpu::Device,
    texture: wgpu::Texture,
    available: bool,
}

impl OffscreenTarget {
    pub fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        Self {
            device: device.clone(),
            texture: create_offscreen_texture(device, width, height),
            available: true,
        }
    }

    /// Simulates a surface that currently has no drawable to hand out.
    pub fn set_available(&mut self, available: bool) {
        self.available = available;
    }

    /// Handle to the backing texture; stays valid until the next resize.
    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }
}

impl PresentTarget for OffscreenTarget {
    fn format(&self) -> wgpu::TextureFormat {
        self.texture.format()
    }

    fn size(&self) -> (u32, u32) {
        (self.texture.width(), self.texture.height())
    }

    fn acquire(&mut self) -> Option<Drawable> {
        self.available.then(|| Drawable {
            texture: self.texture.clone(),
            frame: None,
        })
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 || (width, height) == self.size() {
            return;
        }
        self.texture = create_offscreen_texture(&self.device, width, height);
    }

    fn describe(&self) -> String {
        let (width, height) = self.size();
        let state = if self.available { "" } else { " (unavailable)" };
        format!("offscreen {width}x{height}{state}")
    }
}

fn create_offscreen_texture(device: &wgpu::Device, width: u32, height: u32) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some("offscreen target"),
        size: wgpu::Extent3d {
            width: width.max(1),
            height: height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: SCENE_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    })
}
