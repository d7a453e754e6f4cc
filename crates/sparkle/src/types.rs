use glam::Vec2;

/// Format of the intermediate scene texture every frame renders into.
///
/// The compute passes bind it as a write-only storage texture, so the WGSL in
/// [`crate::shaders`] declares the same format.
pub const SCENE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Usage flags a texture needs to be a valid target for every built-in pass.
pub const SCENE_USAGE: wgpu::TextureUsages = wgpu::TextureUsages::RENDER_ATTACHMENT
    .union(wgpu::TextureUsages::TEXTURE_BINDING)
    .union(wgpu::TextureUsages::STORAGE_BINDING)
    .union(wgpu::TextureUsages::COPY_SRC)
    .union(wgpu::TextureUsages::COPY_DST);

/// How particle fragments combine with the existing target content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    /// Standard source-over compositing.
    #[default]
    Alpha,
    /// Color times coverage summed onto the target; destination alpha is kept.
    Additive,
}

/// Logical viewport size used to map particle positions to clip space.
///
/// Units are points, not pixels; origin is bottom-left with y pointing up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn size(&self) -> Vec2 {
        Vec2::new(self.width.max(1.0), self.height.max(1.0))
    }
}

/// Axis-aligned rectangle in target pixels, origin bottom-left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Converts to `[left, bottom, right, top]` in normalized device coordinates.
    pub fn to_ndc(&self, target_width: u32, target_height: u32) -> [f32; 4] {
        let w = target_width.max(1) as f32;
        let h = target_height.max(1) as f32;
        [
            self.x / w * 2.0 - 1.0,
            self.y / h * 2.0 - 1.0,
            (self.x + self.width) / w * 2.0 - 1.0,
            (self.y + self.height) / h * 2.0 - 1.0,
        ]
    }
}

/// Tunables applied by the renderer's convenience entry points.
#[derive(Debug, Clone, PartialEq)]
pub struct RendererSettings {
    /// Color the scene is cleared to at the start of every frame.
    pub clear_color: wgpu::Color,
    /// Luminance below which bloom discards pixels (0-1).
    pub bloom_threshold: f32,
    /// Gaussian sigma of the bloom blur.
    pub bloom_blur_sigma: f32,
    /// Bloom intensity used by [`crate::Renderer::render_particle_frame`]; 0 disables it.
    pub bloom_intensity: f32,
    /// Blur sigma applied after particles in `render_particle_frame`; 0 disables it.
    pub particle_blur_radius: f32,
    /// Idle textures kept in the cache after each frame.
    pub texture_cache_limit: usize,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            clear_color: wgpu::Color::BLACK,
            bloom_threshold: 0.8,
            bloom_blur_sigma: 3.0,
            bloom_intensity: 0.0,
            particle_blur_radius: 0.0,
            texture_cache_limit: 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_target_rect_maps_to_clip_space_corners() {
        let ndc = Rect::new(0.0, 0.0, 200.0, 100.0).to_ndc(200, 100);
        assert_eq!(ndc, [-1.0, -1.0, 1.0, 1.0]);
    }

    #[test]
    fn scene_usage_supports_compute_and_copies() {
        assert!(SCENE_USAGE.contains(wgpu::TextureUsages::STORAGE_BINDING));
        assert!(SCENE_USAGE.contains(wgpu::TextureUsages::COPY_DST));
        assert!(SCENE_USAGE.contains(wgpu::TextureUsages::RENDER_ATTACHMENT));
    }
}
