//! Device bootstrap and presentation plumbing.
//!
//! - `context` creates the wgpu instance/adapter/device, either headless or
//!   bound to a window surface.
//! - `target` abstracts where finished frames go: a window surface that may
//!   refuse to hand out a drawable, or an offscreen texture.
//! - `readback` copies a texture back to host memory for tests and exports.

mod context;
mod readback;
mod target;

pub use context::GpuContext;
pub use readback::read_rgba8;
pub use target::{Drawable, OffscreenTarget, PresentTarget, SurfaceTarget};

/// Runs `build` inside a validation error scope and turns any captured
/// validation error into `Err`.
pub(crate) fn with_validation<T>(
    device: &wgpu::Device,
    build: impl FnOnce() -> T,
) -> Result<T, wgpu::Error> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = build();
    match pollster::block_on(device.pop_error_scope()) {
        Some(error) => Err(error),
        None => Ok(value),
    }
}
