//! Frame counters and status text for on-screen or logged health reports.
//!
//! Nothing here draws; hosts render [`RenderDiagnostics::overlay_text`]
//! however they like (the `sparkled` preview logs it).

use std::time::{Duration, Instant};

const DEFAULT_DEVICE_STATUS: &str = "device: unknown";
const DEFAULT_TARGET_STATUS: &str = "target: none";
const DEFAULT_RENDERER_STATUS: &str = "renderer: idle";
const DEFAULT_DRAWABLE_STATUS: &str = "drawable: none";

/// Per-attempt success counters plus free-form status strings.
#[derive(Debug, Clone)]
pub struct RenderDiagnostics {
    pub overlay_enabled: bool,
    device_status: Option<String>,
    target_status: Option<String>,
    renderer_status: Option<String>,
    drawable_status: Option<String>,
    success_count: u64,
    failure_count: u64,
    last_attempt_succeeded: bool,
}

impl Default for RenderDiagnostics {
    fn default() -> Self {
        Self {
            overlay_enabled: true,
            device_status: None,
            target_status: None,
            renderer_status: None,
            drawable_status: None,
            success_count: 0,
            failure_count: 0,
            last_attempt_succeeded: false,
        }
    }
}

impl RenderDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call once per attempted frame.
    pub fn record_attempt(&mut self, success: bool) {
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        self.last_attempt_succeeded = success;
    }

    pub fn success_count(&self) -> u64 {
        self.success_count
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count
    }

    pub fn last_attempt_succeeded(&self) -> bool {
        self.last_attempt_succeeded
    }

    pub fn set_device_status(&mut self, status: impl Into<String>) {
        self.device_status = Some(status.into());
    }

    pub fn set_target_status(&mut self, status: impl Into<String>) {
        self.target_status = Some(status.into());
    }

    pub fn set_renderer_status(&mut self, status: impl Into<String>) {
        self.renderer_status = Some(status.into());
    }

    pub fn set_drawable_status(&mut self, status: impl Into<String>) {
        self.drawable_status = Some(status.into());
    }

    /// Clears counters and status strings back to their defaults.
    pub fn reset(&mut self) {
        let overlay_enabled = self.overlay_enabled;
        *self = Self {
            overlay_enabled,
            ..Self::default()
        };
    }

    /// Status lines without the FPS line.
    pub fn status_lines(&self) -> Vec<String> {
        vec![
            self.device_status
                .clone()
                .unwrap_or_else(|| DEFAULT_DEVICE_STATUS.to_string()),
            self.target_status
                .clone()
                .unwrap_or_else(|| DEFAULT_TARGET_STATUS.to_string()),
            self.renderer_status
                .clone()
                .unwrap_or_else(|| DEFAULT_RENDERER_STATUS.to_string()),
            self.drawable_status
                .clone()
                .unwrap_or_else(|| DEFAULT_DRAWABLE_STATUS.to_string()),
            format!(
                "frames: {} ok / {} failed (last {})",
                self.success_count,
                self.failure_count,
                if self.last_attempt_succeeded { "ok" } else { "failed" }
            ),
        ]
    }

    /// Title, status lines, caller lines, then FPS. Empty when the overlay is
    /// disabled.
    pub fn overlay_text(&self, title: &str, extra_lines: &[String], fps: f32) -> String {
        if !self.overlay_enabled {
            return String::new();
        }
        let mut lines = Vec::with_capacity(extra_lines.len() + 7);
        lines.push(title.to_string());
        lines.extend(self.status_lines());
        lines.extend(extra_lines.iter().cloned());
        lines.push(format!("fps: {fps:.1}"));
        lines.join("\n")
    }
}

/// Frames-per-second estimate refreshed once per `interval`.
#[derive(Debug, Clone)]
pub struct FrameRateMeter {
    interval: Duration,
    frames_since_update: u32,
    last_update: Instant,
    frames_per_second: f32,
}

impl Default for FrameRateMeter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl FrameRateMeter {
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(interval, Instant::now())
    }

    pub fn starting_at(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            frames_since_update: 0,
            last_update: now,
            frames_per_second: 0.0,
        }
    }

    /// Counts a frame at `now`. Returns the new estimate when it was refreshed.
    pub fn tick(&mut self, now: Instant) -> Option<f32> {
        self.frames_since_update += 1;
        let elapsed = now.saturating_duration_since(self.last_update);
        if elapsed < self.interval {
            return None;
        }
        self.frames_per_second = self.frames_since_update as f32 / elapsed.as_secs_f32();
        self.frames_since_update = 0;
        self.last_update = now;
        Some(self.frames_per_second)
    }

    pub fn frames_per_second(&self) -> f32 {
        self.frames_per_second
    }
}
