//! Maps a parsed [`SceneConfig`] onto sparkle types and loads it from disk.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glam::Vec2;
use sceneconfig::{BlendSetting, SceneConfig, SimulationSetting};
use sparkle::{BlendMode, EffectParams, RendererSettings, SimulationMode};
use tracing::info;

use crate::cli::SimulationArg;
use crate::paths::AppPaths;

/// A scene plus the file it came from (`None` for built-in defaults).
#[derive(Debug, Clone)]
pub struct LoadedScene {
    pub config: SceneConfig,
    pub source: Option<PathBuf>,
}

/// Loads `explicit`, or the discovered default scene file when present.
/// An explicit path must exist; a missing default file means built-in
/// defaults.
pub fn load(explicit: Option<&Path>) -> Result<LoadedScene> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let paths = AppPaths::discover()?;
            let candidate = paths.scene_file();
            if !candidate.exists() {
                info!(
                    config_dir = %paths.config_dir().display(),
                    "no scene file found; using built-in defaults"
                );
                return Ok(LoadedScene {
                    config: SceneConfig::default(),
                    source: None,
                });
            }
            candidate
        }
    };

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read scene file {}", path.display()))?;
    let config = SceneConfig::from_toml_str(&raw)
        .with_context(|| format!("failed to load scene file {}", path.display()))?;
    info!(path = %path.display(), "loaded scene configuration");
    Ok(LoadedScene {
        config,
        source: Some(path),
    })
}

pub fn renderer_settings(config: &SceneConfig) -> RendererSettings {
    let [r, g, b, a] = config.renderer.clear_color.map(f64::from);
    RendererSettings {
        clear_color: wgpu::Color { r, g, b, a },
        bloom_threshold: config.renderer.bloom_threshold,
        bloom_blur_sigma: config.renderer.bloom_blur_sigma,
        bloom_intensity: config.renderer.bloom_intensity,
        particle_blur_radius: config.renderer.particle_blur_radius,
        texture_cache_limit: config.renderer.texture_cache_limit,
    }
}

/// Effect parameters keyed by identifier, ready for `Renderer::apply_effects`.
pub fn effect_params(config: &SceneConfig) -> HashMap<String, EffectParams> {
    config
        .effects
        .iter()
        .map(|(effect, params)| {
            let params: EffectParams = params
                .iter()
                .map(|(name, value)| (name.as_str(), *value))
                .collect();
            (effect.clone(), params)
        })
        .collect()
}

pub fn blend_mode(config: &SceneConfig) -> BlendMode {
    match config.particles.blend {
        BlendSetting::Alpha => BlendMode::Alpha,
        BlendSetting::Additive => BlendMode::Additive,
    }
}

pub fn gravity(config: &SceneConfig) -> Vec2 {
    Vec2::from_array(config.particles.gravity)
}

/// The command line wins over the scene file.
pub fn simulation_mode(config: &SceneConfig, arg: Option<SimulationArg>) -> SimulationMode {
    match arg {
        Some(SimulationArg::Cpu) => SimulationMode::Cpu,
        Some(SimulationArg::Gpu) => SimulationMode::Gpu,
        None => match config.particles.simulation {
            SimulationSetting::Cpu => SimulationMode::Cpu,
            SimulationSetting::Gpu => SimulationMode::Gpu,
        },
    }
}

/// Human readable summary printed by `--check-config`.
pub fn summary(scene: &LoadedScene) -> Vec<String> {
    let config = &scene.config;
    let source = scene
        .source
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "built-in defaults".to_string());
    let effects = if config.renderer.effects.is_empty() {
        "none".to_string()
    } else {
        config.renderer.effects.join(" -> ")
    };
    vec![
        format!("scene: {source}"),
        format!("effects: {effects}"),
        format!(
            "bloom: threshold {} sigma {} intensity {}",
            config.renderer.bloom_threshold,
            config.renderer.bloom_blur_sigma,
            config.renderer.bloom_intensity
        ),
        format!(
            "particles: max {} at {}/s, lifetime {:.2}s",
            config.particles.max_particles,
            config.particles.emit_rate,
            config.particles.lifetime.as_secs_f32()
        ),
        format!("simulation: {:?}", config.particles.simulation).to_lowercase(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENE: &str = r#"
version = 1

[renderer]
clear_color = [0.1, 0.0, 0.0, 1.0]
bloom_intensity = 0.5
effects = ["blur", "bloom"]

[effects.blur]
radius = 2.0

[particles]
simulation = "gpu"
blend = "alpha"
gravity = [1.0, -2.0]
"#;

    fn config() -> SceneConfig {
        SceneConfig::from_toml_str(SCENE).expect("scene")
    }

    #[test]
    fn maps_renderer_settings() {
        let settings = renderer_settings(&config());
        assert!((settings.clear_color.r - 0.1).abs() < 1e-6);
        assert_eq!(settings.bloom_intensity, 0.5);
        assert_eq!(settings.bloom_threshold, 0.8);
        assert_eq!(settings.texture_cache_limit, 8);
    }

    #[test]
    fn maps_effect_params() {
        let params = effect_params(&config());
        assert_eq!(params.get("blur").and_then(|p| p.get("radius")), Some(2.0));
        assert!(!params.contains_key("bloom"));
    }

    #[test]
    fn command_line_overrides_simulation_mode() {
        let config = config();
        assert_eq!(simulation_mode(&config, None), SimulationMode::Gpu);
        assert_eq!(
            simulation_mode(&config, Some(SimulationArg::Cpu)),
            SimulationMode::Cpu
        );
        assert_eq!(blend_mode(&config), BlendMode::Alpha);
        assert_eq!(gravity(&config), Vec2::new(1.0, -2.0));
    }

    #[test]
    fn summary_lists_effect_chain() {
        let scene = LoadedScene {
            config: config(),
            source: None,
        };
        let lines = summary(&scene);
        assert_eq!(lines[0], "scene: built-in defaults");
        assert_eq!(lines[1], "effects: blur -> bloom");
        assert_eq!(lines[4], "simulation: gpu");
    }
}
