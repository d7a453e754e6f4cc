use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::Deserialize;

pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// A scene file: renderer tunables, the effect chain, the particle emitter,
/// and diagnostics output.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SceneConfig {
    pub version: u32,
    #[serde(default)]
    pub renderer: RendererSection,
    /// Parameters per effect identifier, e.g. `[effects.bloom] intensity = 0.8`.
    #[serde(default)]
    pub effects: BTreeMap<String, BTreeMap<String, f32>>,
    #[serde(default)]
    pub particles: ParticlesSection,
    #[serde(default)]
    pub diagnostics: DiagnosticsSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RendererSection {
    pub clear_color: [f32; 4],
    pub bloom_threshold: f32,
    pub bloom_blur_sigma: f32,
    pub bloom_intensity: f32,
    pub particle_blur_radius: f32,
    pub texture_cache_limit: usize,
    /// Effect identifiers applied after the particles, in order.
    pub effects: Vec<String>,
}

impl Default for RendererSection {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 1.0],
            bloom_threshold: 0.8,
            bloom_blur_sigma: 3.0,
            bloom_intensity: 0.0,
            particle_blur_radius: 0.0,
            texture_cache_limit: 8,
            effects: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimulationSetting {
    #[default]
    Cpu,
    Gpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlendSetting {
    Alpha,
    #[default]
    Additive,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ParticlesSection {
    pub max_particles: usize,
    pub simulation: SimulationSetting,
    pub blend: BlendSetting,
    pub gravity: [f32; 2],
    pub damping: f32,
    /// Particles spawned per second.
    pub emit_rate: f32,
    #[serde(deserialize_with = "deserialize_duration")]
    pub lifetime: Duration,
}

impl Default for ParticlesSection {
    fn default() -> Self {
        Self {
            max_particles: 4000,
            simulation: SimulationSetting::default(),
            blend: BlendSetting::default(),
            gravity: [0.0, -120.0],
            damping: 0.0,
            emit_rate: 200.0,
            lifetime: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DiagnosticsSection {
    pub overlay: bool,
    #[serde(deserialize_with = "deserialize_duration")]
    pub log_interval: Duration,
}

impl Default for DiagnosticsSection {
    fn default() -> Self {
        Self {
            overlay: true,
            log_interval: Duration::from_secs(5),
        }
    }
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            renderer: RendererSection::default(),
            effects: BTreeMap::new(),
            particles: ParticlesSection::default(),
            diagnostics: DiagnosticsSection::default(),
        }
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Duration::from_secs(v))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs(v as u64))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if !v.is_finite() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs_f64(v))
        }
    }

    deserializer.deserialize_any(Visitor)
}

impl SceneConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: SceneConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    /// Parameters configured for `effect`, if any.
    pub fn effect_params(&self, effect: &str) -> Option<&BTreeMap<String, f32>> {
        self.effects.get(effect)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != CONFIG_VERSION {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected {CONFIG_VERSION}",
                self.version
            )));
        }

        let renderer = &self.renderer;
        if renderer.clear_color.iter().any(|c| !c.is_finite()) {
            return Err(ConfigError::Invalid(
                "renderer.clear_color components must be finite".into(),
            ));
        }
        for (name, value) in [
            ("bloom_threshold", renderer.bloom_threshold),
            ("bloom_blur_sigma", renderer.bloom_blur_sigma),
            ("bloom_intensity", renderer.bloom_intensity),
            ("particle_blur_radius", renderer.particle_blur_radius),
        ] {
            non_negative(&format!("renderer.{name}"), value)?;
        }
        if renderer.effects.iter().any(|id| id.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "renderer.effects may not contain empty identifiers".into(),
            ));
        }

        for (effect, params) in &self.effects {
            for (name, value) in params {
                if !value.is_finite() {
                    return Err(ConfigError::Invalid(format!(
                        "effects.{effect}.{name} must be finite"
                    )));
                }
            }
        }

        let particles = &self.particles;
        if particles.max_particles == 0 {
            return Err(ConfigError::Invalid(
                "particles.max_particles must be greater than zero".into(),
            ));
        }
        non_negative("particles.emit_rate", particles.emit_rate)?;
        non_negative("particles.damping", particles.damping)?;
        if particles.gravity.iter().any(|g| !g.is_finite()) {
            return Err(ConfigError::Invalid(
                "particles.gravity components must be finite".into(),
            ));
        }
        if particles.lifetime.is_zero() {
            return Err(ConfigError::Invalid(
                "particles.lifetime must be greater than zero".into(),
            ));
        }

        if self.diagnostics.log_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "diagnostics.log_interval must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}

fn non_negative(name: &str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!("{name} must be >= 0")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
version = 1

[renderer]
clear_color = [0.0, 0.0, 0.02, 1.0]
bloom_threshold = 0.7
bloom_blur_sigma = 4.0
bloom_intensity = 0.6
texture_cache_limit = 4
effects = ["blur", "bloom"]

[effects.bloom]
intensity = 0.8

[effects.blur]
radius = 1.5

[particles]
max_particles = 2500
simulation = "gpu"
blend = "alpha"
gravity = [0.0, -90.0]
damping = 0.2
emit_rate = 400
lifetime = "2.5s"

[diagnostics]
overlay = false
log_interval = 10
"#;

    #[test]
    fn parses_sample_config() {
        let config = SceneConfig::from_toml_str(SAMPLE).expect("parse config");
        assert_eq!(config.renderer.bloom_threshold, 0.7);
        assert_eq!(config.renderer.effects, vec!["blur", "bloom"]);
        assert_eq!(config.renderer.particle_blur_radius, 0.0);
        assert_eq!(
            config.effect_params("bloom").and_then(|p| p.get("intensity")),
            Some(&0.8)
        );
        assert_eq!(config.particles.simulation, SimulationSetting::Gpu);
        assert_eq!(config.particles.blend, BlendSetting::Alpha);
        assert_eq!(config.particles.emit_rate, 400.0);
        assert_eq!(config.particles.lifetime, Duration::from_millis(2500));
        assert!(!config.diagnostics.overlay);
        assert_eq!(config.diagnostics.log_interval, Duration::from_secs(10));
    }

    #[test]
    fn version_alone_yields_defaults() {
        let config = SceneConfig::from_toml_str("version = 1").expect("parse config");
        assert_eq!(config, SceneConfig::default());
        assert_eq!(config.renderer.bloom_threshold, 0.8);
        assert_eq!(config.renderer.bloom_blur_sigma, 3.0);
    }

    #[test]
    fn rejects_unsupported_version() {
        let err = SceneConfig::from_toml_str("version = 2").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_negative_sigma() {
        let err = SceneConfig::from_toml_str(
            r#"
version = 1

[renderer]
bloom_blur_sigma = -1.0
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("bloom_blur_sigma"));
    }

    #[test]
    fn rejects_zero_lifetime() {
        let err = SceneConfig::from_toml_str(
            r#"
version = 1

[particles]
lifetime = 0
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_unknown_simulation_mode() {
        let err = SceneConfig::from_toml_str(
            r#"
version = 1

[particles]
simulation = "quantum"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn unknown_effect_identifiers_are_accepted() {
        let config = SceneConfig::from_toml_str(
            r#"
version = 1

[renderer]
effects = ["vignette"]
"#,
        )
        .expect("parse config");
        assert_eq!(config.renderer.effects, vec!["vignette"]);
    }
}
