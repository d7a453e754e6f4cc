//! Name-addressable post-processing stages.
//!
//! An [`EffectStage`] binds an identifier to a [`RenderPass`] and the
//! strategy used to encode it. The renderer keeps stages in an
//! [`EffectRegistry`] and applies them by name, in caller-specified order.

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;
use tracing::debug;

use crate::cache::TextureCache;
use crate::passes::{PassError, RenderPass};

pub const EFFECT_BLUR: &str = "blur";
pub const EFFECT_BLOOM: &str = "bloom";
pub const EFFECT_COLOR_GRADING: &str = "color-grading";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EffectError {
    #[error("no frame is open")]
    NoFrame,
    #[error("no effect registered as `{0}`")]
    UnknownEffect(String),
    #[error("effect `{effect}` failed: {source}")]
    Pass {
        effect: String,
        #[source]
        source: PassError,
    },
}

/// Named scalar parameters handed to an effect stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EffectParams(BTreeMap<String, f32>);

impl EffectParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: f32) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: f32) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f32> {
        self.0.get(name).copied()
    }

    pub fn get_or(&self, name: &str, default: f32) -> f32 {
        self.get(name).unwrap_or(default)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.0.iter().map(|(name, value)| (name.as_str(), *value))
    }
}

impl From<BTreeMap<String, f32>> for EffectParams {
    fn from(values: BTreeMap<String, f32>) -> Self {
        Self(values)
    }
}

impl<K: Into<String>> FromIterator<(K, f32)> for EffectParams {
    fn from_iter<I: IntoIterator<Item = (K, f32)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        )
    }
}

/// Everything an effect needs to encode into the open frame.
///
/// `target` is both the input and the output of the effect.
pub struct EffectContext<'a> {
    pub device: &'a wgpu::Device,
    pub encoder: &'a mut wgpu::CommandEncoder,
    pub cache: &'a mut TextureCache,
    pub target: &'a wgpu::Texture,
}

pub type EffectHandler = Box<
    dyn FnMut(&mut dyn RenderPass, &mut EffectContext<'_>, &EffectParams) -> Result<(), PassError>,
>;

/// A registered (identifier, pass, handler) binding.
pub struct EffectStage {
    identifier: String,
    pass: Box<dyn RenderPass>,
    handler: Option<EffectHandler>,
}

impl EffectStage {
    /// Stage that encodes by calling [`RenderPass::encode`].
    pub fn new(identifier: impl Into<String>, pass: impl RenderPass) -> Self {
        Self::from_boxed(identifier, Box::new(pass))
    }

    pub fn from_boxed(identifier: impl Into<String>, pass: Box<dyn RenderPass>) -> Self {
        Self {
            identifier: identifier.into(),
            pass,
            handler: None,
        }
    }

    /// Stage with a custom encoding strategy. The handler receives the pass so
    /// it can drive it with its own parameters or bypass it entirely.
    pub fn with_handler(
        identifier: impl Into<String>,
        pass: impl RenderPass,
        handler: impl FnMut(&mut dyn RenderPass, &mut EffectContext<'_>, &EffectParams) -> Result<(), PassError>
            + 'static,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            pass: Box::new(pass),
            handler: Some(Box::new(handler)),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn pass(&self) -> &dyn RenderPass {
        self.pass.as_ref()
    }

    pub fn has_custom_handler(&self) -> bool {
        self.handler.is_some()
    }

    pub(crate) fn setup(&mut self, device: &wgpu::Device) -> Result<(), PassError> {
        self.pass.setup(device)
    }

    pub(crate) fn encode(
        &mut self,
        ctx: &mut EffectContext<'_>,
        params: &EffectParams,
    ) -> Result<(), PassError> {
        match self.handler.as_mut() {
            Some(handler) => handler(self.pass.as_mut(), ctx, params),
            None => self.pass.encode(ctx, params),
        }
    }
}

/// Effect stages keyed by identifier. Identifiers are unique; registering an
/// existing one replaces the previous stage.
#[derive(Default)]
pub struct EffectRegistry {
    stages: HashMap<String, EffectStage>,
}

impl EffectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `stage` and returns the stage it replaced, if any.
    pub fn register(&mut self, stage: EffectStage) -> Option<EffectStage> {
        let identifier = stage.identifier.clone();
        let replaced = self.stages.insert(identifier.clone(), stage);
        debug!(
            effect = %identifier,
            replaced = replaced.is_some(),
            "registered effect stage"
        );
        replaced
    }

    pub fn unregister(&mut self, identifier: &str) -> Option<EffectStage> {
        let removed = self.stages.remove(identifier);
        if removed.is_some() {
            debug!(effect = identifier, "unregistered effect stage");
        }
        removed
    }

    pub fn get(&self, identifier: &str) -> Option<&EffectStage> {
        self.stages.get(identifier)
    }

    pub(crate) fn get_mut(&mut self, identifier: &str) -> Option<&mut EffectStage> {
        self.stages.get_mut(identifier)
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.stages.contains_key(identifier)
    }

    /// Registered identifiers in sorted order.
    pub fn identifiers(&self) -> Vec<String> {
        let mut identifiers: Vec<String> = self.stages.keys().cloned().collect();
        identifiers.sort();
        identifiers
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NamedPass(&'static str);

    impl RenderPass for NamedPass {
        fn name(&self) -> &'static str {
            self.0
        }

        fn setup(&mut self, _device: &wgpu::Device) -> Result<(), PassError> {
            Ok(())
        }

        fn is_ready(&self) -> bool {
            true
        }
    }

    #[test]
    fn registering_existing_identifier_replaces_stage() {
        let mut registry = EffectRegistry::new();
        assert!(registry
            .register(EffectStage::new("glow", NamedPass("first")))
            .is_none());

        let replaced = registry.register(EffectStage::new("glow", NamedPass("second")));

        assert_eq!(replaced.map(|stage| stage.pass().name()), Some("first"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("glow").map(|s| s.pass().name()), Some("second"));
    }

    #[test]
    fn identifiers_are_sorted_and_unique() {
        let mut registry = EffectRegistry::new();
        for id in ["vignette", "bloom", "blur", "bloom"] {
            registry.register(EffectStage::new(id, NamedPass(id)));
        }
        assert_eq!(registry.identifiers(), vec!["bloom", "blur", "vignette"]);
    }

    #[test]
    fn unregister_removes_only_named_stage() {
        let mut registry = EffectRegistry::new();
        registry.register(EffectStage::new("a", NamedPass("a")));
        registry.register(EffectStage::new("b", NamedPass("b")));

        assert!(registry.unregister("a").is_some());
        assert!(registry.unregister("a").is_none());
        assert!(!registry.contains("a"));
        assert!(registry.contains("b"));
    }

    #[test]
    fn custom_handler_is_recorded() {
        let stage = EffectStage::with_handler("noop", NamedPass("noop"), |_, _, _| Ok(()));
        assert!(stage.has_custom_handler());
        assert!(!EffectStage::new("plain", NamedPass("plain")).has_custom_handler());
    }

    #[test]
    fn params_fall_back_to_defaults() {
        let params = EffectParams::new().with("radius", 4.0);
        assert_eq!(params.get("radius"), Some(4.0));
        assert_eq!(params.get_or("intensity", 0.5), 0.5);

        let collected: EffectParams = [("a", 1.0), ("b", 2.0)].into_iter().collect();
        assert_eq!(collected.iter().count(), 2);
    }
}
