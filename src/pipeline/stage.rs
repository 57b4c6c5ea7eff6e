//! Stage trait and registry

use super::engine::Resume;
use super::message::ControlMessage;
use crate::telemetry::MetricsRegistry;
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// One (layer, name) processing step.
///
/// `ingress` runs on the way up, `egress` on the way back down, each on the
/// stage's own worker thread. Neither should block: a message that has to
/// wait for something (ARP resolution) is marked parked and handed to
/// [`park`](Self::park) instead.
pub trait Stage: Send + Sync {
    fn ingress(&self, msg: &mut ControlMessage);

    fn egress(&self, _msg: &mut ControlMessage) {}

    /// Take ownership of a message this stage marked
    /// [`Parked`](super::Verdict::Parked). `resume` sends it on to where it
    /// would have gone next; a stage that never parks keeps the default,
    /// which discards it.
    fn park(&self, msg: ControlMessage, resume: Resume) {
        resume.discard(msg);
    }

    /// How often [`run_aging`](Self::run_aging) should be called, if the stage keeps tables
    fn aging_interval(&self) -> Option<Duration> {
        None
    }

    fn run_aging(&self) {}
}

/// What a stage is told when it is built for a switch
#[derive(Debug, Clone)]
pub struct StageContext {
    pub layer: u8,
    pub name: String,
    /// Stage file, already resolved against the switch config's directory
    pub config_file: Option<PathBuf>,
    pub metrics: Arc<MetricsRegistry>,
}

/// Builds one stage instance. This is where a stage loads its configuration.
pub type StageFactory = fn(&StageContext) -> Result<Arc<dyn Stage>>;

/// A stage as placed in a switch's pipeline
#[derive(Clone)]
pub struct StageHandle {
    pub layer: u8,
    pub name: String,
    pub stage: Arc<dyn Stage>,
}

impl StageHandle {
    /// e.g. "L2:ARP"
    pub fn label(&self) -> String {
        format!("L{}:{}", self.layer, self.name)
    }
}

impl fmt::Debug for StageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StageHandle").field(&self.label()).finish()
    }
}

/// Known stages keyed by (layer, name)
#[derive(Clone, Default)]
pub struct StageRegistry {
    factories: BTreeMap<(u8, String), StageFactory>,
}

impl fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in stage
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        crate::stages::register_builtin(&mut registry);
        registry
    }

    /// Register a factory, replacing any previous one under the same key
    pub fn register(&mut self, layer: u8, name: &str, factory: StageFactory) {
        self.factories.insert((layer, name.to_string()), factory);
    }

    pub fn contains(&self, layer: u8, name: &str) -> bool {
        self.factories.contains_key(&(layer, name.to_string()))
    }

    /// Registered keys in (layer, name) order
    pub fn keys(&self) -> impl Iterator<Item = (u8, &str)> {
        self.factories
            .keys()
            .map(|(layer, name)| (*layer, name.as_str()))
    }

    /// Build the stage registered under `ctx.layer`/`ctx.name`
    pub fn build(&self, ctx: &StageContext) -> Result<StageHandle> {
        let factory = self
            .factories
            .get(&(ctx.layer, ctx.name.clone()))
            .ok_or_else(|| Error::UnknownStage {
                layer: ctx.layer,
                name: ctx.name.clone(),
            })?;

        Ok(StageHandle {
            layer: ctx.layer,
            name: ctx.name.clone(),
            stage: factory(ctx)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nop;

    impl Stage for Nop {
        fn ingress(&self, _msg: &mut ControlMessage) {}
    }

    fn nop(_ctx: &StageContext) -> Result<Arc<dyn Stage>> {
        Ok(Arc::new(Nop))
    }

    fn ctx(layer: u8, name: &str) -> StageContext {
        StageContext {
            layer,
            name: name.to_string(),
            config_file: None,
            metrics: Arc::new(MetricsRegistry::new()),
        }
    }

    #[test]
    fn test_register_and_build() {
        let mut registry = StageRegistry::new();
        registry.register(4, "Nop", nop);

        assert!(registry.contains(4, "Nop"));
        assert!(!registry.contains(3, "Nop"));

        let handle = registry.build(&ctx(4, "Nop")).unwrap();
        assert_eq!(handle.label(), "L4:Nop");
        assert!(handle.stage.aging_interval().is_none());
    }

    #[test]
    fn test_unknown_stage() {
        let registry = StageRegistry::new();
        assert!(matches!(
            registry.build(&ctx(2, "Bogus")),
            Err(Error::UnknownStage { layer: 2, .. })
        ));
    }

    #[test]
    fn test_builtin_stages() {
        let registry = StageRegistry::builtin();
        let keys: Vec<_> = registry.keys().collect();

        for key in [
            (2, "ARP"),
            (2, "Hub"),
            (2, "L2Adapter"),
            (2, "LearningSwitch"),
            (2, "MACFilter"),
            (3, "ICMP"),
            (3, "IPv4"),
            (3, "L3Adapter"),
            (3, "Routing"),
        ] {
            assert!(keys.contains(&key), "missing {:?}", key);
        }
        assert_eq!(keys.len(), 9);
    }
}
