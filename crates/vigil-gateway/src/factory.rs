use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::sources::gcp::GcpMonitoringSource;
use crate::sources::prometheus::PrometheusSource;
use crate::sources::AlertSource;

pub type SourceFactory = fn(&Value) -> Result<Arc<dyn AlertSource>>;

/// Registry mapping a config `type` tag to a source factory.
pub struct SourceFactoryRegistry {
    factories: RwLock<BTreeMap<String, SourceFactory>>,
}

impl SourceFactoryRegistry {
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(BTreeMap::new()),
        }
    }

    /// Registry pre-populated with the built-in source types.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register("prometheus", |config| {
            Ok(Arc::new(PrometheusSource::new(source_name(config, "prometheus"))))
        });
        registry.register("gcp_monitoring", |config| {
            Ok(Arc::new(GcpMonitoringSource::new(source_name(
                config,
                "gcp_monitoring",
            ))))
        });
        registry
    }

    /// Later registrations for the same tag replace earlier ones.
    pub fn register(&self, type_tag: &str, factory: SourceFactory) {
        self.factories
            .write()
            .expect("factory registry lock poisoned")
            .insert(type_tag.to_string(), factory);
    }

    /// Supported type tags, alphabetized for stable error output.
    pub fn supported_types(&self) -> Vec<String> {
        self.factories
            .read()
            .expect("factory registry lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Build a source from its config object. The `type` field selects
    /// the factory.
    pub fn create_source(&self, config: &Value) -> Result<Arc<dyn AlertSource>> {
        let type_tag = config
            .get("type")
            .and_then(|t| t.as_str())
            .context("source config is missing the \"type\" field")?;

        let factory = {
            let factories = self.factories.read().expect("factory registry lock poisoned");
            factories.get(type_tag).copied()
        };
        match factory {
            Some(factory) => factory(config),
            None => bail!(
                "unknown source type \"{}\" (supported: {})",
                type_tag,
                self.supported_types().join(", ")
            ),
        }
    }
}

impl Default for SourceFactoryRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn source_name<'a>(config: &'a Value, default: &'a str) -> &'a str {
    config.get("name").and_then(|n| n.as_str()).unwrap_or(default)
}
