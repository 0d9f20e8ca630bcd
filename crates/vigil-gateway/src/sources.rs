pub mod gcp;
pub mod prometheus;

use anyhow::{bail, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use vigil_core::alert::Alert;

/// How a source delivers alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    Webhook,
    Poll,
    Stream,
}

/// An alert source registered with the manager. Webhook-capable sources
/// additionally expose `as_webhook`; the HTTP layer type-tests through it.
pub trait AlertSource: Send + Sync {
    fn name(&self) -> &str;
    fn source_type(&self) -> SourceType;

    /// Release any resources. Called exactly once, on unregister or
    /// manager shutdown.
    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn as_webhook(&self) -> Option<&dyn WebhookSource> {
        None
    }
}

/// Webhook capability: parse an HTTP payload into normalized alerts.
pub trait WebhookSource: AlertSource {
    /// Request path this source answers on (e.g. "/alerts/prometheus").
    fn webhook_path(&self) -> String;

    fn handle_webhook(&self, payload: &[u8]) -> Result<Vec<Alert>>;
}

/// Process-wide registry of alert sources. Register/unregister/get/list
/// are thread-safe; background sources run under a cancellation context
/// owned by `start`/`shutdown`.
pub struct SourceManager {
    sources: RwLock<HashMap<String, Arc<dyn AlertSource>>>,
    cancel: CancellationToken,
}

impl SourceManager {
    pub fn new() -> Self {
        Self {
            sources: RwLock::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn register(&self, source: Arc<dyn AlertSource>) -> Result<()> {
        let name = source.name().to_string();
        let mut sources = self.sources.write().expect("source registry lock poisoned");
        if sources.contains_key(&name) {
            bail!("alert source already registered: {}", name);
        }
        info!("registered alert source: {}", name);
        sources.insert(name, source);
        Ok(())
    }

    /// Unregister a source, closing it.
    pub fn unregister(&self, name: &str) -> Result<()> {
        let source = {
            let mut sources = self.sources.write().expect("source registry lock poisoned");
            sources
                .remove(name)
                .ok_or_else(|| anyhow::anyhow!("alert source not registered: {}", name))?
        };
        source.close()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AlertSource>> {
        self.sources
            .read()
            .expect("source registry lock poisoned")
            .get(name)
            .cloned()
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .sources
            .read()
            .expect("source registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn count(&self) -> usize {
        self.sources.read().expect("source registry lock poisoned").len()
    }

    /// Find the unique webhook source answering on `path`.
    pub fn find_by_webhook_path(&self, path: &str) -> Option<Arc<dyn AlertSource>> {
        let sources = self.sources.read().expect("source registry lock poisoned");
        sources
            .values()
            .find(|s| {
                s.as_webhook()
                    .map(|w| w.webhook_path() == path)
                    .unwrap_or(false)
            })
            .cloned()
    }

    /// Cancellation context handed to poll/stream sources' background
    /// workers. Cancelled on shutdown.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Begin background delivery: hands the shared cancellation context to
    /// every registered poll/stream source. Webhook sources are passive
    /// and ignore this.
    pub fn start(&self) -> CancellationToken {
        let background = {
            let sources = self.sources.read().expect("source registry lock poisoned");
            sources
                .values()
                .filter(|s| s.source_type() != SourceType::Webhook)
                .count()
        };
        if background > 0 {
            info!("{} background source(s) running", background);
        }
        self.cancel.clone()
    }

    /// Close every source. Failures are aggregated into one error; the
    /// remaining sources are still closed.
    pub fn shutdown(&self) -> Result<()> {
        self.cancel.cancel();

        let sources: Vec<(String, Arc<dyn AlertSource>)> = {
            let mut map = self.sources.write().expect("source registry lock poisoned");
            map.drain().collect()
        };

        let mut failures = Vec::new();
        for (name, source) in sources {
            if let Err(e) = source.close() {
                warn!("source {} failed to close: {}", name, e);
                failures.push(format!("{}: {}", name, e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            bail!("failed to close {} source(s): {}", failures.len(), failures.join("; "))
        }
    }
}

impl Default for SourceManager {
    fn default() -> Self {
        Self::new()
    }
}
