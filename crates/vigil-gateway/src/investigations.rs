use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use vigil_agent::llm::AiProvider;
use vigil_agent::runtime::{self, RunnerOptions, TerminationReason};
use vigil_agent::session::SessionStore;
use vigil_agent::skills::CapabilityRegistry;
use vigil_agent::tools::ToolRegistry;
use vigil_core::alert::{Alert, Severity};
use vigil_core::config::InvestigationConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvestigationStatus {
    Running,
    Completed,
    Failed,
    TimedOut,
}

/// Record of one agent-loop execution triggered by an alert.
#[derive(Debug, Clone)]
pub struct Investigation {
    pub id: String,
    pub alert_id: String,
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: InvestigationStatus,
    pub step_count: usize,
    pub final_answer: Option<String>,
}

/// Thread-safe store of investigation records.
#[derive(Default)]
pub struct InvestigationStore {
    records: RwLock<HashMap<String, Investigation>>,
}

impl InvestigationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, investigation: Investigation) {
        self.records
            .write()
            .expect("investigation store lock poisoned")
            .insert(investigation.id.clone(), investigation);
    }

    pub fn finish(
        &self,
        id: &str,
        status: InvestigationStatus,
        step_count: usize,
        final_answer: Option<String>,
    ) {
        let mut records = self.records.write().expect("investigation store lock poisoned");
        if let Some(record) = records.get_mut(id) {
            record.status = status;
            record.step_count = step_count;
            record.final_answer = final_answer;
            record.ended_at = Some(Utc::now());
        }
    }

    pub fn get(&self, id: &str) -> Option<Investigation> {
        self.records
            .read()
            .expect("investigation store lock poisoned")
            .get(id)
            .cloned()
    }

    pub fn running_count(&self) -> usize {
        self.records
            .read()
            .expect("investigation store lock poisoned")
            .values()
            .filter(|r| r.status == InvestigationStatus::Running)
            .count()
    }

    pub fn list(&self) -> Vec<Investigation> {
        let mut all: Vec<Investigation> = self
            .records
            .read()
            .expect("investigation store lock poisoned")
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        all
    }
}

/// Two-phase investigation driver behind the async webhook contract: the
/// starter allocates the ID and filters pre-flight; the runner owns the
/// long work.
pub struct InvestigationCoordinator {
    provider: Arc<dyn AiProvider>,
    sessions: Arc<SessionStore>,
    investigations: Arc<InvestigationStore>,
    tools: Arc<ToolRegistry>,
    capabilities: Arc<CapabilityRegistry>,
    config: InvestigationConfig,
}

impl InvestigationCoordinator {
    pub fn new(
        provider: Arc<dyn AiProvider>,
        sessions: Arc<SessionStore>,
        investigations: Arc<InvestigationStore>,
        tools: Arc<ToolRegistry>,
        capabilities: Arc<CapabilityRegistry>,
        config: InvestigationConfig,
    ) -> Self {
        Self {
            provider,
            sessions,
            investigations,
            tools,
            capabilities,
            config,
        }
    }

    pub fn investigations(&self) -> &InvestigationStore {
        &self.investigations
    }

    /// Phase one: decide whether to investigate and allocate the ID.
    /// Returns Ok(None) when the alert is intentionally filtered.
    pub fn start(&self, alert: &Alert) -> Result<Option<String>> {
        if alert.severity == Severity::Info {
            info!("filtering info-severity alert: {}", alert.summary());
            return Ok(None);
        }
        let running = self.investigations.running_count();
        if running >= self.config.max_concurrent {
            bail!(
                "investigation limit reached ({} running, max {})",
                running,
                self.config.max_concurrent
            );
        }

        let id = format!("inv-{}", uuid::Uuid::new_v4());
        let session_id = self
            .sessions
            .start(Some(&format!("alert-{}", uuid::Uuid::new_v4())))
            .context("failed to allocate investigation session")?;

        self.investigations.insert(Investigation {
            id: id.clone(),
            alert_id: alert.id.clone(),
            session_id,
            started_at: Utc::now(),
            ended_at: None,
            status: InvestigationStatus::Running,
            step_count: 0,
            final_answer: None,
        });
        info!("investigation {} started for {}", id, alert.summary());
        Ok(Some(id))
    }

    /// Phase two: run the agent loop to completion and record the outcome.
    pub async fn run(&self, alert: &Alert, id: &str) -> Result<()> {
        let Some(record) = self.investigations.get(id) else {
            bail!("unknown investigation: {}", id);
        };

        let prompt = alert_prompt(alert);
        let opts = RunnerOptions::from_config(&self.config);

        let result = runtime::run_investigation(
            self.provider.as_ref(),
            &self.sessions,
            &record.session_id,
            Some(&prompt),
            &self.tools,
            &self.capabilities,
            &opts,
            None,
        )
        .await;

        match result {
            Ok(outcome) => {
                let status = match outcome.terminated {
                    TerminationReason::Completed => InvestigationStatus::Completed,
                    TerminationReason::Timeout => InvestigationStatus::TimedOut,
                    TerminationReason::Budget
                    | TerminationReason::Cancelled
                    | TerminationReason::Escalated => InvestigationStatus::Failed,
                };
                self.investigations
                    .finish(id, status, outcome.steps, Some(outcome.final_text));
                Ok(())
            }
            Err(e) => {
                warn!("investigation {} failed: {:#}", id, e);
                self.investigations
                    .finish(id, InvestigationStatus::Failed, 0, None);
                Err(e)
            }
        }
    }
}

/// Seed prompt derived from the alert.
fn alert_prompt(alert: &Alert) -> String {
    let mut prompt = format!(
        "An alert fired and needs investigation.\n\n\
         Severity: {}\nSource: {}\nTitle: {}\n",
        alert.severity, alert.source, alert.title
    );
    if !alert.description.is_empty() {
        prompt.push_str(&format!("Description: {}\n", alert.description));
    }
    if !alert.labels.is_empty() {
        let mut keys: Vec<&String> = alert.labels.keys().collect();
        keys.sort();
        prompt.push_str("Labels:\n");
        for key in keys {
            prompt.push_str(&format!("  {}: {}\n", key, alert.labels[key]));
        }
    }
    prompt.push_str(
        "\nInvestigate the likely cause using the available tools and finish \
         with a conclusion and recommended remediation.",
    );
    prompt
}
