use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

use super::{AlertSource, SourceType, WebhookSource};
use vigil_core::alert::{Alert, Severity};

/// Prometheus Alertmanager webhook source (payload version 4).
pub struct PrometheusSource {
    name: String,
}

impl PrometheusSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct AlertmanagerPayload {
    #[serde(default)]
    alerts: Vec<AlertmanagerAlert>,
}

#[derive(Deserialize)]
struct AlertmanagerAlert {
    #[serde(default)]
    status: String,
    #[serde(default)]
    labels: HashMap<String, String>,
    #[serde(default)]
    annotations: HashMap<String, String>,
    #[serde(default, rename = "startsAt")]
    starts_at: Option<DateTime<Utc>>,
}

impl AlertSource for PrometheusSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_type(&self) -> SourceType {
        SourceType::Webhook
    }

    fn as_webhook(&self) -> Option<&dyn WebhookSource> {
        Some(self)
    }
}

impl WebhookSource for PrometheusSource {
    fn webhook_path(&self) -> String {
        format!("/alerts/{}", self.name)
    }

    fn handle_webhook(&self, payload: &[u8]) -> Result<Vec<Alert>> {
        let parsed: AlertmanagerPayload =
            serde_json::from_slice(payload).context("invalid Alertmanager payload")?;

        let mut alerts = Vec::new();
        for entry in parsed.alerts {
            // Resolved notifications are not investigated.
            if entry.status == "resolved" {
                debug!("skipping resolved alert");
                continue;
            }
            let Some(alertname) = entry.labels.get("alertname").cloned() else {
                debug!("skipping alert without alertname");
                continue;
            };

            let severity = entry
                .labels
                .get("severity")
                .and_then(|s| Severity::parse(s))
                .unwrap_or(Severity::Warning);

            let title = entry
                .annotations
                .get("summary")
                .cloned()
                .unwrap_or_else(|| alertname.clone());
            let description = entry
                .annotations
                .get("description")
                .cloned()
                .unwrap_or_default();

            let timestamp = entry.starts_at.unwrap_or_else(Utc::now);
            // Deterministic ID: same payload, same ID.
            let id = format!(
                "{}-{}",
                alertname,
                entry
                    .starts_at
                    .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
                    .unwrap_or_default()
            );

            alerts.push(Alert {
                id,
                source: self.name.clone(),
                severity,
                title,
                description,
                labels: entry.labels,
                timestamp,
                raw_payload: payload.to_vec(),
            });
        }
        Ok(alerts)
    }
}
