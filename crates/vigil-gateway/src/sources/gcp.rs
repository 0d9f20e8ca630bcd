use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

use super::{AlertSource, SourceType, WebhookSource};
use vigil_core::alert::{Alert, Severity};

/// GCP Cloud Monitoring webhook source (notification version 1.2).
pub struct GcpMonitoringSource {
    name: String,
}

impl GcpMonitoringSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct GcpPayload {
    incident: Incident,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Incident {
    incident_id: String,
    state: String,
    started_at: Option<i64>,
    summary: String,
    policy_name: String,
    condition_name: String,
    severity: String,
    url: String,
    resource: ResourceInfo,
    metric: MetricInfo,
    observed_value: Value,
    threshold_value: Value,
    metadata: Metadata,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ResourceInfo {
    #[serde(rename = "type")]
    resource_type: String,
    labels: HashMap<String, String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct MetricInfo {
    #[serde(rename = "type")]
    metric_type: String,
    #[serde(rename = "displayName")]
    display_name: String,
    labels: HashMap<String, String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Metadata {
    user_labels: HashMap<String, String>,
}

fn map_severity(raw: &str) -> Severity {
    match raw.to_ascii_uppercase().as_str() {
        "CRITICAL" | "ERROR" => Severity::Critical,
        "WARNING" => Severity::Warning,
        _ => Severity::Info,
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

impl AlertSource for GcpMonitoringSource {
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

impl WebhookSource for GcpMonitoringSource {
    fn webhook_path(&self) -> String {
        format!("/alerts/{}", self.name)
    }

    fn handle_webhook(&self, payload: &[u8]) -> Result<Vec<Alert>> {
        let parsed: GcpPayload =
            serde_json::from_slice(payload).context("invalid GCP Monitoring payload")?;
        let incident = parsed.incident;

        // Closed incidents are not investigated.
        if incident.state == "closed" {
            debug!("skipping closed incident {}", incident.incident_id);
            return Ok(Vec::new());
        }

        let title = match (
            incident.policy_name.is_empty(),
            incident.condition_name.is_empty(),
        ) {
            (false, false) => format!("{}: {}", incident.policy_name, incident.condition_name),
            (false, true) => incident.policy_name.clone(),
            (true, false) => incident.condition_name.clone(),
            (true, true) if !incident.summary.is_empty() => incident.summary.clone(),
            (true, true) => format!("incident {}", incident.incident_id),
        };

        // Flatten nested labels with stable prefixes, plus the well-known
        // scalar fields.
        let mut labels = HashMap::new();
        if !incident.resource.resource_type.is_empty() {
            labels.insert("resource.type".to_string(), incident.resource.resource_type);
        }
        for (k, v) in incident.resource.labels {
            labels.insert(format!("resource.{}", k), v);
        }
        if !incident.metric.metric_type.is_empty() {
            labels.insert("metric.type".to_string(), incident.metric.metric_type);
        }
        if !incident.metric.display_name.is_empty() {
            labels.insert("metric.displayName".to_string(), incident.metric.display_name);
        }
        for (k, v) in incident.metric.labels {
            labels.insert(format!("metric.{}", k), v);
        }
        for (k, v) in incident.metadata.user_labels {
            labels.insert(format!("user.{}", k), v);
        }
        if let Some(v) = scalar_to_string(&incident.observed_value) {
            labels.insert("observed_value".to_string(), v);
        }
        if let Some(v) = scalar_to_string(&incident.threshold_value) {
            labels.insert("threshold_value".to_string(), v);
        }
        if !incident.url.is_empty() {
            labels.insert("console_url".to_string(), incident.url);
        }

        let timestamp = incident
            .started_at
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .unwrap_or_else(Utc::now);

        Ok(vec![Alert {
            id: incident.incident_id,
            source: self.name.clone(),
            severity: map_severity(&incident.severity),
            title,
            description: incident.summary,
            labels,
            timestamp,
            raw_payload: payload.to_vec(),
        }])
    }
}
