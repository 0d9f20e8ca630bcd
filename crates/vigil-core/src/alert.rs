use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Alert severity as normalized from monitoring sources.
/// Severity decides whether an investigation is started at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }

    /// Parse a severity label; unknown values map to None so each source
    /// can apply its own default.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Some(Severity::Critical),
            "warning" => Some(Severity::Warning),
            "info" => Some(Severity::Info),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized event ingested from an external monitoring system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Deterministic ID derived by the source (same payload → same ID).
    pub id: String,
    /// Name of the source that produced this alert.
    pub source: String,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
    /// Original webhook body, kept for audit and re-parsing.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub raw_payload: Vec<u8>,
}

impl Alert {
    /// Short one-line description used in logs.
    pub fn summary(&self) -> String {
        format!("[{}] {} ({})", self.severity, self.title, self.source)
    }
}
