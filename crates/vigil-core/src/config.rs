use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level vigil configuration, loaded from vigil.json.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VigilConfig {
    #[serde(default)]
    pub investigation: InvestigationConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub http: HttpConfig,
    /// Alert source definitions handed to the source factory registry.
    /// Each entry must carry a "type" field (e.g. "prometheus").
    #[serde(default)]
    pub sources: Vec<serde_json::Value>,
}

/// Bounds and gates for a single investigation run.
/// This is the canonical configuration; the runner consumes a derived view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestigationConfig {
    /// Maximum LLM↔tool iterations per investigation.
    #[serde(default = "default_max_actions")]
    pub max_actions: usize,
    /// Wall-clock deadline for one investigation, in seconds.
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u64,
    /// Maximum investigations running at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Confidence threshold below which a finding escalates to a human.
    #[serde(default = "default_confidence_escalate")]
    pub confidence_escalate: f64,
    /// Consecutive tool errors before escalation.
    #[serde(default = "default_error_escalate")]
    pub error_escalate: u32,
    /// Tools the investigation loop may dispatch.
    #[serde(default = "default_allowed_tools")]
    pub allowed_tools: Vec<String>,
    /// Extra substring blocks layered onto the safety pipeline.
    #[serde(default)]
    pub blocked_commands: Vec<String>,
    /// Roots the file tools are confined to.
    #[serde(default = "default_allowed_directories")]
    pub allowed_directories: Vec<String>,
    /// Command patterns that always require human approval.
    #[serde(default)]
    pub human_approval_patterns: Vec<String>,
    #[serde(default = "default_true")]
    pub confirm_restart: bool,
    #[serde(default = "default_true")]
    pub confirm_delete: bool,
}

impl Default for InvestigationConfig {
    fn default() -> Self {
        Self {
            max_actions: default_max_actions(),
            max_duration_secs: default_max_duration_secs(),
            max_concurrent: default_max_concurrent(),
            confidence_escalate: default_confidence_escalate(),
            error_escalate: default_error_escalate(),
            allowed_tools: default_allowed_tools(),
            blocked_commands: Vec::new(),
            allowed_directories: default_allowed_directories(),
            human_approval_patterns: Vec::new(),
            confirm_restart: true,
            confirm_delete: true,
        }
    }
}

impl InvestigationConfig {
    /// Validate every field range. Called once after load; invalid config
    /// is a startup failure, never retried.
    pub fn validate(&self) -> Result<()> {
        if self.max_actions == 0 || self.max_actions > 100 {
            bail!("investigation.max_actions must be in 1..=100, got {}", self.max_actions);
        }
        if self.max_duration_secs == 0 || self.max_duration_secs > 3600 {
            bail!(
                "investigation.max_duration_secs must be in 1..=3600, got {}",
                self.max_duration_secs
            );
        }
        if self.max_concurrent == 0 {
            bail!("investigation.max_concurrent must be > 0");
        }
        if !(0.0..=1.0).contains(&self.confidence_escalate) {
            bail!(
                "investigation.confidence_escalate must be in 0..=1, got {}",
                self.confidence_escalate
            );
        }
        if self.error_escalate == 0 {
            bail!("investigation.error_escalate must be > 0");
        }
        if self.allowed_tools.is_empty() {
            bail!("investigation.allowed_tools must not be empty");
        }
        Ok(())
    }

    pub fn set_max_actions(&mut self, n: usize) -> Result<()> {
        if n == 0 || n > 100 {
            bail!("max_actions must be in 1..=100, got {}", n);
        }
        self.max_actions = n;
        Ok(())
    }

    pub fn set_max_duration(&mut self, d: Duration) -> Result<()> {
        let secs = d.as_secs();
        if secs == 0 || secs > 3600 {
            bail!("max_duration must be in 1s..=1h, got {}s", secs);
        }
        self.max_duration_secs = secs;
        Ok(())
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }
}

/// Command safety pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// "whitelist" (default-deny) or "blacklist" (default-allow).
    #[serde(default = "default_safety_mode")]
    pub mode: String,
    /// In whitelist mode, let non-whitelisted commands run after user
    /// confirmation instead of blocking outright.
    #[serde(default)]
    pub ask_llm_on_unknown: bool,
    /// JSON array of extra whitelist patterns, audited before compilation.
    #[serde(default)]
    pub extra_whitelist_patterns_json: String,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            mode: default_safety_mode(),
            ask_llm_on_unknown: false,
            extra_whitelist_patterns_json: String::new(),
        }
    }
}

impl SafetyConfig {
    pub fn validate(&self) -> Result<()> {
        match self.mode.as_str() {
            "whitelist" | "blacklist" => Ok(()),
            other => bail!("safety.mode must be \"whitelist\" or \"blacklist\", got \"{}\"", other),
        }
    }
}

/// Webhook receiver HTTP settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_addr")]
    pub addr: String,
    #[serde(default = "default_http_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_http_timeout_secs")]
    pub write_timeout_secs: u64,
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            addr: default_http_addr(),
            read_timeout_secs: default_http_timeout_secs(),
            write_timeout_secs: default_http_timeout_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl HttpConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

fn default_max_actions() -> usize {
    25
}

fn default_max_duration_secs() -> u64 {
    900
}

fn default_max_concurrent() -> usize {
    5
}

fn default_confidence_escalate() -> f64 {
    0.5
}

fn default_error_escalate() -> u32 {
    3
}

fn default_allowed_tools() -> Vec<String> {
    vec![
        "read_file".to_string(),
        "list_files".to_string(),
        "bash".to_string(),
        "activate_skill".to_string(),
        "deactivate_skill".to_string(),
        "task".to_string(),
    ]
}

fn default_allowed_directories() -> Vec<String> {
    vec![".".to_string()]
}

fn default_safety_mode() -> String {
    "blacklist".to_string()
}

fn default_http_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

/// Load vigil.json, falling back to defaults when the file is absent.
/// `VIGIL_HTTP_ADDR` overrides the configured bind address.
pub fn load_config(path: &Path) -> Result<VigilConfig> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        serde_json::from_str::<VigilConfig>(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?
    } else {
        VigilConfig::default()
    };

    if let Ok(addr) = std::env::var("VIGIL_HTTP_ADDR") {
        if !addr.is_empty() {
            config.http.addr = addr;
        }
    }

    config.investigation.validate()?;
    config.safety.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = VigilConfig::default();
        config.investigation.validate().unwrap();
        config.safety.validate().unwrap();
        assert_eq!(config.http.read_timeout_secs, 30);
        assert_eq!(config.http.shutdown_timeout_secs, 10);
    }

    #[test]
    fn test_parse_minimal() {
        let json = r#"{"safety": {"mode": "whitelist"}}"#;
        let config: VigilConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.safety.mode, "whitelist");
        assert_eq!(config.investigation.max_actions, 25);
        assert!(config.investigation.confirm_delete);
    }

    #[test]
    fn test_validate_rejects_zero_actions() {
        let mut config = InvestigationConfig::default();
        config.max_actions = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_excessive_budget() {
        let mut config = InvestigationConfig::default();
        config.max_actions = 101;
        assert!(config.validate().is_err());
        config.max_actions = 100;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_duration_bounds() {
        let mut config = InvestigationConfig::default();
        config.max_duration_secs = 3601;
        assert!(config.validate().is_err());
        config.max_duration_secs = 3600;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_confidence_range() {
        let mut config = InvestigationConfig::default();
        config.confidence_escalate = 1.5;
        assert!(config.validate().is_err());
        config.confidence_escalate = -0.1;
        assert!(config.validate().is_err());
        config.confidence_escalate = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_empty_tools() {
        let mut config = InvestigationConfig::default();
        config.allowed_tools.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_set_max_actions() {
        let mut config = InvestigationConfig::default();
        config.set_max_actions(50).unwrap();
        assert_eq!(config.max_actions, 50);
        assert!(config.set_max_actions(0).is_err());
        assert!(config.set_max_actions(200).is_err());
    }

    #[test]
    fn test_invalid_safety_mode() {
        let config = SafetyConfig {
            mode: "paranoid".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = load_config(Path::new("/nonexistent/vigil.json")).unwrap();
        assert_eq!(config.investigation.max_actions, 25);
        assert_eq!(config.safety.mode, "blacklist");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vigil.json");
        std::fs::write(
            &path,
            r#"{
                "investigation": {"max_actions": 10, "max_duration_secs": 120},
                "safety": {"mode": "whitelist", "ask_llm_on_unknown": true},
                "http": {"addr": "127.0.0.1:9000"}
            }"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.investigation.max_actions, 10);
        assert_eq!(config.investigation.max_duration_secs, 120);
        assert!(config.safety.ask_llm_on_unknown);
        assert_eq!(config.http.addr, "127.0.0.1:9000");
    }

    #[test]
    fn test_load_rejects_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vigil.json");
        std::fs::write(&path, r#"{"investigation": {"max_actions": 0}}"#).unwrap();
        assert!(load_config(&path).is_err());
    }
}
