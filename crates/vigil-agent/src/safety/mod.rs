pub mod legacy;
pub mod patterns;
pub mod segment;
pub mod whitelist;

use anyhow::{bail, Result};
use tracing::debug;

use legacy::LegacyBlocklist;
use segment::{extract_substitutions, split_segments};
use vigil_core::config::{InvestigationConfig, SafetyConfig};
use whitelist::WhitelistPattern;

/// Commands longer than this are rejected before any regex work.
pub const MAX_COMMAND_LENGTH: usize = 10_000;
/// Substitution nesting levels before the whole command is rejected.
pub const MAX_RECURSION_DEPTH: usize = 20;
/// Total segments across all nesting levels of one validation call.
pub const MAX_TOTAL_SEGMENTS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyMode {
    /// Default-deny: every segment must match the whitelist.
    Whitelist,
    /// Default-allow: only dangerous-pattern hits are stopped.
    Blacklist,
}

/// The full decision for one candidate command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub allowed: bool,
    pub is_dangerous: bool,
    pub reason: String,
    pub needs_confirm: bool,
}

impl ValidationResult {
    fn allow() -> Self {
        Self {
            allowed: true,
            is_dangerous: false,
            reason: String::new(),
            needs_confirm: false,
        }
    }

    fn blocked(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            is_dangerous: false,
            reason: reason.into(),
            needs_confirm: false,
        }
    }

    fn dangerous(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            is_dangerous: true,
            reason: reason.into(),
            needs_confirm: true,
        }
    }

    fn unknown(reason: impl Into<String>, is_dangerous: bool) -> Self {
        Self {
            allowed: false,
            is_dangerous,
            reason: reason.into(),
            needs_confirm: true,
        }
    }
}

enum Reject {
    Malformed(String),
    CapExceeded(String),
    NotWhitelisted(String),
}

fn restart_pattern() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(
            r"(?i)\bsystemctl\s+restart\b|\bservice\s+\S+\s+restart\b|\bdocker\s+restart\b|\bkill\s+-?\w*\s*\d",
        )
        .unwrap()
    })
}

fn delete_pattern() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(
            r"(?i)\brm\s|\brmdir\b|\bunlink\b|\bkubectl\s+delete\b|\bdocker\s+rm\b|\btruncate\s+-s\s*0\b",
        )
        .unwrap()
    })
}

/// Decides, for every candidate shell command, whether it may run
/// unattended, requires confirmation, or is blocked. Immutable after
/// construction and safe for unrestricted concurrent use; all per-call
/// state lives in the arguments and the explicit recursion counters.
pub struct CommandValidator {
    mode: SafetyMode,
    whitelist: Vec<WhitelistPattern>,
    legacy: LegacyBlocklist,
    ask_llm_on_unknown: bool,
    /// Config-supplied patterns that always require human approval,
    /// even for otherwise-allowed commands.
    approval_patterns: Vec<regex::Regex>,
    confirm_restart: bool,
    confirm_delete: bool,
}

impl CommandValidator {
    pub fn new(mode: SafetyMode, ask_llm_on_unknown: bool) -> Self {
        Self {
            mode,
            whitelist: whitelist::default_whitelist(),
            legacy: LegacyBlocklist::default(),
            ask_llm_on_unknown,
            approval_patterns: Vec::new(),
            confirm_restart: false,
            confirm_delete: false,
        }
    }

    /// Build a validator from config: safety mode, extra whitelist
    /// patterns (ReDoS-audited), extra legacy substring blocks, and the
    /// human-approval overlays.
    pub fn from_config(safety: &SafetyConfig, investigation: &InvestigationConfig) -> Result<Self> {
        let mode = match safety.mode.as_str() {
            "whitelist" => SafetyMode::Whitelist,
            "blacklist" => SafetyMode::Blacklist,
            other => bail!("unknown safety mode: {}", other),
        };
        let mut wl = whitelist::default_whitelist();
        wl.extend(whitelist::parse_extra_patterns(&safety.extra_whitelist_patterns_json)?);

        let mut approval_patterns = Vec::with_capacity(investigation.human_approval_patterns.len());
        for pattern in &investigation.human_approval_patterns {
            patterns::audit_pattern(pattern)
                .map_err(|e| anyhow::anyhow!("human approval pattern {:?}: {}", pattern, e))?;
            approval_patterns.push(regex::Regex::new(pattern)?);
        }

        Ok(Self {
            mode,
            whitelist: wl,
            legacy: LegacyBlocklist::new(&investigation.blocked_commands),
            ask_llm_on_unknown: safety.ask_llm_on_unknown,
            approval_patterns,
            confirm_restart: investigation.confirm_restart,
            confirm_delete: investigation.confirm_delete,
        })
    }

    pub fn mode(&self) -> SafetyMode {
        self.mode
    }

    /// Validate one command. Never panics and never returns an error;
    /// malformed input yields `allowed=false, needs_confirm=false` with a
    /// specific reason.
    pub fn validate(&self, command: &str, llm_flagged_dangerous: bool) -> ValidationResult {
        if command.len() > MAX_COMMAND_LENGTH {
            return ValidationResult::blocked(format!(
                "command exceeds {} bytes",
                MAX_COMMAND_LENGTH
            ));
        }
        if command.trim().is_empty() {
            return ValidationResult::blocked("empty command");
        }

        let mut segments_seen = 0usize;
        let structure = self.walk(command, 0, &mut segments_seen);

        let result = match self.mode {
            SafetyMode::Whitelist => match structure {
                Ok(()) => ValidationResult::allow(),
                Err(Reject::NotWhitelisted(seg)) => {
                    if self.ask_llm_on_unknown {
                        let assessment = if llm_flagged_dangerous {
                            "model flagged this command as dangerous"
                        } else {
                            "model did not flag this command"
                        };
                        ValidationResult::unknown(
                            format!("not on whitelist: `{}` ({})", seg, assessment),
                            llm_flagged_dangerous,
                        )
                    } else {
                        ValidationResult::blocked(format!("not on whitelist: `{}`", seg))
                    }
                }
                Err(Reject::Malformed(r)) | Err(Reject::CapExceeded(r)) => {
                    ValidationResult::blocked(r)
                }
            },
            SafetyMode::Blacklist => {
                if let Err(Reject::Malformed(r)) | Err(Reject::CapExceeded(r)) = structure {
                    return ValidationResult::blocked(r);
                }
                // Regex table first; the substring list is the legacy
                // fallback and its reason only surfaces when the table
                // has nothing to say.
                let pattern_reason: Option<String> = patterns::first_match(command)
                    .map(String::from)
                    .or_else(|| {
                        self.legacy
                            .is_blocked(command)
                            .map(|e| format!("blocked command substring: '{}'", e))
                    });

                match (pattern_reason, llm_flagged_dangerous) {
                    (None, false) => ValidationResult::allow(),
                    (Some(r), false) => {
                        ValidationResult::dangerous(format!("{} (LLM failed to detect)", r))
                    }
                    (None, true) => ValidationResult::dangerous("marked dangerous by AI"),
                    (Some(r), true) => ValidationResult::dangerous(r),
                }
            }
        };

        let result = if result.allowed {
            self.apply_confirmation_overlays(command, result)
        } else {
            result
        };

        if !result.allowed {
            debug!(command, reason = %result.reason, "command validation refused");
        }
        result
    }

    /// Config-driven confirmation gates layered over an allowed verdict:
    /// operator-supplied approval patterns, restart confirmation, and
    /// delete confirmation.
    fn apply_confirmation_overlays(
        &self,
        command: &str,
        result: ValidationResult,
    ) -> ValidationResult {
        if self.approval_patterns.iter().any(|p| p.is_match(command)) {
            return ValidationResult::unknown(
                "matches a configured human-approval pattern",
                false,
            );
        }
        if self.confirm_restart && restart_pattern().is_match(command) {
            return ValidationResult::unknown("service or process restart", false);
        }
        if self.confirm_delete && delete_pattern().is_match(command) {
            return ValidationResult::unknown("deletes files or resources", false);
        }
        result
    }

    /// Walk segments and substitutions, enforcing the structural caps and
    /// (in whitelist mode) the per-segment whitelist rule. Depth and the
    /// shared segment counter are passed explicitly.
    fn walk(&self, command: &str, depth: usize, segments_seen: &mut usize) -> Result<(), Reject> {
        if depth >= MAX_RECURSION_DEPTH {
            return Err(Reject::CapExceeded(format!(
                "substitution nesting exceeds {} levels",
                MAX_RECURSION_DEPTH
            )));
        }

        let segments = split_segments(command)
            .map_err(|e| Reject::Malformed(format!("malformed command: {}", e)))?;

        for seg in &segments {
            *segments_seen += 1;
            if *segments_seen > MAX_TOTAL_SEGMENTS {
                return Err(Reject::CapExceeded(format!(
                    "command exceeds {} total segments",
                    MAX_TOTAL_SEGMENTS
                )));
            }

            if self.mode == SafetyMode::Whitelist && !self.whitelist.iter().any(|p| p.matches(seg))
            {
                return Err(Reject::NotWhitelisted(seg.clone()));
            }

            let bodies = extract_substitutions(seg)
                .map_err(|e| Reject::Malformed(format!("malformed command: {}", e)))?;
            for body in &bodies {
                self.walk(body, depth + 1, segments_seen)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn whitelist_strict() -> CommandValidator {
        CommandValidator::new(SafetyMode::Whitelist, false)
    }

    fn whitelist_ask() -> CommandValidator {
        CommandValidator::new(SafetyMode::Whitelist, true)
    }

    fn blacklist() -> CommandValidator {
        CommandValidator::new(SafetyMode::Blacklist, false)
    }

    #[test]
    fn test_whitelist_allows_read_only() {
        let v = whitelist_strict();
        let r = v.validate("ls -la /var/log | grep error", false);
        assert!(r.allowed);
        assert!(!r.needs_confirm);
    }

    #[test]
    fn test_whitelist_blocks_unknown() {
        let v = whitelist_strict();
        let r = v.validate("rm -rf /", false);
        assert!(!r.allowed);
        assert!(!r.needs_confirm);
        assert!(r.reason.contains("not on whitelist"));
    }

    #[test]
    fn test_whitelist_quoted_pipe_is_one_segment() {
        let v = whitelist_strict();
        // The pipe lives inside quotes: one whitelisted echo segment.
        let r = v.validate(r#"echo "ls | rm -rf /""#, false);
        assert!(r.allowed, "reason: {}", r.reason);
    }

    #[test]
    fn test_whitelist_quoted_pipe_to_bash_blocked() {
        let v = whitelist_strict();
        let r = v.validate(r#"echo "ls | rm -rf /" | bash"#, false);
        assert!(!r.allowed);
        assert!(r.reason.contains("not on whitelist"));
        assert!(r.reason.contains("bash"));
    }

    #[test]
    fn test_whitelist_checks_substitutions() {
        let v = whitelist_strict();
        // echo is whitelisted but the substitution body is not.
        let r = v.validate("echo $(rm -rf /)", false);
        assert!(!r.allowed);

        let r = v.validate("echo $(pwd)", false);
        assert!(r.allowed, "reason: {}", r.reason);
    }

    #[test]
    fn test_whitelist_backtick_substitution() {
        let v = whitelist_strict();
        let r = v.validate("echo `reboot`", false);
        assert!(!r.allowed);
        let r = v.validate("echo `date`", false);
        assert!(r.allowed, "reason: {}", r.reason);
    }

    #[test]
    fn test_whitelist_ask_llm_on_unknown() {
        let v = whitelist_ask();
        let r = v.validate("systemctl restart nginx", false);
        assert!(!r.allowed);
        assert!(r.needs_confirm);
        assert!(!r.is_dangerous);
        assert!(r.reason.contains("not on whitelist"));

        let r = v.validate("systemctl restart nginx", true);
        assert!(r.needs_confirm);
        assert!(r.is_dangerous);
    }

    #[test]
    fn test_blacklist_decision_table() {
        let v = blacklist();

        // no pattern, no llm flag
        let r = v.validate("uptime", false);
        assert!(r.allowed);
        assert!(!r.needs_confirm);

        // pattern hit, no llm flag
        let r = v.validate("rm -rf /", false);
        assert!(!r.allowed);
        assert!(r.is_dangerous);
        assert!(r.needs_confirm);
        assert!(r.reason.contains("destructive rm command"));
        assert!(r.reason.contains("LLM failed to detect"));

        // no pattern, llm flag
        let r = v.validate("some-custom-tool --wipe", true);
        assert!(r.is_dangerous);
        assert!(r.needs_confirm);
        assert_eq!(r.reason, "marked dangerous by AI");

        // both agree
        let r = v.validate("rm -rf /", true);
        assert!(r.is_dangerous);
        assert_eq!(r.reason, "destructive rm command");
    }

    #[test]
    fn test_blacklist_fork_bomb() {
        let v = blacklist();
        let r = v.validate(":(){ :|:& };:", false);
        assert!(!r.allowed);
        assert!(r.is_dangerous);
        assert!(r.reason.contains("fork bomb"));
    }

    #[test]
    fn test_blacklist_legacy_fallback() {
        let v = blacklist();
        let r = v.validate("shutdown -h now", false);
        assert!(r.is_dangerous);
        assert!(r.reason.contains("blocked command substring"));
    }

    #[test]
    fn test_regex_reason_wins_over_legacy() {
        let v = blacklist();
        // Both layers flag this; the regex reason must win.
        let r = v.validate("echo pw >> /etc/shadow", false);
        assert!(r.reason.starts_with("write to system credential file"));
    }

    #[test]
    fn test_length_boundary() {
        let v = blacklist();
        let exact = "a".repeat(MAX_COMMAND_LENGTH);
        assert!(v.validate(&exact, false).allowed);

        let over = "a".repeat(MAX_COMMAND_LENGTH + 1);
        let r = v.validate(&over, false);
        assert!(!r.allowed);
        assert!(!r.needs_confirm);
        assert!(r.reason.contains("exceeds"));
    }

    #[test]
    fn test_empty_command() {
        let v = blacklist();
        let r = v.validate("   ", false);
        assert!(!r.allowed);
        assert_eq!(r.reason, "empty command");
    }

    #[test]
    fn test_unbalanced_quote_rejected() {
        for v in [whitelist_strict(), blacklist()] {
            let r = v.validate(r#"echo "x"#, false);
            assert!(!r.allowed);
            assert!(!r.needs_confirm);
            assert!(r.reason.contains("malformed"));
        }
    }

    #[test]
    fn test_deep_nesting_rejected() {
        // 25 levels of $( … $(pwd) … ) exceeds the depth cap.
        let mut cmd = "pwd".to_string();
        for _ in 0..25 {
            cmd = format!("echo $({})", cmd);
        }
        for v in [whitelist_strict(), blacklist()] {
            let r = v.validate(&cmd, false);
            assert!(!r.allowed);
            assert!(r.reason.contains("nesting"), "reason: {}", r.reason);
        }
    }

    #[test]
    fn test_shallow_nesting_allowed() {
        let v = whitelist_strict();
        let r = v.validate("echo $(echo $(pwd))", false);
        assert!(r.allowed, "reason: {}", r.reason);
    }

    #[test]
    fn test_segment_cap() {
        let v = blacklist();
        let cmd = vec!["ls"; MAX_TOTAL_SEGMENTS + 1].join("; ");
        let r = v.validate(&cmd, false);
        assert!(!r.allowed);
        assert!(r.reason.contains("segments"));

        let ok = vec!["ls"; 10].join("; ");
        assert!(v.validate(&ok, false).allowed);
    }

    #[test]
    fn test_validation_is_idempotent() {
        let v = blacklist();
        for cmd in ["rm -rf /", "uptime", r#"echo "x"#, ":(){ :|:& };:"] {
            let a = v.validate(cmd, false);
            let b = v.validate(cmd, false);
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_no_panics_on_garbage() {
        let v = blacklist();
        let w = whitelist_strict();
        for cmd in [
            "\\",
            "$(",
            ")",
            "``",
            "''",
            "\"\"",
            "a & b",
            "|;|;|",
            "\u{0}\u{1}\u{7f}",
            "日本語 | ls",
        ] {
            let _ = v.validate(cmd, false);
            let _ = w.validate(cmd, false);
        }
    }

    #[test]
    fn test_from_config() {
        let safety = SafetyConfig {
            mode: "whitelist".to_string(),
            ask_llm_on_unknown: false,
            extra_whitelist_patterns_json:
                r#"[{"match": "^redis-cli\\s+ping$", "description": "redis ping"}]"#.to_string(),
        };
        let inv = InvestigationConfig::default();
        let v = CommandValidator::from_config(&safety, &inv).unwrap();
        assert!(v.validate("redis-cli ping", false).allowed);
        assert!(!v.validate("redis-cli flushall", false).allowed);
    }

    #[test]
    fn test_human_approval_patterns() {
        let safety = SafetyConfig::default();
        let mut inv = InvestigationConfig::default();
        inv.confirm_restart = false;
        inv.confirm_delete = false;
        inv.human_approval_patterns = vec![r"\bkubectl\s+scale\b".to_string()];
        let v = CommandValidator::from_config(&safety, &inv).unwrap();

        let r = v.validate("kubectl scale deploy/web --replicas=0", false);
        assert!(!r.allowed);
        assert!(r.needs_confirm);
        assert!(r.reason.contains("human-approval"));

        assert!(v.validate("kubectl get pods", false).allowed);
    }

    #[test]
    fn test_human_approval_pattern_redos_rejected() {
        let safety = SafetyConfig::default();
        let mut inv = InvestigationConfig::default();
        inv.human_approval_patterns = vec![r"(a+)+".to_string()];
        assert!(CommandValidator::from_config(&safety, &inv).is_err());
    }

    #[test]
    fn test_confirm_restart_and_delete_overlays() {
        let safety = SafetyConfig::default();
        let inv = InvestigationConfig::default(); // both confirms on
        let v = CommandValidator::from_config(&safety, &inv).unwrap();

        let r = v.validate("systemctl restart nginx", false);
        assert!(r.needs_confirm);
        assert!(r.reason.contains("restart"));

        let r = v.validate("rm /tmp/stale.lock", false);
        assert!(r.needs_confirm);
        assert!(r.reason.contains("delete"));

        // Read-only diagnostics pass through untouched.
        assert!(v.validate("df -h", false).allowed);
    }

    #[test]
    fn test_overlays_do_not_soften_blocks() {
        let safety = SafetyConfig::default();
        let inv = InvestigationConfig::default();
        let v = CommandValidator::from_config(&safety, &inv).unwrap();

        // Already dangerous: the pattern reason wins, not the overlay.
        let r = v.validate("rm -rf /", false);
        assert!(r.is_dangerous);
        assert!(r.reason.contains("destructive rm command"));
    }

    #[test]
    fn test_from_config_bad_mode() {
        let safety = SafetyConfig {
            mode: "open".to_string(),
            ..Default::default()
        };
        assert!(CommandValidator::from_config(&safety, &InvestigationConfig::default()).is_err());
    }
}
