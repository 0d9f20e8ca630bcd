use anyhow::{bail, Result};
use regex::Regex;
use std::sync::OnceLock;

/// One entry in the fixed dangerous-pattern table.
pub struct DangerousPattern {
    pub regex: Regex,
    pub reason: &'static str,
    /// When set, a match is waived if the command writes only to /dev/null
    /// (benchmark idioms like `dd if=/dev/zero of=/dev/null`).
    pub allow_dev_null: bool,
}

static TABLE: OnceLock<Vec<DangerousPattern>> = OnceLock::new();
static DEV_NULL_TARGET: OnceLock<Regex> = OnceLock::new();

fn entry(pattern: &str, reason: &'static str, allow_dev_null: bool) -> DangerousPattern {
    DangerousPattern {
        // Table patterns are fixed and hand-audited; compilation cannot fail.
        regex: Regex::new(pattern).unwrap_or_else(|e| panic!("bad builtin pattern {pattern}: {e}")),
        reason,
        allow_dev_null,
    }
}

/// The ordered dangerous-pattern table. First match wins.
pub fn dangerous_patterns() -> &'static [DangerousPattern] {
    TABLE.get_or_init(|| {
        vec![
            // Destructive file operations
            entry(
                r"(?i)\brm\s+(?:-[a-z]+\s+)*-(?:[a-z]*r[a-z]*f|[a-z]*f[a-z]*r)[a-z]*\b",
                "destructive rm command",
                false,
            ),
            entry(
                r"(?i)\brm\s+.*--recursive\b.*--force\b|\brm\s+.*--force\b.*--recursive\b",
                "destructive rm command",
                false,
            ),
            // Privilege escalation
            entry(r"(?i)(?:^|[;&|]\s*)(?:sudo|doas)\b", "privilege escalation", false),
            entry(r"(?i)(?:^|[;&|]\s*)su\s+-", "privilege escalation", false),
            // Permissions and ownership
            entry(r"(?i)\bchmod\s+(?:-[a-z]+\s+)*0?777\b", "world-writable permissions", false),
            entry(
                r"(?i)\bchown\s+(?:-[a-z]*r[a-z]*\b|--recursive\b)",
                "recursive ownership change",
                false,
            ),
            // Filesystem / raw disk
            entry(r"(?i)\bmkfs(?:\.[a-z0-9]+)?\b", "filesystem format", false),
            entry(r"(?i)\bdd\s+if=", "raw dd transfer", true),
            entry(
                r"(?:>>?|\bof=)\s*/dev/(?:sd|nvme|hd)[a-z0-9]*",
                "write to raw block device",
                false,
            ),
            // Fork bomb
            entry(
                r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
                "fork bomb",
                false,
            ),
            // Piped remote execution
            entry(
                r"(?i)\b(?:curl|wget)\b[^|;&]*\|\s*(?:sudo\s+)?(?:ba|z|da|k)?sh\b",
                "piped download execution",
                false,
            ),
            // System credential files
            entry(
                r"(?:>>?\s*|\btee\s+(?:-a\s+)?)/etc/(?:passwd|shadow|sudoers)\b",
                "write to system credential file",
                false,
            ),
            // History clearing
            entry(r"(?i)\bhistory\s+-c\b", "history clearing", false),
            entry(r"(?i)>\s*\S*\.(?:bash|zsh)_history\b", "history clearing", false),
            // Kill-all variants
            entry(
                r"(?i)\bkill\s+(?:-(?:9|kill|sigkill)\s+)?(?:--\s+)?-1\b",
                "kill all processes",
                false,
            ),
            entry(r"(?i)\bkillall5\b", "kill all processes", false),
            // Service and firewall teardown
            entry(r"(?i)\bsystemctl\s+(?:stop|disable|mask)\b", "service shutdown", false),
            entry(r"(?i)\biptables\s+(?:-F\b|--flush\b)", "firewall flush", false),
            // Scheduled task tampering
            entry(r"(?i)\bcrontab\s+-[re]\b", "crontab modification", false),
            // Environment injection
            entry(r"\bLD_PRELOAD\s*=", "library preload injection", false),
            entry(r"\bPATH\s*=[^;|&]*/tmp", "PATH hijack via /tmp", false),
            // Critical package removal
            entry(
                r"(?i)\b(?:apt(?:-get)?|yum|dnf|rpm|pacman)\b[^|;&]*\b(?:remove|purge|erase|-e\b|-R\b)[^|;&]*\b(?:systemd|glibc|libc6|coreutils|bash)\b",
                "removal of critical system package",
                false,
            ),
            // Container escapes
            entry(r"(?i)\bdocker\s+run\b[^|;&]*--privileged", "privileged container", false),
            entry(
                r"(?i)\bnsenter\b[^|;&]*(?:--target[=\s]+1\b|-t\s*1\b)",
                "host namespace entry",
                false,
            ),
            // Tools with embedded side effects
            entry(
                r"(?i)\bfind\b[^|;&]*\s-(?:exec|execdir|delete|ok|okdir)\b",
                "find with side effects",
                false,
            ),
            entry(r"(?i)\bsed\b[^|;&]*\s-[a-z]*i\b", "in-place sed edit", false),
            entry(r#"(?i)\bsed\b[^|;&]*/e(?:['"\s]|$)"#, "sed command execution", false),
            entry(
                r#"(?i)\bawk\b[^|;&]*(?:system\s*\(|getline|>\s*["']?/)"#,
                "awk command execution",
                false,
            ),
        ]
    })
}

fn dev_null_target() -> &'static Regex {
    DEV_NULL_TARGET.get_or_init(|| Regex::new(r"\bof=/dev/null\b").unwrap())
}

/// First dangerous-pattern match for a command, honoring the /dev/null
/// waiver. Returns the table reason.
pub fn first_match(command: &str) -> Option<&'static str> {
    for p in dangerous_patterns() {
        if p.regex.is_match(command) {
            if p.allow_dev_null && dev_null_target().is_match(command) {
                continue;
            }
            return Some(p.reason);
        }
    }
    None
}

/// Audit a user-supplied pattern before compilation. Rejects the classic
/// ReDoS shapes: a quantifier applied to a group that itself contains a
/// quantifier, a quantifier applied to a group containing alternation, and
/// counted repetitions with a bound of 100 or more.
pub fn audit_pattern(pattern: &str) -> Result<()> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut stack: Vec<(bool, bool)> = Vec::new(); // (has_quantifier, has_alternation)
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' => {
                i += 2;
                continue;
            }
            '(' => stack.push((false, false)),
            ')' => {
                let (quant, alt) = stack.pop().unwrap_or((false, false));
                let next = chars.get(i + 1).copied();
                // `)?` is bounded and harmless; only unbounded or counted
                // repetition of a group is audited.
                let quantified = matches!(next, Some('*') | Some('+') | Some('{'));
                if quantified && quant {
                    bail!("pattern rejected: nested quantifier");
                }
                if matches!(next, Some('*') | Some('+') | Some('{')) && alt {
                    bail!("pattern rejected: alternation under an outer quantifier");
                }
                // Propagate into the enclosing group.
                if let Some(top) = stack.last_mut() {
                    top.0 |= quant || quantified;
                    top.1 |= alt;
                }
            }
            '*' | '+' => {
                if let Some(top) = stack.last_mut() {
                    top.0 = true;
                }
            }
            '|' => {
                if let Some(top) = stack.last_mut() {
                    top.1 = true;
                }
            }
            '{' => {
                if let Some(top) = stack.last_mut() {
                    top.0 = true;
                }
                // Parse {m}, {m,}, {m,n} and reject bounds >= 100.
                let mut j = i + 1;
                let mut num = String::new();
                let mut bounds: Vec<u64> = Vec::new();
                while j < chars.len() && chars[j] != '}' {
                    if chars[j].is_ascii_digit() {
                        num.push(chars[j]);
                    } else if chars[j] == ',' {
                        if let Ok(n) = num.parse() {
                            bounds.push(n);
                        }
                        num.clear();
                    }
                    j += 1;
                }
                if let Ok(n) = num.parse() {
                    bounds.push(n);
                }
                if bounds.iter().any(|&n| n >= 100) {
                    bail!("pattern rejected: repetition bound >= 100");
                }
            }
            _ => {}
        }
        i += 1;
    }

    Regex::new(pattern).map_err(|e| anyhow::anyhow!("invalid pattern: {}", e))?;
    Ok(())
}
