use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;

use super::patterns::audit_pattern;

/// A positive command pattern with an optional negative filter.
/// The exclude pattern vetoes a match even when the match regex hits.
pub struct WhitelistPattern {
    pub matcher: Regex,
    pub exclude: Option<Regex>,
    pub description: String,
}

impl WhitelistPattern {
    pub fn matches(&self, segment: &str) -> bool {
        if !self.matcher.is_match(segment) {
            return false;
        }
        match &self.exclude {
            Some(ex) => !ex.is_match(segment),
            None => true,
        }
    }
}

fn builtin(matcher: &str, exclude: Option<&str>, description: &str) -> WhitelistPattern {
    WhitelistPattern {
        matcher: Regex::new(matcher)
            .unwrap_or_else(|e| panic!("bad builtin whitelist pattern {matcher}: {e}")),
        exclude: exclude.map(|ex| {
            Regex::new(ex).unwrap_or_else(|e| panic!("bad builtin exclude pattern {ex}: {e}"))
        }),
        description: description.to_string(),
    }
}

/// The default read-only diagnostics whitelist. Segments are matched after
/// trimming, so patterns anchor at the command word.
pub fn default_whitelist() -> Vec<WhitelistPattern> {
    vec![
        builtin(r"^ls(\s|$)", None, "list directory contents"),
        builtin(r"^cat\s", None, "print file contents"),
        builtin(r"^head(\s|$)", None, "print file head"),
        builtin(r"^tail(\s|$)", None, "print file tail"),
        builtin(r"^grep\s", None, "search file contents"),
        builtin(r"^echo(\s|$)", None, "print text"),
        builtin(r"^pwd$", None, "print working directory"),
        builtin(r"^whoami$", None, "print current user"),
        builtin(r"^id(\s|$)", None, "print user identity"),
        builtin(r"^date(\s|$)", Some(r"\s-s\b|--set\b"), "print date"),
        builtin(r"^uptime$", None, "system uptime"),
        builtin(r"^hostname(\s|$)", Some(r"\s-[bF]\b"), "print hostname"),
        builtin(r"^uname(\s|$)", None, "kernel info"),
        builtin(r"^env$", None, "print environment"),
        builtin(r"^which\s", None, "locate a binary"),
        builtin(r"^file\s", None, "identify file type"),
        builtin(r"^stat\s", None, "file status"),
        builtin(r"^wc(\s|$)", None, "count lines/words"),
        builtin(r"^sort(\s|$)", Some(r"\s-o\b|--output\b"), "sort lines"),
        builtin(r"^uniq(\s|$)", None, "deduplicate lines"),
        builtin(r"^df(\s|$)", None, "disk free"),
        builtin(r"^du(\s|$)", None, "disk usage"),
        builtin(r"^free(\s|$)", None, "memory usage"),
        builtin(r"^ps(\s|$)", None, "process list"),
        builtin(r"^top\s+-b", None, "batch-mode process snapshot"),
        builtin(r"^netstat(\s|$)", None, "network connections"),
        builtin(r"^ss(\s|$)", None, "socket statistics"),
        builtin(r"^dig(\s|$)", None, "DNS lookup"),
        builtin(r"^nslookup\s", None, "DNS lookup"),
        builtin(r"^ping\s+-c\s+\d", None, "bounded ping"),
        builtin(r"^dmesg(\s|$)", None, "kernel ring buffer"),
        builtin(
            r"^journalctl(\s|$)",
            Some(r"--vacuum|--rotate|--flush"),
            "journal query",
        ),
        builtin(
            r"^systemctl\s+(status|show|list-units|list-timers|is-active|is-enabled|is-failed)\b",
            None,
            "service status query",
        ),
        builtin(
            r"^kubectl\s+(get|describe|logs|top|explain|version)\b",
            None,
            "kubernetes read-only query",
        ),
        builtin(
            r"^docker\s+(ps|logs|inspect|stats|images|version)\b",
            None,
            "docker read-only query",
        ),
        builtin(
            r"^find\s",
            Some(r"\s-(exec|execdir|delete|ok|okdir)\b"),
            "file search without side effects",
        ),
        builtin(
            r"^curl\s",
            Some(r"(?i)-X\s*(POST|PUT|DELETE|PATCH)|--data\b|-d\s|-F\s|--upload-file\b|\s-o\s"),
            "read-only HTTP request",
        ),
        builtin(
            r"^awk\s",
            Some(r#"system\s*\(|getline|>\s*["']?/"#),
            "awk without command execution",
        ),
        builtin(
            r"^sed\s",
            Some(r#"\s-[a-z]*i\b|/e(?:['"\s]|$)"#),
            "sed without in-place edits",
        ),
    ]
}

#[derive(Debug, Deserialize)]
struct RawPattern {
    #[serde(rename = "match")]
    match_regex: String,
    #[serde(default)]
    exclude_regex: Option<String>,
    #[serde(default)]
    description: String,
}

/// Parse extra whitelist patterns from a JSON array. Every regex is
/// ReDoS-audited before compilation; one bad entry fails the whole load.
pub fn parse_extra_patterns(json: &str) -> Result<Vec<WhitelistPattern>> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    let raw: Vec<RawPattern> =
        serde_json::from_str(json).context("extra whitelist patterns: invalid JSON")?;

    let mut patterns = Vec::with_capacity(raw.len());
    for entry in raw {
        audit_pattern(&entry.match_regex)
            .with_context(|| format!("match pattern {:?}", entry.match_regex))?;
        let matcher = Regex::new(&entry.match_regex)?;
        let exclude = match &entry.exclude_regex {
            Some(ex) => {
                audit_pattern(ex).with_context(|| format!("exclude pattern {:?}", ex))?;
                Some(Regex::new(ex)?)
            }
            None => None,
        };
        patterns.push(WhitelistPattern {
            matcher,
            exclude,
            description: entry.description,
        });
    }
    Ok(patterns)
}
