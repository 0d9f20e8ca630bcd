/// Substring-based blocked-command list, kept as a compatibility layer
/// behind the regex detector. When both layers agree the regex reason
/// wins; this list only speaks up for commands the pattern table misses.
#[derive(Debug, Clone)]
pub struct LegacyBlocklist {
    entries: Vec<String>,
}

impl LegacyBlocklist {
    pub fn new(extra: &[String]) -> Self {
        let mut entries = default_blocklist();
        entries.extend(extra.iter().cloned());
        Self { entries }
    }

    /// Case-insensitive substring check. Returns the matching entry.
    pub fn is_blocked(&self, command: &str) -> Option<&str> {
        let cmd_lower = command.to_lowercase();
        for entry in &self.entries {
            if cmd_lower.contains(&entry.to_lowercase()) {
                return Some(entry);
            }
        }
        None
    }
}

impl Default for LegacyBlocklist {
    fn default() -> Self {
        Self::new(&[])
    }
}

fn default_blocklist() -> Vec<String> {
    [
        // System power state
        "shutdown",
        "reboot",
        "halt -f",
        "poweroff",
        "init 0",
        "init 6",
        // Account manipulation
        "useradd",
        "userdel",
        "usermod",
        "visudo",
        // Reverse shells
        "/dev/tcp/",
        "nc -e",
        "ncat -e",
        // Crypto mining
        "xmrig",
        "minerd",
        "cpuminer",
        // Credential material
        "/etc/shadow",
        ".ssh/id_",
        // Bootloader / partition tables
        "grub-install",
        "parted ",
        "fdisk ",
        "wipefs",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
