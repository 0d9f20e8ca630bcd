use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Metadata for one discovered skill.
#[derive(Debug, Clone)]
pub struct SkillInfo {
    pub name: String,
    pub description: Option<String>,
    pub location: PathBuf,
}

/// Metadata for one discovered sub-agent definition.
#[derive(Debug, Clone)]
pub struct SubagentInfo {
    pub name: String,
    pub description: Option<String>,
    /// Tools this sub-agent may use; empty means the default restricted set.
    pub tools: Vec<String>,
    /// Markdown body appended to the sub-agent's task prompt.
    pub prompt: String,
}

#[derive(Debug, Clone, Default)]
struct Capabilities {
    skills: Vec<SkillInfo>,
    agents: Vec<SubagentInfo>,
}

/// Registry of externally defined capabilities. Enumeration is lazy: the
/// search paths are scanned on first use and cached until `invalidate`,
/// never on every provider call.
pub struct CapabilityRegistry {
    skill_dirs: Vec<PathBuf>,
    agent_dirs: Vec<PathBuf>,
    cache: Mutex<Option<Capabilities>>,
}

impl CapabilityRegistry {
    /// Default search paths: project-local skills, then the sub-agent
    /// paths in first-hit priority order.
    pub fn new() -> Self {
        let mut agent_dirs = vec![PathBuf::from("./agents"), PathBuf::from("./.claude/agents")];
        if let Some(home) = dirs::home_dir() {
            agent_dirs.push(home.join(".claude/agents"));
        }
        Self {
            skill_dirs: vec![PathBuf::from("./skills")],
            agent_dirs,
            cache: Mutex::new(None),
        }
    }

    pub fn with_paths(skill_dirs: Vec<PathBuf>, agent_dirs: Vec<PathBuf>) -> Self {
        Self {
            skill_dirs,
            agent_dirs,
            cache: Mutex::new(None),
        }
    }

    /// Drop the cache; the next use re-scans the search paths.
    pub fn invalidate(&self) {
        *self.cache.lock().expect("capability cache lock poisoned") = None;
    }

    pub fn skills(&self) -> Vec<SkillInfo> {
        self.load().skills
    }

    pub fn find_agent(&self, name: &str) -> Option<SubagentInfo> {
        self.load().agents.into_iter().find(|a| a.name == name)
    }

    pub fn agent_names(&self) -> Vec<String> {
        self.load().agents.into_iter().map(|a| a.name).collect()
    }

    /// Compact XML-style capability block appended to the system prompt.
    /// Empty string when nothing was discovered.
    pub fn prompt_block(&self) -> String {
        let caps = self.load();
        if caps.skills.is_empty() && caps.agents.is_empty() {
            return String::new();
        }

        let mut block = String::new();
        if !caps.skills.is_empty() {
            block.push_str("<skills>\n");
            for skill in &caps.skills {
                block.push_str(&format!(
                    "  <skill name=\"{}\" description=\"{}\" location=\"{}\"/>\n",
                    skill.name,
                    skill.description.as_deref().unwrap_or(""),
                    skill.location.display(),
                ));
            }
            block.push_str("</skills>\n");
        }
        if !caps.agents.is_empty() {
            block.push_str("<agents>\n");
            for agent in &caps.agents {
                block.push_str(&format!(
                    "  <agent name=\"{}\" description=\"{}\"/>\n",
                    agent.name,
                    agent.description.as_deref().unwrap_or(""),
                ));
            }
            block.push_str("</agents>\n");
        }
        block
    }

    fn load(&self) -> Capabilities {
        let mut cache = self.cache.lock().expect("capability cache lock poisoned");
        if let Some(caps) = cache.as_ref() {
            return caps.clone();
        }

        let mut caps = Capabilities::default();
        for dir in &self.skill_dirs {
            match list_skills(dir) {
                Ok(skills) => caps.skills.extend(skills),
                Err(e) => debug!("skill scan failed for {}: {}", dir.display(), e),
            }
        }
        // First-hit priority: an agent name found in an earlier dir wins.
        for dir in &self.agent_dirs {
            match list_agents(dir) {
                Ok(agents) => {
                    for agent in agents {
                        if !caps.agents.iter().any(|a| a.name == agent.name) {
                            caps.agents.push(agent);
                        }
                    }
                }
                Err(e) => debug!("agent scan failed for {}: {}", dir.display(), e),
            }
        }
        caps.skills.sort_by(|a, b| a.name.cmp(&b.name));

        debug!(
            "capability scan: {} skill(s), {} agent(s)",
            caps.skills.len(),
            caps.agents.len()
        );
        *cache = Some(caps.clone());
        caps
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse YAML frontmatter (`---\nkey: value\n---`) and return the value
/// for `key`, stripped of surrounding quotes.
fn frontmatter_value(content: &str, key: &str) -> Option<String> {
    if !content.starts_with("---") {
        return None;
    }
    let rest = &content[3..];
    let end = rest.find("---")?;
    let frontmatter = &rest[..end];

    let prefix = format!("{}:", key);
    for line in frontmatter.lines() {
        let line = line.trim();
        if let Some(value) = line.strip_prefix(&prefix) {
            return Some(value.trim().trim_matches('"').trim_matches('\'').to_string());
        }
    }
    None
}

/// Strip frontmatter, returning the markdown body.
fn frontmatter_body(content: &str) -> &str {
    if let Some(rest) = content.strip_prefix("---") {
        if let Some(end) = rest.find("---") {
            return rest[end + 3..].trim_start();
        }
    }
    content
}

/// List skills: each subdirectory containing a SKILL.md.
fn list_skills(skills_dir: &Path) -> Result<Vec<SkillInfo>> {
    if !skills_dir.exists() {
        return Ok(vec![]);
    }

    let mut skills = Vec::new();
    for entry in std::fs::read_dir(skills_dir)
        .with_context(|| format!("failed to read skills dir: {}", skills_dir.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }

        let skill_md = entry.path().join("SKILL.md");
        if !skill_md.exists() {
            continue;
        }
        let description = std::fs::read_to_string(&skill_md)
            .ok()
            .and_then(|c| frontmatter_value(&c, "description"));

        if let Some(name) = entry.file_name().to_str() {
            skills.push(SkillInfo {
                name: name.to_string(),
                description,
                location: skill_md,
            });
        }
    }
    Ok(skills)
}

/// List sub-agents: `<name>.md` files with frontmatter metadata.
fn list_agents(agents_dir: &Path) -> Result<Vec<SubagentInfo>> {
    if !agents_dir.exists() {
        return Ok(vec![]);
    }

    let mut agents = Vec::new();
    for entry in std::fs::read_dir(agents_dir)
        .with_context(|| format!("failed to read agents dir: {}", agents_dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };

        let name = frontmatter_value(&content, "name").unwrap_or_else(|| stem.to_string());
        let tools = frontmatter_value(&content, "tools")
            .map(|t| {
                t.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        agents.push(SubagentInfo {
            name,
            description: frontmatter_value(&content, "description"),
            tools,
            prompt: frontmatter_body(&content).to_string(),
        });
    }
    agents.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(agents)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, CapabilityRegistry) {
        let dir = tempfile::tempdir().unwrap();

        let skill = dir.path().join("skills/kubernetes");
        std::fs::create_dir_all(&skill).unwrap();
        std::fs::write(
            skill.join("SKILL.md"),
            "---\ndescription: Query Kubernetes clusters\n---\nUse kubectl get/describe.\n",
        )
        .unwrap();

        let agents = dir.path().join("agents");
        std::fs::create_dir_all(&agents).unwrap();
        std::fs::write(
            agents.join("log-analyzer.md"),
            "---\nname: log-analyzer\ndescription: Digs through service logs\ntools: read_file, bash\n---\nFocus on error clusters and timestamps.\n",
        )
        .unwrap();

        let registry = CapabilityRegistry::with_paths(
            vec![dir.path().join("skills")],
            vec![dir.path().join("agents")],
        );
        (dir, registry)
    }

    #[test]
    fn test_frontmatter_value() {
        let content = "---\ndescription: Search the web\n---\nBody";
        assert_eq!(frontmatter_value(content, "description"), Some("Search the web".to_string()));
        assert_eq!(frontmatter_value(content, "name"), None);
        assert_eq!(frontmatter_value("no frontmatter", "description"), None);
    }

    #[test]
    fn test_frontmatter_value_quoted() {
        let content = "---\ndescription: \"Manage repos\"\n---\n";
        assert_eq!(frontmatter_value(content, "description"), Some("Manage repos".to_string()));
    }

    #[test]
    fn test_frontmatter_body() {
        let content = "---\nname: x\n---\nThe prompt body.";
        assert_eq!(frontmatter_body(content), "The prompt body.");
        assert_eq!(frontmatter_body("plain"), "plain");
    }

    #[test]
    fn test_discovery() {
        let (_dir, registry) = fixture();
        let skills = registry.skills();
        assert_eq!(skills.len(), 1);
        assert_eq!(skills[0].name, "kubernetes");
        assert_eq!(skills[0].description.as_deref(), Some("Query Kubernetes clusters"));

        let agent = registry.find_agent("log-analyzer").unwrap();
        assert_eq!(agent.tools, vec!["read_file", "bash"]);
        assert!(agent.prompt.contains("error clusters"));
    }

    #[test]
    fn test_prompt_block() {
        let (_dir, registry) = fixture();
        let block = registry.prompt_block();
        assert!(block.contains("<skills>"));
        assert!(block.contains("<skill name=\"kubernetes\""));
        assert!(block.contains("location="));
        assert!(block.contains("<agent name=\"log-analyzer\""));
    }

    #[test]
    fn test_empty_paths_give_empty_block() {
        let registry = CapabilityRegistry::with_paths(
            vec![PathBuf::from("/nonexistent/skills")],
            vec![PathBuf::from("/nonexistent/agents")],
        );
        assert_eq!(registry.prompt_block(), "");
        assert!(registry.skills().is_empty());
    }

    #[test]
    fn test_cache_and_invalidate() {
        let (dir, registry) = fixture();
        assert_eq!(registry.skills().len(), 1);

        // New skill added after first scan is invisible until invalidation.
        let late = dir.path().join("skills/redis");
        std::fs::create_dir_all(&late).unwrap();
        std::fs::write(late.join("SKILL.md"), "---\ndescription: Redis\n---\n").unwrap();
        assert_eq!(registry.skills().len(), 1);

        registry.invalidate();
        assert_eq!(registry.skills().len(), 2);
    }

    #[test]
    fn test_first_hit_priority_for_agents() {
        let dir = tempfile::tempdir().unwrap();
        for (subdir, desc) in [("a", "primary"), ("b", "shadowed")] {
            let d = dir.path().join(subdir);
            std::fs::create_dir_all(&d).unwrap();
            std::fs::write(
                d.join("worker.md"),
                format!("---\nname: worker\ndescription: {}\n---\n", desc),
            )
            .unwrap();
        }
        let registry = CapabilityRegistry::with_paths(
            vec![],
            vec![dir.path().join("a"), dir.path().join("b")],
        );
        let agent = registry.find_agent("worker").unwrap();
        assert_eq!(agent.description.as_deref(), Some("primary"));
    }
}
