use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use crate::context::SessionMode;
use crate::conversation::{Conversation, Message, ToolResultMessage};

/// One live investigation session. Sessions exist only in memory; a lost
/// session is recovered by re-ingesting the triggering alert.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub conversation: Conversation,
    pub mode: SessionMode,
    pub plan_path: Option<PathBuf>,
    pub custom_system_prompt: Option<String>,
    pub activated_skills: HashSet<String>,
    pub started_at: DateTime<Utc>,
}

impl Session {
    fn new(session_id: String) -> Self {
        Self {
            session_id,
            conversation: Conversation::new(),
            mode: SessionMode::Normal,
            plan_path: None,
            custom_system_prompt: None,
            activated_skills: HashSet::new(),
            started_at: Utc::now(),
        }
    }
}

/// Thread-safe in-memory session store. All mutation happens under the
/// per-session lock; snapshots are clones for observability.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session. Generates an ID when none is supplied.
    pub fn start(&self, session_id: Option<&str>) -> Result<String> {
        let id = match session_id {
            Some(s) if s.trim().is_empty() => bail!("session ID must not be empty"),
            Some(s) => s.to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };

        let mut sessions = self.sessions.write().expect("session store lock poisoned");
        if sessions.contains_key(&id) {
            bail!("session already exists: {}", id);
        }
        sessions.insert(id.clone(), Arc::new(Mutex::new(Session::new(id.clone()))));
        Ok(id)
    }

    fn get(&self, session_id: &str) -> Result<Arc<Mutex<Session>>> {
        if session_id.trim().is_empty() {
            bail!("session ID must not be empty");
        }
        let sessions = self.sessions.read().expect("session store lock poisoned");
        sessions
            .get(session_id)
            .cloned()
            .with_context(|| format!("unknown session: {}", session_id))
    }

    pub fn append_user_message(&self, session_id: &str, content: &str) -> Result<()> {
        if content.trim().is_empty() {
            bail!("message must not be empty");
        }
        let session = self.get(session_id)?;
        let mut session = session.lock().expect("session lock poisoned");
        session.conversation.push(Message::user(content))
    }

    pub fn append_assistant_message(&self, session_id: &str, message: Message) -> Result<()> {
        let session = self.get(session_id)?;
        let mut session = session.lock().expect("session lock poisoned");
        session.conversation.push(message)
    }

    /// Append one user message bundling all tool results, in call order.
    pub fn append_tool_results(
        &self,
        session_id: &str,
        results: Vec<ToolResultMessage>,
    ) -> Result<()> {
        let session = self.get(session_id)?;
        let mut session = session.lock().expect("session lock poisoned");
        session.conversation.push(Message::tool_results(results))
    }

    pub fn set_mode(&self, session_id: &str, mode: SessionMode, plan_path: Option<PathBuf>) -> Result<()> {
        let session = self.get(session_id)?;
        let mut session = session.lock().expect("session lock poisoned");
        session.mode = mode;
        session.plan_path = plan_path;
        Ok(())
    }

    pub fn set_custom_system_prompt(&self, session_id: &str, prompt: &str) -> Result<()> {
        let session = self.get(session_id)?;
        let mut session = session.lock().expect("session lock poisoned");
        session.custom_system_prompt = Some(prompt.to_string());
        Ok(())
    }

    pub fn activate_skill(&self, session_id: &str, skill: &str) -> Result<bool> {
        let session = self.get(session_id)?;
        let mut session = session.lock().expect("session lock poisoned");
        Ok(session.activated_skills.insert(skill.to_string()))
    }

    pub fn deactivate_skill(&self, session_id: &str, skill: &str) -> Result<bool> {
        let session = self.get(session_id)?;
        let mut session = session.lock().expect("session lock poisoned");
        Ok(session.activated_skills.remove(skill))
    }

    /// Read-only clone of the current session state.
    pub fn snapshot(&self, session_id: &str) -> Result<Session> {
        let session = self.get(session_id)?;
        let session = session.lock().expect("session lock poisoned");
        Ok(session.clone())
    }

    pub fn end(&self, session_id: &str) -> Result<()> {
        let mut sessions = self.sessions.write().expect("session store lock poisoned");
        sessions
            .remove(session_id)
            .with_context(|| format!("unknown session: {}", session_id))?;
        Ok(())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().expect("session store lock poisoned").len()
    }
}
