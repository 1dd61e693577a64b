//! Session registry: one [`ChatAgent`] per conversation identity.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use super::chat::{spawn_task_listener, ChatAgent};
use super::store::ConversationStore;
use crate::error::Result;
use crate::provider::ModelProvider;
use crate::schedule::Scheduler;
use crate::tools::builtin::default_registry;
use crate::types::GenerationSettings;

/// Creates agents on first use and hands out the same instance afterwards.
///
/// Every agent gets its own scheduler and built-in tools bound to it; fired
/// tasks are appended to that agent's history.
pub struct SessionRegistry {
    store: Arc<dyn ConversationStore>,
    provider: Arc<dyn ModelProvider>,
    settings: GenerationSettings,
    max_steps: usize,
    system_prompt: Option<String>,
    sessions: Mutex<HashMap<String, Arc<ChatAgent>>>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn ConversationStore>, provider: Arc<dyn ModelProvider>) -> Self {
        Self {
            store,
            provider,
            settings: GenerationSettings::default(),
            max_steps: 1,
            system_prompt: None,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt;
        self
    }

    /// Get the agent for `session_id`, creating it if needed.
    pub async fn get_or_create(&self, session_id: &str) -> Result<Arc<ChatAgent>> {
        let mut sessions = self.sessions.lock().await;
        if let Some(agent) = sessions.get(session_id) {
            return Ok(Arc::clone(agent));
        }

        let (scheduler, fired) = Scheduler::new();
        let registry = default_registry(scheduler.clone())?;
        let agent = Arc::new(
            ChatAgent::builder()
                .session_id(session_id)
                .store(Arc::clone(&self.store))
                .registry(Arc::new(registry))
                .provider(Arc::clone(&self.provider))
                .settings(self.settings.clone())
                .max_steps(self.max_steps)
                .maybe_system_prompt(self.system_prompt.clone())
                .scheduler(scheduler)
                .build(),
        );
        spawn_task_listener(Arc::downgrade(&agent), fired);
        debug!(session = %session_id, "created chat agent");
        sessions.insert(session_id.to_string(), Arc::clone(&agent));
        Ok(agent)
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<ChatAgent>> {
        self.sessions.lock().await.get(session_id).cloned()
    }

    /// Drop a session's agent. Its pending schedules are canceled with it.
    pub async fn remove(&self, session_id: &str) -> Option<Arc<ChatAgent>> {
        self.sessions.lock().await.remove(session_id)
    }

    pub async fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}
