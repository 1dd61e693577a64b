//! Durable conversation history, one record per session.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{AgentError, Result};
use crate::types::Message;

/// Storage for a session's message history.
///
/// `save` replaces the whole history. A session that was never saved loads
/// as an empty history.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn load(&self, session_id: &str) -> Result<Vec<Message>>;
    async fn save(&self, session_id: &str, messages: &[Message]) -> Result<()>;
}

/// Process-local store, lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    sessions: RwLock<HashMap<String, Vec<Message>>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn load(&self, session_id: &str) -> Result<Vec<Message>> {
        Ok(self
            .sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save(&self, session_id: &str, messages: &[Message]) -> Result<()> {
        self.sessions
            .write()
            .await
            .insert(session_id.to_string(), messages.to_vec());
        Ok(())
    }
}

/// Store writing one pretty-printed JSON file per session.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// crash mid-write leaves the previous history intact.
#[derive(Debug, Clone)]
pub struct FileConversationStore {
    base_dir: PathBuf,
}

impl FileConversationStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Store under the platform data directory.
    pub fn new_default() -> Self {
        Self::new(default_data_dir())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.base_dir
            .join(format!("{}.json", session_file_stem(session_id)))
    }
}

#[async_trait]
impl ConversationStore for FileConversationStore {
    async fn load(&self, session_id: &str) -> Result<Vec<Message>> {
        let path = self.session_path(session_id);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let file: ConversationFile = serde_json::from_str(&raw).map_err(|e| {
            AgentError::Storage(format!("corrupt history at {}: {e}", path.display()))
        })?;
        if file.version != FILE_VERSION {
            return Err(AgentError::Storage(format!(
                "unsupported history version {} at {}",
                file.version,
                path.display()
            )));
        }
        Ok(file.messages)
    }

    async fn save(&self, session_id: &str, messages: &[Message]) -> Result<()> {
        tokio::fs::create_dir_all(&self.base_dir).await?;
        let path = self.session_path(session_id);
        let file = ConversationFile {
            version: FILE_VERSION,
            session: session_id.to_string(),
            saved_at: Utc::now(),
            messages: messages.to_vec(),
        };
        let serialized = serde_json::to_string_pretty(&file)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serialized).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

const FILE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConversationFile {
    version: u32,
    session: String,
    saved_at: DateTime<Utc>,
    messages: Vec<Message>,
}

pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "waypoint", "waypoint")
        .map(|dirs| dirs.data_dir().join("sessions"))
        .unwrap_or_else(|| PathBuf::from(".waypoint/sessions"))
}

/// File stem for a session: its percent-encoded id, so distinct ids never
/// share a file and no id can escape the base directory.
fn session_file_stem(session_id: &str) -> String {
    format!("session-{}", urlencoding::encode(session_id))
}
