//! Convenience re-exports for common use.

pub use crate::agent::{
    ChatAgent, ConversationStore, EventStream, FileConversationStore, InMemoryConversationStore,
    OnFinish, SessionRegistry,
};
pub use crate::config::AgentConfig;
pub use crate::error::{AgentError, Result};
pub use crate::provider::ModelProvider;
pub use crate::schedule::{Schedule, ScheduleKind, Scheduler};
pub use crate::tools::{ToolDefinition, ToolRegistry, ToolSchema};
pub use crate::types::{
    GenerationSettings, Message, Part, Role, StreamEvent, ToolDecision, ToolInvocation, ToolState,
};
