//! The chat pipeline: sanitize, resolve pending tool calls, generate, stream.

pub mod chat;
pub mod composer;
pub mod confirmation;
pub mod prompt;
pub mod sanitize;
pub mod session;
pub mod store;
pub mod writer;

pub use chat::{merge_messages, spawn_task_listener, ChatAgent};
pub use composer::{compose_response, ComposeOutcome, ComposeRequest, OnFinish};
pub use confirmation::{resolve_pending, ResolvedHistory};
pub use sanitize::sanitize_messages;
pub use session::SessionRegistry;
pub use store::{ConversationStore, FileConversationStore, InMemoryConversationStore};
pub use writer::{EventStream, StreamWriter};
