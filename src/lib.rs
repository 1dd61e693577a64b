//! Waypoint: a human-in-the-loop chat agent.
//!
//! Turns a conversation history plus a set of tools into a streamed
//! assistant reply. Tools without an automatic executor wait for a human
//! decision, which arrives with the next request. Scheduled tasks append
//! messages to the conversation while nobody is connected.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use waypoint::prelude::*;
//! use futures::StreamExt;
//!
//! # async fn example() -> waypoint::error::Result<()> {
//! let config = AgentConfig::load(None)?;
//! let provider = waypoint::provider::create_provider(&config)?;
//! let sessions = SessionRegistry::new(Arc::new(InMemoryConversationStore::new()), provider)
//!     .with_settings(config.generation_settings());
//!
//! let agent = sessions.get_or_create("demo").await?;
//! let mut events = agent
//!     .on_chat_message(vec![Message::user("What time is it in Rome?")], None, Default::default())
//!     .await?;
//! while let Some(event) = events.next().await {
//!     println!("{}", serde_json::to_string(&event)?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod prelude;
pub mod provider;
pub mod schedule;
pub mod tools;
pub mod types;

#[cfg(feature = "server")]
pub mod server;
