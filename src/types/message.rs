//! Conversation messages as exchanged with the client.
//!
//! A [`Message`] is an ordered list of [`Part`]s. Tool invocations carry their
//! own lifecycle state; see [`ToolInvocation::mark_executing`],
//! [`ToolInvocation::complete`] and [`ToolInvocation::deny`] for the only
//! legal transitions.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{AgentError, Result};

/// A message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub parts: Vec<Part>,
    #[serde(default)]
    pub metadata: MessageMetadata,
}

impl Message {
    fn new(role: Role, parts: Vec<Part>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            parts,
            metadata: MessageMetadata {
                created_at: Some(Utc::now()),
                tool_decisions: BTreeMap::new(),
            },
        }
    }

    /// Create a user message with a single text part.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::text(text)])
    }

    /// Create a system message with a single text part.
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![Part::text(text)])
    }

    /// Create an assistant message from parts.
    pub fn assistant(parts: Vec<Part>) -> Self {
        Self::new(Role::Assistant, parts)
    }

    /// Attach a human decision for a tool call.
    pub fn with_decision(mut self, tool_call_id: impl Into<String>, decision: ToolDecision) -> Self {
        self.metadata
            .tool_decisions
            .insert(tool_call_id.into(), decision);
        self
    }

    /// Override the message id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::Text { text } => Some(text.as_str()),
                Part::ToolInvocation(_) => None,
            })
            .collect()
    }

    /// Tool invocation parts in order.
    pub fn tool_invocations(&self) -> impl Iterator<Item = &ToolInvocation> {
        self.parts.iter().filter_map(Part::as_tool_invocation)
    }

    /// Whether this message carries any human tool decision.
    pub fn has_decisions(&self) -> bool {
        !self.metadata.tool_decisions.is_empty()
    }
}

/// Conversation role.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Per-message metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MessageMetadata {
    #[serde(rename = "createdAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Human approval or denial keyed by tool call id.
    #[serde(
        rename = "toolDecisions",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub tool_decisions: BTreeMap<String, ToolDecision>,
}

/// A human decision about a confirmation-required tool call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ToolDecision {
    Approved,
    Denied,
}

/// A single part of message content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Part {
    Text { text: String },
    ToolInvocation(ToolInvocation),
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn as_tool_invocation(&self) -> Option<&ToolInvocation> {
        match self {
            Self::ToolInvocation(invocation) => Some(invocation),
            Self::Text { .. } => None,
        }
    }

    /// Text parts are always terminal.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Text { .. } => true,
            Self::ToolInvocation(invocation) => invocation.state.is_terminal(),
        }
    }
}

/// Lifecycle state of a tool invocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ToolState {
    PendingConfirmation,
    Executing,
    Completed,
    Denied,
}

impl ToolState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Denied)
    }
}

/// A request to call a named tool, with its own lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInvocation {
    #[serde(rename = "toolCallId")]
    pub tool_call_id: String,
    #[serde(rename = "toolName")]
    pub tool_name: String,
    #[serde(default)]
    pub input: serde_json::Value,
    pub state: ToolState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
}

impl ToolInvocation {
    /// A fresh invocation awaiting confirmation or execution.
    pub fn pending(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            input,
            state: ToolState::PendingConfirmation,
            output: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// pending-confirmation -> executing
    pub fn mark_executing(&mut self) -> Result<()> {
        self.transition(ToolState::Executing, None)
    }

    /// pending-confirmation | executing -> completed
    pub fn complete(&mut self, output: serde_json::Value) -> Result<()> {
        self.transition(ToolState::Completed, Some(output))
    }

    /// pending-confirmation -> denied
    pub fn deny(&mut self, output: serde_json::Value) -> Result<()> {
        self.transition(ToolState::Denied, Some(output))
    }

    fn transition(&mut self, next: ToolState, output: Option<serde_json::Value>) -> Result<()> {
        let allowed = matches!(
            (self.state, next),
            (ToolState::PendingConfirmation, ToolState::Executing)
                | (ToolState::PendingConfirmation, ToolState::Completed)
                | (ToolState::PendingConfirmation, ToolState::Denied)
                | (ToolState::Executing, ToolState::Completed)
        );
        if !allowed {
            return Err(AgentError::InvalidState(format!(
                "tool call '{}' cannot move from {} to {}",
                self.tool_call_id, self.state, next
            )));
        }
        self.state = next;
        self.output = output;
        Ok(())
    }
}
