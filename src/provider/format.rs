//! Conversion from conversation messages to provider messages.

use serde_json::Value;
use tracing::debug;

use crate::types::{
    AgentToolCall, ContentPart, Message, ModelMessage, ModelRole, Part, Role,
};

/// Convert conversation messages into the provider transcript.
///
/// Each assistant message becomes one or more assistant turns, each followed
/// by the tool results of the calls it made. Text that follows a tool result
/// opens a new assistant turn. Non-terminal tool invocations and empty
/// messages are skipped.
pub fn to_model_messages(messages: &[Message]) -> Vec<ModelMessage> {
    let mut out = Vec::with_capacity(messages.len());
    for message in messages {
        match message.role {
            Role::System | Role::User => {
                let text = message.text();
                if text.is_empty() {
                    continue;
                }
                let role = if message.role == Role::System {
                    ModelRole::System
                } else {
                    ModelRole::User
                };
                out.push(ModelMessage {
                    role,
                    content: vec![ContentPart::Text { text }],
                });
            }
            Role::Assistant => push_assistant(message, &mut out),
        }
    }
    out
}

fn push_assistant(message: &Message, out: &mut Vec<ModelMessage>) {
    let mut turn: Vec<ContentPart> = Vec::new();
    let mut results: Vec<ModelMessage> = Vec::new();

    for part in &message.parts {
        match part {
            Part::Text { text } => {
                if text.is_empty() {
                    continue;
                }
                if !results.is_empty() {
                    flush(&mut turn, &mut results, out);
                }
                turn.push(ContentPart::Text { text: text.clone() });
            }
            Part::ToolInvocation(invocation) => {
                if !invocation.is_terminal() {
                    debug!(
                        tool_call_id = %invocation.tool_call_id,
                        state = %invocation.state,
                        "skipping unresolved tool invocation"
                    );
                    continue;
                }
                turn.push(ContentPart::ToolCall(AgentToolCall {
                    id: invocation.tool_call_id.clone(),
                    name: invocation.tool_name.clone(),
                    arguments: invocation.input.clone(),
                }));
                results.push(ModelMessage::tool_result(
                    invocation.tool_call_id.clone(),
                    invocation.output.clone().unwrap_or(Value::Null),
                ));
            }
        }
    }
    flush(&mut turn, &mut results, out);
}

fn flush(turn: &mut Vec<ContentPart>, results: &mut Vec<ModelMessage>, out: &mut Vec<ModelMessage>) {
    if turn.is_empty() {
        return;
    }
    out.push(ModelMessage {
        role: ModelRole::Assistant,
        content: std::mem::take(turn),
    });
    out.append(results);
}

/// String payload for a tool result.
pub(crate) fn tool_result_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}
