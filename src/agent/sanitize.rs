//! Removes incomplete tool invocations from a conversation history.
//!
//! A tool invocation that is not completed or denied survives only while it
//! still waits on a human: it must be pending confirmation, sit in the most
//! recent assistant message, and either no user message has answered yet or
//! a later user message carries a decision for it. Everything else that is
//! non-terminal (stuck `executing` parts, stale pending parts) is dropped.
//! A message emptied this way is dropped too, unless it carries decisions.
//! Order is preserved and the transform is idempotent.

use std::collections::BTreeSet;

use tracing::warn;

use crate::types::{Message, Part, Role, ToolState};

/// Return `messages` with incomplete tool invocations removed.
pub fn sanitize_messages(messages: &[Message]) -> Vec<Message> {
    let last_assistant = messages.iter().rposition(|m| m.role == Role::Assistant);
    let (awaiting_human, decided) = match last_assistant {
        Some(index) => {
            let later_users: Vec<&Message> = messages[index + 1..]
                .iter()
                .filter(|m| m.role == Role::User)
                .collect();
            let decided: BTreeSet<&str> = later_users
                .iter()
                .flat_map(|m| m.metadata.tool_decisions.keys().map(String::as_str))
                .collect();
            (later_users.is_empty(), decided)
        }
        None => (false, BTreeSet::new()),
    };

    let mut out = Vec::with_capacity(messages.len());
    for (index, message) in messages.iter().enumerate() {
        if message.parts.iter().all(Part::is_terminal) {
            out.push(message.clone());
            continue;
        }

        let is_last_assistant = Some(index) == last_assistant;
        let parts: Vec<Part> = message
            .parts
            .iter()
            .filter(|part| {
                let Part::ToolInvocation(invocation) = part else {
                    return true;
                };
                if invocation.is_terminal() {
                    return true;
                }
                let keep = is_last_assistant
                    && invocation.state == ToolState::PendingConfirmation
                    && (awaiting_human || decided.contains(invocation.tool_call_id.as_str()));
                if !keep {
                    warn!(
                        tool_call_id = %invocation.tool_call_id,
                        tool_name = %invocation.tool_name,
                        state = %invocation.state,
                        "dropping incomplete tool invocation"
                    );
                }
                keep
            })
            .cloned()
            .collect();

        if parts.is_empty() && !message.has_decisions() {
            continue;
        }
        let mut kept = message.clone();
        kept.parts = parts;
        out.push(kept);
    }
    out
}
