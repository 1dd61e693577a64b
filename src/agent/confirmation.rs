//! Resolves tool invocations left pending by the previous turn.
//!
//! For each pending invocation, in conversation order:
//! - unknown tool: denied with an explanatory output;
//! - explicit denial: denied, the executor never runs;
//! - an executor applies (automatic, or approved on explicit approval): it runs and the
//!   invocation completes with its output, or an error-shaped output on failure;
//! - explicit approval but no executor at all: completed with an error output;
//! - otherwise: still waiting on a human. The turn ends without generating, so the
//!   agent never speaks past an open confirmation.
//!
//! Executors of the turn run concurrently. Exactly one `tool-output-available` event per
//! resolved invocation is written, in conversation order, after all of them finish.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, warn};

use super::writer::StreamWriter;
use crate::tools::{error_output, ToolContext, ToolDefinition, ToolHandler, ToolRegistry};
use crate::types::{Message, Part, Role, StreamEvent, ToolDecision, ToolState};

pub const DENIED_MESSAGE: &str = "User denied access to tool execution";
pub const NO_EXECUTOR_MESSAGE: &str = "No execute function found on tool";

/// Output of [`resolve_pending`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedHistory {
    /// Full history with every resolvable invocation resolved.
    pub messages: Vec<Message>,
    /// Position (message, part) of the first invocation still waiting on a human.
    pub deferred_at: Option<(usize, usize)>,
}

impl ResolvedHistory {
    /// The message holding the first invocation still waiting on a human.
    pub fn awaiting_confirmation(&self) -> Option<&Message> {
        self.deferred_at
            .and_then(|(message_index, _)| self.messages.get(message_index))
    }
}

enum Plan {
    Deny(Value),
    Complete(Value),
    Run(Arc<ToolDefinition>, Arc<ToolHandler>),
    Defer,
}

/// Resolve every pending invocation in `messages`.
pub async fn resolve_pending(
    messages: Vec<Message>,
    registry: &ToolRegistry,
    writer: &StreamWriter,
    session_id: &str,
) -> ResolvedHistory {
    let decisions = collect_decisions(&messages);
    let mut messages = messages;

    let mut plans: Vec<((usize, usize), Plan)> = Vec::new();
    let mut seen: BTreeSet<String> = BTreeSet::new();
    for (mi, message) in messages.iter().enumerate() {
        for (pi, part) in message.parts.iter().enumerate() {
            let Part::ToolInvocation(invocation) = part else {
                continue;
            };
            if invocation.state != ToolState::PendingConfirmation {
                continue;
            }
            seen.insert(invocation.tool_call_id.clone());
            let decision = decisions.get(&invocation.tool_call_id).copied();
            let plan = match (registry.get(&invocation.tool_name), decision) {
                (None, _) => Plan::Deny(error_output(format!(
                    "Tool '{}' not found",
                    invocation.tool_name
                ))),
                (Some(_), Some(ToolDecision::Denied)) => Plan::Deny(error_output(DENIED_MESSAGE)),
                (Some(tool), Some(ToolDecision::Approved)) => match tool.approved_handler() {
                    Some(handler) => Plan::Run(tool, handler),
                    None => Plan::Complete(error_output(NO_EXECUTOR_MESSAGE)),
                },
                (Some(tool), None) => match tool.automatic_handler() {
                    Some(handler) => Plan::Run(tool, handler),
                    None => Plan::Defer,
                },
            };
            plans.push(((mi, pi), plan));
        }
    }

    for id in decisions.keys().filter(|id| !seen.contains(*id)) {
        warn!(session = %session_id, tool_call_id = %id, "decision matches no pending tool call");
    }

    let deferred_at = plans
        .iter()
        .find(|(_, plan)| matches!(plan, Plan::Defer))
        .map(|(at, _)| *at);

    let mut runs = Vec::new();
    for ((mi, pi), plan) in &plans {
        if let Plan::Run(tool, handler) = plan {
            let Part::ToolInvocation(invocation) = &mut messages[*mi].parts[*pi] else {
                continue;
            };
            if let Err(err) = invocation.mark_executing() {
                warn!(error = %err, "skipping tool call");
                continue;
            }
            debug!(
                session = %session_id,
                tool_call_id = %invocation.tool_call_id,
                tool_name = %invocation.tool_name,
                "executing confirmed tool call"
            );
            let input = invocation.input.clone();
            let ctx = ToolContext {
                session_id: session_id.to_string(),
                tool_call_id: invocation.tool_call_id.clone(),
            };
            let at = (*mi, *pi);
            let tool = tool.clone();
            let handler = handler.clone();
            runs.push(async move {
                let output = tool.execute(handler.as_ref(), &input, ctx).await;
                (at, output)
            });
        }
    }
    let mut outputs: BTreeMap<(usize, usize), Value> = join_all(runs).await.into_iter().collect();

    for (at, plan) in plans {
        let Part::ToolInvocation(invocation) = &mut messages[at.0].parts[at.1] else {
            continue;
        };
        let applied = match plan {
            Plan::Deny(output) => invocation.deny(output),
            Plan::Complete(output) => invocation.complete(output),
            Plan::Run(..) => match outputs.remove(&at) {
                Some(output) => invocation.complete(output),
                None => continue,
            },
            Plan::Defer => continue,
        };
        if let Err(err) = applied {
            warn!(error = %err, "tool call left unresolved");
            continue;
        }
        let output = invocation.output.clone().unwrap_or(Value::Null);
        writer
            .write(StreamEvent::tool_output(invocation.tool_call_id.clone(), output))
            .await;
    }

    ResolvedHistory {
        messages,
        deferred_at,
    }
}

/// Decisions from user messages after the most recent assistant message.
fn collect_decisions(messages: &[Message]) -> BTreeMap<String, ToolDecision> {
    let Some(last_assistant) = messages.iter().rposition(|m| m.role == Role::Assistant) else {
        return BTreeMap::new();
    };
    messages[last_assistant + 1..]
        .iter()
        .filter(|m| m.role == Role::User)
        .flat_map(|m| m.metadata.tool_decisions.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolInvocation;
    use futures::StreamExt;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn pending(id: &str, tool: &str) -> Part {
        Part::ToolInvocation(ToolInvocation::pending(id, tool, json!({})))
    }

    fn registry() -> ToolRegistry {
        ToolRegistry::new()
            .with(ToolDefinition::schema_only(
                "askFirst",
                "",
                crate::tools::ToolSchema::empty(),
            ))
            .unwrap()
            .with(ToolDefinition::automatic(
                "auto",
                "",
                crate::tools::ToolSchema::empty(),
                |_, _| async { Ok(json!("ran")) },
            ))
            .unwrap()
    }

    #[test]
    fn awaiting_confirmation_points_at_the_holding_message() {
        let held = Message::assistant(vec![Part::text("a"), pending("c1", "askFirst")]);
        let resolved = ResolvedHistory {
            messages: vec![Message::user("hi"), held.clone()],
            deferred_at: Some((1, 1)),
        };
        assert_eq!(resolved.awaiting_confirmation(), Some(&held));

        let open = ResolvedHistory {
            deferred_at: None,
            ..resolved
        };
        assert_eq!(open.awaiting_confirmation(), None);
    }

    #[tokio::test]
    async fn approval_without_any_executor_completes_with_error() {
        let (writer, stream) = StreamWriter::channel(8, CancellationToken::new());
        let history = vec![
            Message::assistant(vec![pending("c1", "askFirst")]),
            Message::user("ok").with_decision("c1", ToolDecision::Approved),
        ];
        let resolved = resolve_pending(history, &registry(), &writer, "s").await;
        drop(writer);

        let call = resolved.messages[0].tool_invocations().next().unwrap().clone();
        assert_eq!(call.state, ToolState::Completed);
        assert_eq!(call.output, Some(json!({ "error": NO_EXECUTOR_MESSAGE })));
        assert_eq!(stream.count().await, 1);
    }

    #[tokio::test]
    async fn undecided_confirmation_defers_but_later_automatic_calls_run() {
        let (writer, _stream) = StreamWriter::channel(8, CancellationToken::new());
        let history = vec![Message::assistant(vec![
            pending("c1", "askFirst"),
            pending("c2", "auto"),
        ])];
        let resolved = resolve_pending(history, &registry(), &writer, "s").await;

        let states: Vec<ToolState> = resolved.messages[0]
            .tool_invocations()
            .map(|t| t.state)
            .collect();
        assert_eq!(states, vec![ToolState::PendingConfirmation, ToolState::Completed]);
        assert_eq!(resolved.deferred_at, Some((0, 0)));
        assert_eq!(resolved.awaiting_confirmation(), Some(&resolved.messages[0]));
    }

    #[tokio::test]
    async fn stale_decision_is_ignored() {
        let (writer, stream) = StreamWriter::channel(8, CancellationToken::new());
        let history = vec![
            Message::assistant(vec![Part::text("done")]),
            Message::user("yes").with_decision("gone", ToolDecision::Approved),
        ];
        let resolved = resolve_pending(history.clone(), &registry(), &writer, "s").await;
        drop(writer);

        assert_eq!(resolved.messages, history);
        assert_eq!(resolved.deferred_at, None);
        assert_eq!(stream.count().await, 0);
    }
}
