//! One conversation's agent: runs turns and scheduled tasks against its history.

use std::sync::{Arc, Weak};

use bon::Builder;
use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::composer::{compose_response, ComposeOutcome, ComposeRequest, OnFinish};
use super::confirmation::{resolve_pending, ResolvedHistory};
use super::prompt::build_system_prompt;
use super::sanitize::sanitize_messages;
use super::store::ConversationStore;
use super::writer::{EventStream, StreamWriter};
use crate::error::Result;
use crate::provider::ModelProvider;
use crate::schedule::{FiredTask, Schedule, Scheduler};
use crate::tools::ToolRegistry;
use crate::types::{FinishReason, GenerationSettings, Message, Part, StreamEvent, ToolInvocation, ToolState};

const EVENT_BUFFER: usize = 64;

/// Handles chat turns for a single session.
///
/// At most one turn runs at a time: the run lock is held from the moment a
/// batch is accepted until the turn's history is committed. Scheduled tasks
/// take the same lock.
#[derive(Builder)]
pub struct ChatAgent {
    #[builder(into)]
    session_id: String,
    store: Arc<dyn ConversationStore>,
    registry: Arc<ToolRegistry>,
    provider: Arc<dyn ModelProvider>,
    #[builder(default)]
    settings: GenerationSettings,
    #[builder(default = 1)]
    max_steps: usize,
    /// Replaces the default instructions; the scheduling directive is always appended.
    #[builder(into)]
    system_prompt: Option<String>,
    scheduler: Option<Scheduler>,
    #[builder(skip)]
    run_lock: Arc<Mutex<()>>,
}

impl ChatAgent {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn scheduler(&self) -> Option<&Scheduler> {
        self.scheduler.as_ref()
    }

    /// Stored history of this session.
    pub async fn messages(&self) -> Result<Vec<Message>> {
        self.store.load(&self.session_id).await
    }

    /// Accept an inbound batch and start a turn.
    ///
    /// The batch is merged into the stored history and committed before the
    /// turn starts. The returned stream carries tool results first, then the
    /// generated reply, and ends with `finish` or `error`. Canceling `cancel`
    /// stops the stream; `on_finish` then never runs.
    pub async fn on_chat_message(
        self: &Arc<Self>,
        incoming: Vec<Message>,
        on_finish: Option<OnFinish>,
        cancel: CancellationToken,
    ) -> Result<EventStream> {
        let guard = self.run_lock.clone().lock_owned().await;

        let stored = self.store.load(&self.session_id).await?;
        let history = merge_messages(stored, incoming);
        self.store.save(&self.session_id, &history).await?;
        debug!(session = %self.session_id, messages = history.len(), "batch committed");

        let (writer, stream) = StreamWriter::channel(EVENT_BUFFER, cancel);
        let agent = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = guard;
            agent.run_turn(history, writer, on_finish).await;
        });
        Ok(stream)
    }

    async fn run_turn(&self, history: Vec<Message>, writer: StreamWriter, on_finish: Option<OnFinish>) {
        let clean = sanitize_messages(&history);
        let resolved = resolve_pending(clean, &self.registry, &writer, &self.session_id).await;
        if writer.is_canceled() {
            debug!(session = %self.session_id, "turn canceled before generation");
            return;
        }
        if let Some((message, part)) = resolved.deferred_at {
            debug!(session = %self.session_id, message, part, "turn held at pending confirmation");
            self.hold_for_confirmation(resolved, &writer, on_finish).await;
            return;
        }

        let request = ComposeRequest {
            session_id: self.session_id.clone(),
            system: build_system_prompt(self.system_prompt.as_deref(), Utc::now()),
            messages: resolved.messages.clone(),
            settings: self.settings.clone(),
            max_steps: self.max_steps,
        };
        let commit = self.commit_on_finish(resolved.messages, on_finish);

        match compose_response(self.provider.as_ref(), &self.registry, request, &writer, commit).await {
            ComposeOutcome::Finished(message) => {
                debug!(session = %self.session_id, message_id = %message.id, "turn finished");
            }
            ComposeOutcome::Failed(err) => {
                warn!(session = %self.session_id, error = %err, "turn failed");
            }
            ComposeOutcome::Canceled => {
                debug!(session = %self.session_id, "turn canceled");
            }
        }
    }

    /// End a turn that is waiting on a human decision.
    ///
    /// The model is not called and no assistant message is added. Results
    /// resolved earlier in the turn are committed, and the stream closes with
    /// `finish` naming the message that holds the open confirmation.
    async fn hold_for_confirmation(
        &self,
        resolved: ResolvedHistory,
        writer: &StreamWriter,
        on_finish: Option<OnFinish>,
    ) {
        let Some(held) = resolved.awaiting_confirmation().cloned() else {
            return;
        };
        if let Err(err) = self.store.save(&self.session_id, &resolved.messages).await {
            error!(session = %self.session_id, error = %err, "failed to commit turn");
        }
        let start = StreamEvent::Start {
            message_id: held.id.clone(),
        };
        let finish = StreamEvent::Finish {
            finish_reason: Some(FinishReason::ToolCalls),
        };
        if !writer.write(start).await || !writer.write(finish).await {
            debug!(session = %self.session_id, "turn canceled while held");
            return;
        }
        if let Some(callback) = on_finish {
            callback(held).await;
        }
    }

    fn commit_on_finish(&self, resolved: Vec<Message>, then: Option<OnFinish>) -> OnFinish {
        let store = Arc::clone(&self.store);
        let session = self.session_id.clone();
        Box::new(move |assistant: Message| {
            Box::pin(async move {
                let mut history = resolved;
                if !assistant.parts.is_empty() {
                    history.push(assistant.clone());
                }
                if let Err(err) = store.save(&session, &history).await {
                    error!(session = %session, error = %err, "failed to commit turn");
                }
                if let Some(callback) = then {
                    callback(assistant).await;
                }
            })
        })
    }

    /// Record that a scheduled task fired.
    ///
    /// Appends one user message naming the task. Safe to call with nobody
    /// connected; the message is picked up by the next turn.
    pub async fn execute_task(&self, description: &str, schedule: &Schedule) -> Result<()> {
        let _guard = self.run_lock.lock().await;
        let mut history = self.store.load(&self.session_id).await?;
        history.push(Message::user(format!("Running scheduled task: {description}")));
        self.store.save(&self.session_id, &history).await?;
        info!(
            session = %self.session_id,
            schedule_id = %schedule.id,
            description,
            "scheduled task recorded"
        );
        Ok(())
    }
}

/// Forward fired tasks to `agent` until the scheduler or the agent goes away.
pub fn spawn_task_listener(
    agent: Weak<ChatAgent>,
    mut fired: mpsc::UnboundedReceiver<FiredTask>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(task) = fired.recv().await {
            let Some(agent) = agent.upgrade() else {
                break;
            };
            if let Err(err) = agent.execute_task(&task.description, &task.schedule).await {
                error!(
                    session = %agent.session_id,
                    schedule_id = %task.schedule.id,
                    error = %err,
                    "failed to record scheduled task"
                );
            }
        }
    })
}

/// Fold an inbound batch into the stored history.
///
/// Messages already stored are updated in place by id; new ones are appended
/// in batch order. Server-side messages the client never saw are kept. A
/// client copy never moves a tool invocation backwards: the stored part wins
/// when it is further along, and stored results the client dropped are kept.
pub fn merge_messages(stored: Vec<Message>, incoming: Vec<Message>) -> Vec<Message> {
    let mut history = stored;
    for message in incoming {
        match history.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => {
                let previous = std::mem::replace(existing, message);
                reconcile(existing, previous);
            }
            None => history.push(message),
        }
    }
    history
}

fn reconcile(current: &mut Message, previous: Message) {
    let mut kept: Vec<ToolInvocation> = Vec::new();
    for part in previous.parts {
        let Part::ToolInvocation(stored) = part else {
            continue;
        };
        let incoming = current.parts.iter_mut().find_map(|p| match p {
            Part::ToolInvocation(t) if t.tool_call_id == stored.tool_call_id => Some(t),
            _ => None,
        });
        match incoming {
            Some(incoming) => {
                if stored.is_terminal() || progress(&stored) > progress(incoming) {
                    *incoming = stored;
                }
            }
            None if stored.is_terminal() => kept.push(stored),
            None => {}
        }
    }
    current.parts.extend(kept.into_iter().map(Part::ToolInvocation));

    for (id, decision) in previous.metadata.tool_decisions {
        current.metadata.tool_decisions.entry(id).or_insert(decision);
    }
    if current.metadata.created_at.is_none() {
        current.metadata.created_at = previous.metadata.created_at;
    }
}

fn progress(invocation: &ToolInvocation) -> u8 {
    match invocation.state {
        ToolState::PendingConfirmation => 0,
        ToolState::Executing => 1,
        ToolState::Completed | ToolState::Denied => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolDecision;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn weather(id: &str) -> ToolInvocation {
        ToolInvocation::pending(id, "getWeatherInformation", json!({ "city": "Paris" }))
    }

    #[test]
    fn merge_replaces_by_id_and_appends_new() {
        let first = Message::user("hi").with_id("m1");
        let task = Message::user("Running scheduled task: backup").with_id("t1");
        let stored = vec![first.clone(), task.clone()];

        let updated = Message::user("hi").with_id("m1").with_decision("c1", ToolDecision::Denied);
        let reply = Message::assistant(vec![Part::text("ok")]).with_id("m2");
        let merged = merge_messages(stored, vec![updated.clone(), reply.clone()]);

        assert_eq!(merged, vec![updated, task, reply]);
    }

    #[test]
    fn merge_into_empty_history_keeps_batch_order() {
        let batch = vec![Message::user("a"), Message::user("b")];
        assert_eq!(merge_messages(Vec::new(), batch.clone()), batch);
    }

    #[test]
    fn stale_client_copy_cannot_reopen_a_resolved_call() {
        let mut done = weather("c1");
        done.complete(json!("sunny")).unwrap();
        let mut refused = weather("c2");
        refused.deny(json!({ "error": "no" })).unwrap();
        let stored = vec![Message::assistant(vec![
            Part::text("Checking."),
            Part::ToolInvocation(done.clone()),
            Part::ToolInvocation(refused.clone()),
        ])
        .with_id("a1")];

        let stale = Message::assistant(vec![
            Part::text("Checking."),
            Part::ToolInvocation(weather("c1")),
        ])
        .with_id("a1");
        let merged = merge_messages(stored, vec![stale]);

        assert_eq!(merged.len(), 1);
        let calls: Vec<&ToolInvocation> = merged[0].tool_invocations().collect();
        assert_eq!(calls, vec![&done, &refused]);
    }

    #[test]
    fn merge_takes_new_parts_and_keeps_stored_decisions() {
        let stored = vec![Message::user("yes")
            .with_id("u1")
            .with_decision("c1", ToolDecision::Approved)];
        let incoming = Message::user("yes")
            .with_id("u1")
            .with_decision("c2", ToolDecision::Denied);

        let merged = merge_messages(stored, vec![incoming]);
        let decisions = &merged[0].metadata.tool_decisions;
        assert_eq!(decisions.get("c1"), Some(&ToolDecision::Approved));
        assert_eq!(decisions.get("c2"), Some(&ToolDecision::Denied));
    }

    #[test]
    fn merge_lets_the_client_advance_a_pending_call() {
        let stored = vec![Message::assistant(vec![Part::ToolInvocation(weather("c1"))]).with_id("a1")];
        let mut answered = weather("c1");
        answered.complete(json!("sunny")).unwrap();
        let incoming = Message::assistant(vec![Part::ToolInvocation(answered.clone())]).with_id("a1");

        let merged = merge_messages(stored, vec![incoming]);
        assert_eq!(merged[0].tool_invocations().next(), Some(&answered));
    }
}
