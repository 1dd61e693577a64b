//! Drives model generation and merges it into the outgoing stream.
//!
//! Event order for one turn, after whatever the resolver already wrote:
//! `start`, then per step `start-step`, text and tool events, `finish-step`,
//! then `finish`. A model failure ends the stream with a single `error`
//! event instead; text already sent stays sent.

use futures::future::{join_all, BoxFuture};
use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, error, warn};

use super::writer::StreamWriter;
use crate::error::AgentError;
use crate::provider::format::to_model_messages;
use crate::provider::{ModelProvider, ModelRequest};
use crate::tools::{error_output, ToolContext, ToolRegistry};
use crate::types::{
    AgentToolCall, DeltaKind, FinishReason, GenerationSettings, Message, Part, StreamEvent,
    ToolInvocation, ToolState, Usage,
};

/// Called exactly once with the assembled assistant message when a turn
/// finishes normally.
pub type OnFinish = Box<dyn FnOnce(Message) -> BoxFuture<'static, ()> + Send>;

/// Everything one generation needs besides the model and tools.
#[derive(Debug, Clone)]
pub struct ComposeRequest {
    pub session_id: String,
    pub system: String,
    /// Resolved history the model may see.
    pub messages: Vec<Message>,
    pub settings: GenerationSettings,
    /// Upper bound on generate -> run tools -> generate cycles.
    pub max_steps: usize,
}

/// How a turn ended.
#[derive(Debug)]
pub enum ComposeOutcome {
    Finished(Message),
    Failed(AgentError),
    Canceled,
}

enum StepEnd {
    Continue,
    Stop(FinishReason),
}

/// Generate the assistant reply for `request`, writing events to `writer`.
pub async fn compose_response(
    provider: &dyn ModelProvider,
    registry: &ToolRegistry,
    request: ComposeRequest,
    writer: &StreamWriter,
    on_finish: OnFinish,
) -> ComposeOutcome {
    let mut assistant = Message::assistant(Vec::new());
    if !writer
        .write(StreamEvent::Start {
            message_id: assistant.id.clone(),
        })
        .await
    {
        return ComposeOutcome::Canceled;
    }

    let mut usage = Usage::default();
    let mut finish_reason = FinishReason::Stop;
    for step in 0..request.max_steps.max(1) {
        let last_step = step + 1 >= request.max_steps.max(1);
        match run_step(provider, registry, &request, writer, &mut assistant, &mut usage, last_step)
            .await
        {
            Ok(StepEnd::Continue) => continue,
            Ok(StepEnd::Stop(reason)) => {
                finish_reason = reason;
                break;
            }
            Err(AgentError::Canceled) => return ComposeOutcome::Canceled,
            Err(err) => {
                error!(session = %request.session_id, error = %err, "model stream failed");
                writer.write(StreamEvent::error(err.to_string())).await;
                return ComposeOutcome::Failed(err);
            }
        }
    }

    if !writer
        .write(StreamEvent::Finish {
            finish_reason: Some(finish_reason),
        })
        .await
    {
        return ComposeOutcome::Canceled;
    }
    debug!(
        session = %request.session_id,
        input_tokens = usage.input_tokens,
        output_tokens = usage.output_tokens,
        %finish_reason,
        "turn finished"
    );
    on_finish(assistant.clone()).await;
    ComposeOutcome::Finished(assistant)
}

async fn run_step(
    provider: &dyn ModelProvider,
    registry: &ToolRegistry,
    request: &ComposeRequest,
    writer: &StreamWriter,
    assistant: &mut Message,
    usage: &mut Usage,
    last_step: bool,
) -> Result<StepEnd, AgentError> {
    emit(writer, StreamEvent::StartStep).await?;

    let mut transcript = request.messages.clone();
    if !assistant.parts.is_empty() {
        transcript.push(assistant.clone());
    }
    let model_request = ModelRequest {
        system: Some(request.system.clone()),
        messages: to_model_messages(&transcript),
        tools: registry.specs(),
        settings: request.settings.clone(),
    };

    let mut stream = tokio::select! {
        _ = writer.cancellation().cancelled() => return Err(AgentError::Canceled),
        opened = provider.stream_text(&model_request) => opened?,
    };

    let text_id = uuid::Uuid::new_v4().to_string();
    let mut text = String::new();
    let mut calls: Vec<AgentToolCall> = Vec::new();
    let mut reason: Option<FinishReason> = None;

    loop {
        let next = tokio::select! {
            _ = writer.cancellation().cancelled() => return Err(AgentError::Canceled),
            next = stream.next() => next,
        };
        let Some(delta) = next else {
            break;
        };
        let delta = delta?;
        match delta.event_type {
            DeltaKind::TextDelta => {
                if delta.text.is_empty() {
                    continue;
                }
                if text.is_empty() {
                    emit(writer, StreamEvent::TextStart { id: text_id.clone() }).await?;
                }
                text.push_str(&delta.text);
                emit(
                    writer,
                    StreamEvent::TextDelta {
                        id: text_id.clone(),
                        delta: delta.text,
                    },
                )
                .await?;
            }
            DeltaKind::ToolCall => {
                if let Some(call) = delta.tool_call {
                    calls.push(call);
                }
            }
            DeltaKind::Done => {
                reason = delta.finish_reason;
                if let Some(step_usage) = &delta.usage {
                    usage.merge(step_usage);
                }
            }
        }
    }

    if !text.is_empty() {
        emit(writer, StreamEvent::TextEnd { id: text_id }).await?;
        assistant.parts.push(Part::text(text));
    }

    if calls.is_empty() {
        emit(writer, StreamEvent::FinishStep).await?;
        return Ok(StepEnd::Stop(reason.unwrap_or(FinishReason::Stop)));
    }

    let all_completed = run_model_tool_calls(registry, request, writer, assistant, calls).await?;
    emit(writer, StreamEvent::FinishStep).await?;

    if all_completed && !last_step {
        Ok(StepEnd::Continue)
    } else {
        Ok(StepEnd::Stop(FinishReason::ToolCalls))
    }
}

/// Turn model tool calls into parts. Automatic tools run now, concurrently;
/// confirmation-required ones wait for the next request. Returns whether
/// every call completed.
async fn run_model_tool_calls(
    registry: &ToolRegistry,
    request: &ComposeRequest,
    writer: &StreamWriter,
    assistant: &mut Message,
    calls: Vec<AgentToolCall>,
) -> Result<bool, AgentError> {
    let mut invocations = Vec::with_capacity(calls.len());
    for call in calls {
        emit(
            writer,
            StreamEvent::ToolInputAvailable {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                input: call.arguments.clone(),
            },
        )
        .await?;
        invocations.push(ToolInvocation::pending(call.id, call.name, call.arguments));
    }

    let runs = invocations.iter_mut().map(|invocation| {
        let tool = registry.get(&invocation.tool_name);
        let ctx = ToolContext {
            session_id: request.session_id.clone(),
            tool_call_id: invocation.tool_call_id.clone(),
        };
        async move {
            let Some(tool) = tool else {
                warn!(tool_name = %invocation.tool_name, "model called an unknown tool");
                let output = error_output(format!("Tool '{}' not found", invocation.tool_name));
                return invocation.deny(output).map(|_| true);
            };
            let Some(handler) = tool.automatic_handler() else {
                return Ok(false);
            };
            invocation.mark_executing()?;
            let output = tool.execute(handler.as_ref(), &invocation.input, ctx).await;
            invocation.complete(output).map(|_| true)
        }
    });
    let resolved = join_all(runs).await;

    let mut all_completed = true;
    for (invocation, result) in invocations.iter().zip(&resolved) {
        match result {
            Ok(true) => {
                let output = invocation.output.clone().unwrap_or(Value::Null);
                emit(
                    writer,
                    StreamEvent::tool_output(invocation.tool_call_id.clone(), output),
                )
                .await?;
                if invocation.state != ToolState::Completed {
                    all_completed = false;
                }
            }
            Ok(false) => all_completed = false,
            Err(err) => {
                warn!(tool_call_id = %invocation.tool_call_id, error = %err, "tool call left pending");
                all_completed = false;
            }
        }
    }

    assistant
        .parts
        .extend(invocations.into_iter().map(Part::ToolInvocation));
    Ok(all_completed)
}

async fn emit(writer: &StreamWriter, event: StreamEvent) -> Result<(), AgentError> {
    if writer.write(event).await {
        Ok(())
    } else {
        Err(AgentError::Canceled)
    }
}
