//! Shared test helpers and a scripted model provider.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::{json, Value};

use waypoint::agent::{ChatAgent, ConversationStore, EventStream, InMemoryConversationStore};
use waypoint::error::{AgentError, Result};
use waypoint::provider::{ModelProvider, ModelRequest};
use waypoint::tools::{ToolDefinition, ToolRegistry, ToolSchema};
use waypoint::types::*;

/// One scripted model reply.
#[derive(Debug, Clone)]
pub enum Script {
    /// Stream the text in small chunks, then finish with `stop`.
    Text(String),
    /// Request one tool call.
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
    },
    /// Stream some text, then fail mid-stream.
    FailAfter(String),
    /// Refuse to open the stream.
    Reject(String),
    /// Stream some text, then never finish.
    Hang(String),
}

impl Script {
    pub fn text(text: &str) -> Self {
        Self::Text(text.to_string())
    }

    pub fn tool_call(id: &str, name: &str, arguments: Value) -> Self {
        Self::ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        }
    }
}

/// A provider that replays queued scripts and records every request.
#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with(scripts: Vec<Script>) -> Arc<Self> {
        let provider = Self::default();
        provider.scripts.lock().unwrap().extend(scripts);
        Arc::new(provider)
    }

    pub fn queue(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

fn usage() -> Usage {
    Usage {
        input_tokens: 10,
        output_tokens: 20,
        total_tokens: 30,
    }
}

fn chunks(text: &str) -> Vec<String> {
    text.chars()
        .collect::<Vec<_>>()
        .chunks(5)
        .map(|c| c.iter().collect())
        .collect()
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn model_id(&self) -> &str {
        "scripted-model"
    }

    async fn stream_text(
        &self,
        request: &ModelRequest,
    ) -> Result<BoxStream<'static, Result<ModelDelta>>> {
        self.requests.lock().unwrap().push(request.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Script::text("Mock streamed response"));

        if let Script::Reject(message) = &script {
            return Err(AgentError::api(503, message.clone()));
        }

        let stream = async_stream::stream! {
            match script {
                Script::Text(text) => {
                    for chunk in chunks(&text) {
                        yield Ok(ModelDelta::text(chunk));
                    }
                    yield Ok(ModelDelta::done(FinishReason::Stop, Some(usage())));
                }
                Script::ToolCall { id, name, arguments } => {
                    yield Ok(ModelDelta::tool_call(AgentToolCall { id, name, arguments }));
                    yield Ok(ModelDelta::done(FinishReason::ToolCalls, Some(usage())));
                }
                Script::FailAfter(text) => {
                    yield Ok(ModelDelta::text(text));
                    yield Err(AgentError::Stream("upstream connection reset".into()));
                }
                Script::Hang(text) => {
                    yield Ok(ModelDelta::text(text));
                    futures::future::pending::<()>().await;
                }
                Script::Reject(_) => {}
            }
        };

        Ok(Box::pin(stream))
    }
}

/// Agent over an in-memory store with the given tools.
pub fn agent(provider: Arc<dyn ModelProvider>, registry: ToolRegistry) -> (Arc<ChatAgent>, Arc<InMemoryConversationStore>) {
    let store = Arc::new(InMemoryConversationStore::new());
    let agent = ChatAgent::builder()
        .session_id("test-session")
        .store(Arc::clone(&store) as Arc<dyn ConversationStore>)
        .registry(Arc::new(registry))
        .provider(provider)
        .build();
    (Arc::new(agent), store)
}

/// `getWeatherInformation` needing approval, returning `output` and counting calls,
/// plus an automatic `getLocalTime`.
pub fn weather_registry(calls: Arc<AtomicUsize>, output: Value) -> ToolRegistry {
    let schema = ToolSchema::object()
        .string("city", "City name", true)
        .build();
    ToolRegistry::new()
        .with(ToolDefinition::on_approval(
            "getWeatherInformation",
            "Show the weather in a given city",
            schema,
            move |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
                let output = output.clone();
                async move { Ok(output) }
            },
        ))
        .unwrap()
        .with(ToolDefinition::automatic(
            "getLocalTime",
            "Get the local time for a location",
            ToolSchema::object()
                .string("location", "Location", true)
                .build(),
            |input, _| async move {
                Ok(json!({ "location": input.str("location")?, "time": "10am" }))
            },
        ))
        .unwrap()
}

pub fn pending_weather(id: &str) -> Message {
    Message::assistant(vec![Part::ToolInvocation(ToolInvocation::pending(
        id,
        "getWeatherInformation",
        json!({ "city": "Paris" }),
    ))])
    .with_id(format!("assistant-{id}"))
}

pub async fn collect(stream: EventStream) -> Vec<StreamEvent> {
    stream.collect().await
}

pub fn text_of(events: &[StreamEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::TextDelta { delta, .. } => Some(delta.as_str()),
            _ => None,
        })
        .collect()
}
