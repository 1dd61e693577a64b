//! Generic provider for any OpenAI-compatible Chat Completions API.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{AgentError, Result};
use crate::types::{
    AgentToolCall, ContentPart, FinishReason, ModelDelta, ModelMessage, ModelRole, Usage,
};

use super::format::tool_result_to_string;
use super::http::{http_client, json_headers, parse_sse_line, status_to_error, SseLine};
use super::{ModelProvider, ModelRequest};

pub struct OpenAiCompatibleProvider {
    model: String,
    api_key: Option<String>,
    base_url: String,
}

impl OpenAiCompatibleProvider {
    pub fn new(model: String, api_key: Option<String>, base_url: String) -> Self {
        Self {
            model,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn build_request_body(&self, request: &ModelRequest) -> Value {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = request.system.as_deref().filter(|s| !s.is_empty()) {
            messages.push(json!({ "role": "system", "content": system }));
        }
        for message in &request.messages {
            messages.extend(message_to_wire(message));
        }

        let mut body = serde_json::Map::new();
        body.insert("model".into(), self.model.clone().into());
        body.insert("messages".into(), messages.into());
        body.insert("stream".into(), true.into());
        body.insert("stream_options".into(), json!({ "include_usage": true }));

        let settings = &request.settings;
        if let Some(max) = settings.max_tokens {
            body.insert("max_tokens".into(), max.into());
        }
        if let Some(temperature) = settings.temperature {
            body.insert("temperature".into(), temperature.into());
        }
        if let Some(top_p) = settings.top_p {
            body.insert("top_p".into(), top_p.into());
        }
        if let Some(fp) = settings.frequency_penalty {
            body.insert("frequency_penalty".into(), fp.into());
        }
        if let Some(pp) = settings.presence_penalty {
            body.insert("presence_penalty".into(), pp.into());
        }
        if let Some(ref stops) = settings.stop_sequences {
            body.insert("stop".into(), json!(stops));
        }
        if let Some(seed) = settings.seed {
            body.insert("seed".into(), seed.into());
        }

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        }
                    })
                })
                .collect();
            body.insert("tools".into(), tools.into());
        }

        Value::Object(body)
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatibleProvider {
    fn provider_name(&self) -> &str {
        "openai-compatible"
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn stream_text(
        &self,
        request: &ModelRequest,
    ) -> Result<BoxStream<'static, Result<ModelDelta>>> {
        let body = self.build_request_body(request);
        let url = format!("{}/chat/completions", self.base_url);

        debug!(model = %self.model, tools = request.tools.len(), "openai-compatible stream_text");

        let resp = http_client()
            .post(&url)
            .headers(json_headers(self.api_key.as_deref()))
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(status_to_error(status, &body_text));
        }

        let byte_stream = resp.bytes_stream();

        let stream = async_stream::stream! {
            let mut buffer = String::new();
            let mut calls = PendingCalls::default();
            let mut finish: Option<FinishReason> = None;
            let mut usage: Option<Usage> = None;
            futures::pin_mut!(byte_stream);

            'read: while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(AgentError::Network(e));
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim().to_string();
                    buffer.drain(..=line_end);

                    match parse_sse_line(&line) {
                        None => continue,
                        Some(SseLine::Done) => break 'read,
                        Some(SseLine::Data(data)) => {
                            if let Some(message) = error_payload(data) {
                                yield Err(AgentError::Stream(message));
                                return;
                            }
                            let chunk: StreamChunk = match serde_json::from_str(data) {
                                Ok(chunk) => chunk,
                                Err(e) => {
                                    warn!(error = %e, "skipping unparseable stream chunk");
                                    continue;
                                }
                            };
                            if let Some(u) = chunk.usage {
                                usage = Some(Usage {
                                    input_tokens: u.prompt_tokens,
                                    output_tokens: u.completion_tokens,
                                    total_tokens: u.total_tokens,
                                });
                            }
                            for choice in chunk.choices {
                                if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                                    yield Ok(ModelDelta::text(text));
                                }
                                for fragment in choice.delta.tool_calls.unwrap_or_default() {
                                    calls.absorb(fragment);
                                }
                                if let Some(reason) = choice.finish_reason.as_deref() {
                                    finish = Some(FinishReason::from_provider(reason));
                                }
                            }
                        }
                    }
                }
            }

            let assembled = calls.finish();
            let had_calls = !assembled.is_empty();
            for call in assembled {
                yield Ok(ModelDelta::tool_call(call));
            }
            let reason = finish.unwrap_or(if had_calls {
                FinishReason::ToolCalls
            } else {
                FinishReason::Stop
            });
            yield Ok(ModelDelta::done(reason, usage));
        };

        Ok(Box::pin(stream))
    }
}

/// Tool call fragments keyed by their stream index.
#[derive(Default)]
struct PendingCalls {
    by_index: BTreeMap<u32, PartialCall>,
}

#[derive(Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

impl PendingCalls {
    fn absorb(&mut self, fragment: ToolCallFragment) {
        let entry = self.by_index.entry(fragment.index).or_default();
        if let Some(id) = fragment.id {
            entry.id = id;
        }
        if let Some(function) = fragment.function {
            if let Some(name) = function.name {
                entry.name.push_str(&name);
            }
            if let Some(arguments) = function.arguments {
                entry.arguments.push_str(&arguments);
            }
        }
    }

    fn finish(self) -> Vec<AgentToolCall> {
        self.by_index
            .into_iter()
            .map(|(index, call)| {
                let raw = call.arguments.trim();
                let arguments = if raw.is_empty() {
                    json!({})
                } else {
                    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
                };
                AgentToolCall {
                    id: if call.id.is_empty() {
                        format!("call_{index}")
                    } else {
                        call.id
                    },
                    name: call.name,
                    arguments,
                }
            })
            .collect()
    }
}

fn error_payload(data: &str) -> Option<String> {
    let value: Value = serde_json::from_str(data).ok()?;
    let error = value.get("error")?;
    Some(
        error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
    )
}

fn message_to_wire(message: &ModelMessage) -> Vec<Value> {
    match message.role {
        ModelRole::System => vec![json!({ "role": "system", "content": message.text() })],
        ModelRole::User => vec![json!({ "role": "user", "content": message.text() })],
        ModelRole::Tool => message
            .content
            .iter()
            .filter_map(|part| match part {
                ContentPart::ToolResult(result) => Some(json!({
                    "role": "tool",
                    "tool_call_id": result.tool_call_id,
                    "content": tool_result_to_string(&result.result),
                })),
                _ => None,
            })
            .collect(),
        ModelRole::Assistant => {
            let text = message.text();
            let calls: Vec<Value> = message
                .tool_calls()
                .into_iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": call.arguments.to_string(),
                        }
                    })
                })
                .collect();
            let mut wire = json!({ "role": "assistant", "content": text });
            if !calls.is_empty() {
                wire["tool_calls"] = calls.into();
                if text.is_empty() {
                    wire["content"] = Value::Null;
                }
            }
            vec![wire]
        }
    }
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCallFragment>>,
}

#[derive(Deserialize)]
struct ToolCallFragment {
    #[serde(default)]
    index: u32,
    id: Option<String>,
    function: Option<FunctionFragment>,
}

#[derive(Deserialize)]
struct FunctionFragment {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}
