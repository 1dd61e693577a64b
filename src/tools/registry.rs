//! Tool registry: name -> {schema, optional executor}.
//!
//! A tool whose executor is not [`ToolExecutor::Automatic`] needs a human
//! decision before it can produce a result. Lookup is by exact name; a
//! missing entry is an ordinary outcome callers handle, not an error.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, OnceLock};

use futures::future::BoxFuture;
use regex::Regex;
use serde_json::{json, Value};
use tracing::warn;

use super::arguments::ToolInput;
use super::types::ToolSchema;
use super::validation::validate_input;
use crate::error::{AgentError, Result};
use crate::provider::ToolSpec;

/// Context available during tool execution.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub session_id: String,
    pub tool_call_id: String,
}

/// Boxed async tool body.
pub type ToolHandler =
    dyn Fn(ToolInput, ToolContext) -> BoxFuture<'static, Result<Value>> + Send + Sync;

/// How a tool may be executed.
#[derive(Clone)]
pub enum ToolExecutor {
    /// Runs as soon as the model calls it.
    Automatic(Arc<ToolHandler>),
    /// Runs only after a human approved the call.
    OnApproval(Arc<ToolHandler>),
}

pub struct ToolDefinition {
    name: String,
    description: String,
    schema: ToolSchema,
    executor: Option<ToolExecutor>,
}

fn boxed<F, Fut>(handler: F) -> Arc<ToolHandler>
where
    F: Fn(ToolInput, ToolContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(move |input, ctx| Box::pin(handler(input, ctx)))
}

impl ToolDefinition {
    /// A tool that executes without confirmation.
    pub fn automatic<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: ToolSchema,
        handler: F,
    ) -> Self
    where
        F: Fn(ToolInput, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            executor: Some(ToolExecutor::Automatic(boxed(handler))),
        }
    }

    /// A confirmation-required tool that runs `handler` once approved.
    pub fn on_approval<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: ToolSchema,
        handler: F,
    ) -> Self
    where
        F: Fn(ToolInput, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            executor: Some(ToolExecutor::OnApproval(boxed(handler))),
        }
    }

    /// A confirmation-required tool with no executor at all.
    pub fn schema_only(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: ToolSchema,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            executor: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    pub fn requires_confirmation(&self) -> bool {
        !matches!(self.executor, Some(ToolExecutor::Automatic(_)))
    }

    /// The handler that may run without a human decision.
    pub fn automatic_handler(&self) -> Option<Arc<ToolHandler>> {
        match &self.executor {
            Some(ToolExecutor::Automatic(handler)) => Some(handler.clone()),
            _ => None,
        }
    }

    /// The handler to run after an explicit approval.
    pub fn approved_handler(&self) -> Option<Arc<ToolHandler>> {
        match &self.executor {
            Some(ToolExecutor::Automatic(handler)) | Some(ToolExecutor::OnApproval(handler)) => {
                Some(handler.clone())
            }
            None => None,
        }
    }

    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.schema.schema.clone(),
        }
    }

    /// Validate `input` and run `handler`, folding every failure into an
    /// error-shaped output.
    pub async fn execute(&self, handler: &ToolHandler, input: &Value, ctx: ToolContext) -> Value {
        if let Err(violation) = validate_input(input, &self.schema.schema) {
            warn!(
                tool_name = %self.name,
                tool_call_id = %ctx.tool_call_id,
                %violation,
                "tool input rejected by schema"
            );
            return error_output(format!("Invalid input for tool '{}': {violation}", self.name));
        }
        let tool_call_id = ctx.tool_call_id.clone();
        match handler(ToolInput::new(input.clone()), ctx).await {
            Ok(output) => output,
            Err(err) => {
                warn!(tool_name = %self.name, %tool_call_id, error = %err, "tool execution failed");
                error_output(err.to_string())
            }
        }
    }
}

impl std::fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("requires_confirmation", &self.requires_confirmation())
            .finish()
    }
}

/// `{"error": message}`, the shape of every synthetic failure result.
pub fn error_output(message: impl Into<String>) -> Value {
    json!({ "error": message.into() })
}

fn valid_name(name: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("valid tool name pattern"))
        .is_match(name)
}

/// Registered tools, ordered by name.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<ToolDefinition>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool. Names must be unique and provider-safe.
    pub fn register(&mut self, tool: ToolDefinition) -> Result<()> {
        if !valid_name(&tool.name) {
            return Err(AgentError::InvalidArgument(format!(
                "invalid tool name '{}'",
                tool.name
            )));
        }
        if self.tools.contains_key(&tool.name) {
            return Err(AgentError::InvalidArgument(format!(
                "tool '{}' is already registered",
                tool.name
            )));
        }
        self.tools.insert(tool.name.clone(), Arc::new(tool));
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, tool: ToolDefinition) -> Result<Self> {
        self.register(tool)?;
        Ok(self)
    }

    /// Register every tool of `other`, rejecting name clashes.
    pub fn merge(&mut self, other: ToolRegistry) -> Result<()> {
        for (name, tool) in other.tools {
            if self.tools.contains_key(&name) {
                return Err(AgentError::InvalidArgument(format!(
                    "tool '{name}' is already registered"
                )));
            }
            self.tools.insert(name, tool);
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<ToolDefinition>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions sent to the model.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|tool| tool.spec()).collect()
    }
}
