//! Model provider trait and implementations.

pub mod format;
pub mod http;

#[cfg(feature = "openai-compatible")]
pub mod openai_compatible;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::types::{GenerationSettings, ModelDelta, ModelMessage};

/// A streaming generation request.
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    pub system: Option<String>,
    pub messages: Vec<ModelMessage>,
    pub tools: Vec<ToolSpec>,
    pub settings: GenerationSettings,
}

/// Tool definition sent to the provider API.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Core trait implemented by model providers.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name (e.g., "openai-compatible").
    fn provider_name(&self) -> &str;
    /// The model ID this provider instance serves.
    fn model_id(&self) -> &str;

    /// Generate text (streaming). Tool calls arrive as whole
    /// [`DeltaKind::ToolCall`](crate::types::DeltaKind::ToolCall) deltas.
    async fn stream_text(
        &self,
        request: &ModelRequest,
    ) -> Result<BoxStream<'static, Result<ModelDelta>>>;
}

/// Create the configured provider.
pub fn create_provider(config: &AgentConfig) -> Result<Arc<dyn ModelProvider>> {
    #[cfg(feature = "openai-compatible")]
    {
        let base_url = config.base_url.clone().ok_or_else(|| {
            AgentError::Configuration("no model endpoint: set WAYPOINT_BASE_URL".into())
        })?;
        Ok(Arc::new(openai_compatible::OpenAiCompatibleProvider::new(
            config.model.clone(),
            config.api_key.clone(),
            base_url,
        )))
    }
    #[cfg(not(feature = "openai-compatible"))]
    {
        let _ = config;
        Err(AgentError::Configuration(
            "built without a provider; enable the openai-compatible feature".into(),
        ))
    }
}
