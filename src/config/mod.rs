//! Configuration (layered: defaults < TOML file < environment).

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{AgentError, Result};
use crate::types::GenerationSettings;

pub const DEFAULT_MODEL: &str = "@cf/meta/llama-3.1-8b-instruct";

/// Runtime configuration for the agent and its server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub model: String,
    /// OpenAI-compatible endpoint, e.g. `http://localhost:11434/v1`.
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub temperature: f64,
    pub frequency_penalty: f64,
    pub max_tokens: Option<u32>,
    pub max_steps: usize,
    pub system_prompt: Option<String>,
    pub host: String,
    pub port: u16,
    /// Where session histories are written. `None` keeps them in memory.
    pub data_dir: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            base_url: None,
            api_key: None,
            temperature: 0.3,
            frequency_penalty: 0.5,
            max_tokens: None,
            max_steps: 1,
            system_prompt: None,
            host: "127.0.0.1".to_string(),
            port: 8787,
            data_dir: None,
        }
    }
}

impl AgentConfig {
    /// Read a TOML file; missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| {
            AgentError::Configuration(format!("invalid config {}: {e}", path.display()))
        })
    }

    /// Full resolution: `.env`, then the file at `path` (or the default
    /// location if it exists), then `WAYPOINT_*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv(); // .env is optional

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.apply_env_from(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overlay values from an environment lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(model) = get("WAYPOINT_MODEL") {
            self.model = model;
        }
        if let Some(url) = get("WAYPOINT_BASE_URL") {
            self.base_url = Some(url);
        }
        if let Some(key) = get("WAYPOINT_API_KEY").or_else(|| get("OPENAI_API_KEY")) {
            self.api_key = Some(key);
        }
        if let Some(raw) = get("WAYPOINT_TEMPERATURE") {
            self.temperature = parse_number("WAYPOINT_TEMPERATURE", &raw)?;
        }
        if let Some(raw) = get("WAYPOINT_FREQUENCY_PENALTY") {
            self.frequency_penalty = parse_number("WAYPOINT_FREQUENCY_PENALTY", &raw)?;
        }
        if let Some(raw) = get("WAYPOINT_MAX_STEPS") {
            self.max_steps = parse_number("WAYPOINT_MAX_STEPS", &raw)?;
        }
        if let Some(host) = get("WAYPOINT_HOST") {
            self.host = host;
        }
        if let Some(raw) = get("WAYPOINT_PORT") {
            self.port = parse_number("WAYPOINT_PORT", &raw)?;
        }
        if let Some(dir) = get("WAYPOINT_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    /// Sampling settings passed to the model on every turn.
    pub fn generation_settings(&self) -> GenerationSettings {
        GenerationSettings::builder()
            .temperature(self.temperature)
            .frequency_penalty(self.frequency_penalty)
            .maybe_max_tokens(self.max_tokens)
            .build()
    }
}

/// `config.toml` in the platform config directory.
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "waypoint", "waypoint")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

fn parse_number<T>(key: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| AgentError::Configuration(format!("{key}={raw:?} is not valid: {e}")))
}
