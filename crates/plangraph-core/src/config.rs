use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PlanGraphError, Result};

/// Top-level plangraph configuration.
///
/// Passed explicitly to the generator and the executor; nothing reads it
/// from a global.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub model: ModelConfig,
    #[serde(default)]
    pub fallback_models: Vec<ModelConfig>,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model_id: default_model_id(),
            api_key: None,
            base_url: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            retry: None,
        }
    }
}

fn default_provider() -> String { "openai".to_string() }
fn default_model_id() -> String { "gpt-4o-mini".to_string() }
fn default_max_tokens() -> u32 { 4096 }
fn default_temperature() -> f32 { 0.2 }

/// Retry configuration for generator requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

/// Pipeline execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Per-call timeout for the generator. A timeout fails the node.
    #[serde(default = "default_generation_timeout")]
    pub generation_timeout_secs: u64,
    /// Maximum number of lines kept by the degraded extraction path.
    #[serde(default = "default_fallback_cap")]
    pub fallback_cap: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            generation_timeout_secs: default_generation_timeout(),
            fallback_cap: default_fallback_cap(),
        }
    }
}

fn default_generation_timeout() -> u64 { 120 }
fn default_fallback_cap() -> usize { 60 }

/// Checkpoint / resume configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Enable on-disk checkpointing (default: true).
    #[serde(default = "default_checkpoint_enabled")]
    pub enabled: bool,
    /// SQLite database path. Default: .plangraph/checkpoints.db
    #[serde(default = "default_checkpoint_path")]
    pub path: String,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: default_checkpoint_enabled(),
            path: default_checkpoint_path(),
        }
    }
}

fn default_checkpoint_enabled() -> bool { true }
fn default_checkpoint_path() -> String { ".plangraph/checkpoints.db".to_string() }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| PlanGraphError::ConfigNotFound(path.display().to_string()))?;

        Self::parse(&content)
    }

    /// Parse config from TOML text, with env var expansion.
    pub fn parse(content: &str) -> Result<Self> {
        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(content);

        toml::from_str(&expanded).map_err(|e| PlanGraphError::Config(e.to_string()))
    }

    /// Build a config from the environment only.
    ///
    /// Reads `OPENAI_API_KEY`, `PLANGRAPH_PROVIDER`, `PLANGRAPH_MODEL` and
    /// `PLANGRAPH_BASE_URL`; everything else uses defaults.
    pub fn from_env() -> Self {
        let mut model = ModelConfig::default();
        if let Ok(provider) = std::env::var("PLANGRAPH_PROVIDER") {
            model.provider = provider;
        }
        if let Ok(model_id) = std::env::var("PLANGRAPH_MODEL") {
            model.model_id = model_id;
        }
        model.base_url = std::env::var("PLANGRAPH_BASE_URL").ok();
        model.api_key = std::env::var("OPENAI_API_KEY").ok();
        model.retry = Some(RetryConfig::default());

        Self {
            model,
            fallback_models: vec![],
            pipeline: PipelineConfig::default(),
            checkpoint: CheckpointConfig::default(),
        }
    }

    /// Resolve the checkpoint database path (expand ~).
    pub fn checkpoint_path(&self) -> PathBuf {
        let path = &self.checkpoint.path;
        if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home) = dirs_home() {
                return home.join(rest);
            }
        }
        PathBuf::from(path)
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
