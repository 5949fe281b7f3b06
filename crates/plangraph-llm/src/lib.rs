pub mod generator;
pub mod providers;
pub mod retry;
pub mod streaming;

use plangraph_core::config::{AppConfig, ModelConfig};
use plangraph_core::error::{PlanGraphError, Result};
use plangraph_core::traits::LlmClient;

pub use generator::Generator;
pub use providers::openai::OpenAiClient;
pub use retry::RetryingClient;

/// Create a generator client based on the provider name.
pub fn create_client(config: &ModelConfig) -> Result<Box<dyn LlmClient>> {
    if providers::get_preset(&config.provider).is_some() || config.base_url.is_some() {
        Ok(Box::new(OpenAiClient::new()))
    } else {
        Err(PlanGraphError::UnsupportedProvider(config.provider.clone()))
    }
}

/// Create the client stack for a config: primary model wrapped in retries,
/// with any configured fallback models behind it.
pub fn create_retrying_client(config: &AppConfig) -> Result<Box<dyn LlmClient>> {
    let primary = create_client(&config.model)?;
    let Some(retry) = config.model.retry.clone() else {
        return Ok(primary);
    };

    let mut fallbacks = Vec::new();
    for model in &config.fallback_models {
        fallbacks.push((model.clone(), create_client(model)?));
    }
    Ok(Box::new(RetryingClient::new(primary, fallbacks, retry)))
}
