use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use plangraph_core::config::ModelConfig;
use plangraph_core::error::{PlanGraphError, Result};
use plangraph_core::traits::LlmClient;
use plangraph_core::types::{ChatMessage, GenerateOptions, StreamDelta};

/// The `generate(prompt, options) -> text` contract nodes depend on.
///
/// Wraps a streaming [`LlmClient`] with an explicit model configuration, a
/// per-call timeout and cooperative cancellation. A timeout is an ordinary
/// error for the calling node.
#[derive(Clone)]
pub struct Generator {
    llm: Arc<dyn LlmClient>,
    model: ModelConfig,
    timeout: Duration,
}

impl Generator {
    pub fn new(llm: Arc<dyn LlmClient>, model: ModelConfig, timeout: Duration) -> Self {
        Self {
            llm,
            model,
            timeout,
        }
    }

    pub fn model(&self) -> &ModelConfig {
        &self.model
    }

    /// Send one prompt and collect the streamed text.
    ///
    /// Returns `Cancelled` as soon as `cancel` fires, `GeneratorTimeout` when
    /// the whole call (request and stream) exceeds the timeout. An empty
    /// response is returned as-is; callers resolve it like any other text.
    pub async fn generate(
        &self,
        prompt: &str,
        options: GenerateOptions,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let mut config = self.model.clone();
        if let Some(temperature) = options.temperature {
            config.temperature = temperature;
        }
        if let Some(max_tokens) = options.max_output_tokens {
            config.max_tokens = max_tokens;
        }

        let start = Instant::now();
        let call = self.collect_text(config, prompt);

        let text = tokio::select! {
            _ = cancel.cancelled() => return Err(PlanGraphError::Cancelled),
            result = tokio::time::timeout(self.timeout, call) => match result {
                Ok(inner) => inner?,
                Err(_) => {
                    return Err(PlanGraphError::GeneratorTimeout {
                        timeout_ms: self.timeout.as_millis() as u64,
                    })
                }
            },
        };

        debug!(
            model = %self.model.model_id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            chars = text.len(),
            "Generation complete"
        );

        if text.trim().is_empty() {
            warn!(model = %self.model.model_id, "Generator returned an empty response");
        }
        Ok(text)
    }

    async fn collect_text(&self, config: ModelConfig, prompt: &str) -> Result<String> {
        let messages = vec![ChatMessage::user(prompt)];
        let mut stream = self.llm.chat_stream(&config, messages).await?;

        let mut text = String::new();
        while let Some(delta) = stream.next().await {
            match delta? {
                StreamDelta::TextDelta(chunk) => text.push_str(&chunk),
                StreamDelta::Usage {
                    input_tokens,
                    output_tokens,
                } => debug!(input_tokens, output_tokens, "Generator usage"),
                StreamDelta::Stop(_) | StreamDelta::MessageId(_) => {}
            }
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plangraph_test_utils::MockLlm;

    fn generator(mock: MockLlm, timeout: Duration) -> Generator {
        Generator::new(Arc::new(mock), ModelConfig::default(), timeout)
    }

    #[tokio::test]
    async fn test_generate_collects_stream() {
        let mock = MockLlm::new()
            .respond("architect", "1. Use Postgres\n2. Use Axum")
            .with_chunk_size(3);
        let gen = generator(mock, Duration::from_secs(5));
        let text = gen
            .generate("You are an architect", GenerateOptions::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(text, "1. Use Postgres\n2. Use Axum");
    }

    #[tokio::test]
    async fn test_options_override_model_config() {
        let mock = MockLlm::new().respond("", "ok");
        let log = mock.call_log();
        let gen = generator(mock, Duration::from_secs(5));
        gen.generate(
            "plan",
            GenerateOptions::new().with_temperature(0.3).with_max_output_tokens(4000),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let calls = log.all();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].temperature, 0.3);
        assert_eq!(calls[0].max_tokens, 4000);
    }

    #[tokio::test]
    async fn test_timeout_is_generator_error() {
        let mock = MockLlm::new()
            .respond("", "late")
            .with_delay(Duration::from_millis(500));
        let gen = generator(mock, Duration::from_millis(20));
        let err = gen
            .generate("slow", GenerateOptions::new(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PlanGraphError::GeneratorTimeout { timeout_ms: 20 }));
        assert!(err.to_string().contains("20ms"));
        assert!(err.is_generator_error());
    }

    #[tokio::test]
    async fn test_cancel_aborts_in_flight_call() {
        let mock = MockLlm::new()
            .respond("", "never")
            .with_delay(Duration::from_secs(10));
        let gen = generator(mock, Duration::from_secs(30));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let err = gen
            .generate("anything", GenerateOptions::new(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, PlanGraphError::Cancelled));
    }

    #[tokio::test]
    async fn test_empty_generation_is_returned() {
        let gen = generator(MockLlm::new().respond("", "   "), Duration::from_secs(5));
        let text = gen
            .generate("x", GenerateOptions::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(text, "   ");
    }
}
