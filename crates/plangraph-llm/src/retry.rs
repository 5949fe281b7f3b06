use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tracing::{info, warn};

use plangraph_core::config::{ModelConfig, RetryConfig};
use plangraph_core::error::{PlanGraphError, Result};
use plangraph_core::traits::LlmClient;
use plangraph_core::types::*;

/// A generator client that retries transient failures within one call and
/// then falls back to alternative models.
///
/// Retries never outlive the call: nothing is persisted between attempts.
pub struct RetryingClient {
    primary: Box<dyn LlmClient>,
    fallbacks: Vec<(ModelConfig, Box<dyn LlmClient>)>,
    retry_config: RetryConfig,
}

impl RetryingClient {
    pub fn new(
        primary: Box<dyn LlmClient>,
        fallbacks: Vec<(ModelConfig, Box<dyn LlmClient>)>,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            primary,
            fallbacks,
            retry_config,
        }
    }
}

/// Transient generator failures: rate limits, 5xx, timeouts, dropped streams.
pub fn is_retryable(e: &PlanGraphError) -> bool {
    match e {
        PlanGraphError::GeneratorRequest(msg) => {
            msg.contains("429")
                || msg.contains("500")
                || msg.contains("502")
                || msg.contains("503")
                || msg.contains("timeout")
                || msg.contains("connection")
        }
        PlanGraphError::GeneratorStream(_) => true,
        _ => false,
    }
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_backoff_ms);
    // Add jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl LlmClient for RetryingClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let config = config.clone();

        Box::pin(async move {
            let max_retries = self.retry_config.max_retries;

            let mut last_err = None;
            for attempt in 0..=max_retries {
                match self.primary.chat_stream(&config, messages.clone()).await {
                    Ok(stream) => return Ok(stream),
                    Err(e) => {
                        if is_retryable(&e) && attempt < max_retries {
                            let backoff = calculate_backoff(attempt, &self.retry_config);
                            warn!(
                                attempt = attempt + 1,
                                max_retries,
                                backoff_ms = backoff.as_millis() as u64,
                                error = %e,
                                "Retrying generator request"
                            );
                            tokio::time::sleep(backoff).await;
                            last_err = Some(e);
                            continue;
                        }
                        last_err = Some(e);
                        break;
                    }
                }
            }

            if !self.fallbacks.is_empty() {
                info!("Primary model exhausted, trying fallback models");
            }
            for (fb_config, fb_client) in &self.fallbacks {
                match fb_client.chat_stream(fb_config, messages.clone()).await {
                    Ok(stream) => {
                        info!(
                            model = %fb_config.model_id,
                            provider = %fb_config.provider,
                            "Fell back to alternative model"
                        );
                        return Ok(stream);
                    }
                    Err(e) => {
                        warn!(model = %fb_config.model_id, error = %e, "Fallback model also failed");
                    }
                }
            }

            Err(last_err
                .unwrap_or_else(|| PlanGraphError::GeneratorRequest("All providers failed".into())))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use plangraph_test_utils::MockLlm;

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    async fn collect(client: &RetryingClient) -> Result<String> {
        let mut stream = client
            .chat_stream(&ModelConfig::default(), vec![ChatMessage::user("hi")])
            .await?;
        let mut out = String::new();
        while let Some(delta) = stream.next().await {
            if let StreamDelta::TextDelta(t) = delta? {
                out.push_str(&t);
            }
        }
        Ok(out)
    }

    #[test]
    fn test_retryable_classification() {
        assert!(is_retryable(&PlanGraphError::GeneratorRequest("HTTP 429 Too Many".into())));
        assert!(is_retryable(&PlanGraphError::GeneratorStream("reset".into())));
        assert!(!is_retryable(&PlanGraphError::GeneratorRequest("HTTP 401".into())));
        assert!(!is_retryable(&PlanGraphError::Cancelled));
    }

    #[test]
    fn test_backoff_is_capped() {
        let cfg = RetryConfig {
            max_retries: 10,
            initial_backoff_ms: 1000,
            max_backoff_ms: 5000,
        };
        assert!(calculate_backoff(9, &cfg) <= Duration::from_millis(6000));
        assert!(calculate_backoff(0, &cfg) >= Duration::from_millis(800));
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let mock = MockLlm::new().fail_first(2, "HTTP 503 unavailable").respond("", "ok");
        let calls = mock.call_counter();
        let client = RetryingClient::new(Box::new(mock), vec![], fast_retry(3));

        assert_eq!(collect(&client).await.unwrap(), "ok");
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn test_fatal_error_not_retried() {
        let mock = MockLlm::new().fail_first(5, "HTTP 401 unauthorized");
        let calls = mock.call_counter();
        let client = RetryingClient::new(Box::new(mock), vec![], fast_retry(3));

        let err = collect(&client).await.unwrap_err();
        assert!(err.to_string().contains("401"));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn test_falls_back_after_exhaustion() {
        let primary = MockLlm::new().fail_first(10, "HTTP 500");
        let fallback = MockLlm::new().respond("", "from fallback");
        let client = RetryingClient::new(
            Box::new(primary),
            vec![(ModelConfig::default(), Box::new(fallback))],
            fast_retry(1),
        );
        assert_eq!(collect(&client).await.unwrap(), "from fallback");
    }
}
