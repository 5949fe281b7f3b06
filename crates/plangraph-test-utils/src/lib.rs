//! Test doubles and fixtures shared by the plangraph crates.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;

use plangraph_core::config::ModelConfig;
use plangraph_core::error::{PlanGraphError, Result};
use plangraph_core::traits::LlmClient;
use plangraph_core::types::{ChatMessage, StopReason, StreamDelta};

enum Outcome {
    Text(String),
    Fail(String),
}

struct Rule {
    pattern: String,
    outcome: Outcome,
}

/// Shared count of `chat_stream` calls.
#[derive(Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Tracks how many calls are in flight at once and the peak seen.
#[derive(Clone, Default)]
pub struct InFlight(Arc<InFlightCounts>);

#[derive(Default)]
struct InFlightCounts {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    /// Highest number of calls that were awaiting a response together.
    pub fn peak(&self) -> usize {
        self.0.peak.load(Ordering::SeqCst)
    }

    fn enter(&self) -> InFlightGuard {
        let now = self.0.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.0.peak.fetch_max(now, Ordering::SeqCst);
        InFlightGuard(self.0.clone())
    }
}

struct InFlightGuard(Arc<InFlightCounts>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One recorded generator call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Shared log of every call the mock received, in arrival order.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<RecordedCall>>>);

impl CallLog {
    pub fn all(&self) -> Vec<RecordedCall> {
        self.0.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    /// Number of calls whose prompt contains `needle`.
    pub fn count_containing(&self, needle: &str) -> usize {
        self.all()
            .iter()
            .filter(|c| c.prompt.contains(needle))
            .count()
    }
}

/// Scripted generator.
///
/// Rules are checked in insertion order; the first whose pattern occurs in
/// the prompt decides the outcome. An empty pattern matches every prompt.
/// Responses are streamed back in chunks of `chunk_size` characters.
pub struct MockLlm {
    rules: Vec<Rule>,
    fail_first: Option<(usize, String)>,
    default_response: String,
    delay: Option<Duration>,
    chunk_size: usize,
    calls: CallCounter,
    log: CallLog,
    in_flight: InFlight,
}

impl MockLlm {
    pub fn new() -> Self {
        Self {
            rules: vec![],
            fail_first: None,
            default_response: "mock response".to_string(),
            delay: None,
            chunk_size: 16,
            calls: CallCounter::default(),
            log: CallLog::default(),
            in_flight: InFlight::default(),
        }
    }

    /// Answer prompts containing `pattern` with `response`.
    pub fn respond(mut self, pattern: impl Into<String>, response: impl Into<String>) -> Self {
        self.rules.push(Rule {
            pattern: pattern.into(),
            outcome: Outcome::Text(response.into()),
        });
        self
    }

    /// Fail prompts containing `pattern` with a request error.
    pub fn fail_on(mut self, pattern: impl Into<String>, message: impl Into<String>) -> Self {
        self.rules.push(Rule {
            pattern: pattern.into(),
            outcome: Outcome::Fail(message.into()),
        });
        self
    }

    /// Fail the first `n` calls, whatever the prompt.
    pub fn fail_first(mut self, n: usize, message: impl Into<String>) -> Self {
        self.fail_first = Some((n, message.into()));
        self
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    pub fn call_counter(&self) -> CallCounter {
        self.calls.clone()
    }

    pub fn call_log(&self) -> CallLog {
        self.log.clone()
    }

    /// Concurrency tracker covering the time each call spends before it
    /// starts streaming (including the configured delay).
    pub fn in_flight(&self) -> InFlight {
        self.in_flight.clone()
    }

    fn outcome_for(&self, prompt: &str) -> std::result::Result<String, String> {
        for rule in &self.rules {
            if prompt.contains(&rule.pattern) {
                return match &rule.outcome {
                    Outcome::Text(text) => Ok(text.clone()),
                    Outcome::Fail(msg) => Err(msg.clone()),
                };
            }
        }
        Ok(self.default_response.clone())
    }

    fn chunks(&self, text: &str) -> Vec<Result<StreamDelta>> {
        let chars: Vec<char> = text.chars().collect();
        let mut deltas: Vec<Result<StreamDelta>> = chars
            .chunks(self.chunk_size)
            .map(|c| Ok(StreamDelta::TextDelta(c.iter().collect())))
            .collect();
        deltas.push(Ok(StreamDelta::Stop(StopReason::EndTurn)));
        deltas
    }
}

impl Default for MockLlm {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmClient for MockLlm {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let prompt = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let temperature = config.temperature;
        let max_tokens = config.max_tokens;

        Box::pin(async move {
            let index = self.calls.0.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut log) = self.log.0.lock() {
                log.push(RecordedCall {
                    prompt: prompt.clone(),
                    temperature,
                    max_tokens,
                });
            }

            let _in_flight = self.in_flight.enter();
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            if let Some((n, msg)) = &self.fail_first {
                if index < *n {
                    return Err(PlanGraphError::GeneratorRequest(msg.clone()));
                }
            }

            match self.outcome_for(&prompt) {
                Ok(text) => {
                    let deltas = self.chunks(&text);
                    Ok(Box::pin(futures::stream::iter(deltas)) as BoxStream<'_, Result<StreamDelta>>)
                }
                Err(msg) => Err(PlanGraphError::GeneratorRequest(msg)),
            }
        })
    }
}

/// A well-formed plan payload with two epics and dependency references.
pub fn sample_plan_json() -> String {
    serde_json::json!({
        "epics": [
            {
                "name": "Core API",
                "stories": [
                    {
                        "name": "Persistence",
                        "tasks": [
                            {
                                "name": "Schema migrations",
                                "goal": "Create todo tables",
                                "deliverable": "SQL migration files",
                                "deps": [],
                                "estimate": "S"
                            },
                            {
                                "name": "Todo repository",
                                "goal": "CRUD access layer",
                                "deliverable": "repository module with tests",
                                "deps": ["Schema migrations"],
                                "estimate": "M"
                            }
                        ]
                    }
                ]
            },
            {
                "name": "Delivery",
                "stories": [
                    {
                        "name": "HTTP surface",
                        "tasks": [
                            {
                                "name": "REST endpoints",
                                "goal": "Expose todos over HTTP",
                                "deliverable": "handlers and routes",
                                "deps": ["Todo repository"],
                                "estimate": "L"
                            }
                        ]
                    }
                ]
            }
        ],
        "criticalPath": ["Schema migrations", "Todo repository", "REST endpoints"],
        "risks": ["Schema churn during early iterations"]
    })
    .to_string()
}

/// A temporary directory and a database path inside it.
///
/// Keep the `TempDir` alive for as long as the path is used.
pub fn temp_db_path() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("checkpoints.db");
    (dir, path)
}
