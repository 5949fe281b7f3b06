use std::sync::Arc;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use plangraph_core::error::Result;
use plangraph_core::types::{GenerateOptions, RunId};
use plangraph_llm::Generator;

use super::state::{RunState, StateDiff};

/// A named unit of work in the graph.
///
/// A node reads an immutable snapshot of the run state, performs zero or
/// more generation calls, and returns the fields and notes it wants merged.
/// It never mutates shared state directly.
pub trait Node: Send + Sync {
    /// Unique name within the graph. Also the key recorded in checkpoints.
    fn name(&self) -> &str;

    fn invoke(&self, state: Arc<RunState>, ctx: NodeContext) -> BoxFuture<'_, Result<StateDiff>>;
}

/// Per-invocation handles a node needs: the generator, the run's cancel
/// token and the resolver's line cap.
#[derive(Clone)]
pub struct NodeContext {
    pub run_id: RunId,
    pub generator: Generator,
    pub cancel: CancellationToken,
    pub fallback_cap: usize,
}

impl NodeContext {
    /// Generate text, observing the run's cancellation token.
    pub async fn generate(&self, prompt: &str, options: GenerateOptions) -> Result<String> {
        self.generator.generate(prompt, options, &self.cancel).await
    }
}
