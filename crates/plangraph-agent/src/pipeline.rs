use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use plangraph_core::config::AppConfig;
use plangraph_core::error::{GraphError, Result};
use plangraph_core::traits::LlmClient;
use plangraph_llm::Generator;

use crate::checkpoint::{CheckpointStore, MemoryCheckpointStore, SqliteCheckpointStore};
use crate::graph::{Graph, GraphBuilder, GraphExecutor};
use crate::nodes::{names, Architecture, ExtendBrief, PlanBackendTasks, PlanFrontendTasks};

/// extendBrief -> architecture -> {planBackendTasks, planFrontendTasks}
pub fn brief_to_plan_graph() -> std::result::Result<Graph, GraphError> {
    GraphBuilder::new()
        .register(ExtendBrief, &[names::ARCHITECTURE])
        .register(
            Architecture,
            &[names::PLAN_BACKEND_TASKS, names::PLAN_FRONTEND_TASKS],
        )
        .register(PlanBackendTasks, &[])
        .register(PlanFrontendTasks, &[])
        .entry(names::EXTEND_BRIEF)
        .build()
}

/// SQLite store when checkpointing is enabled, an in-memory one otherwise.
pub fn open_checkpoint_store(config: &AppConfig) -> Result<Arc<dyn CheckpointStore>> {
    if config.checkpoint.enabled {
        let path = config.checkpoint_path();
        info!(path = %path.display(), "Opening checkpoint store");
        Ok(Arc::new(SqliteCheckpointStore::open(&path)?))
    } else {
        Ok(Arc::new(MemoryCheckpointStore::new()))
    }
}

/// Wire the brief-to-plan graph to a generator and a checkpoint store.
pub fn brief_to_plan_executor(
    config: &AppConfig,
    llm: Arc<dyn LlmClient>,
    store: Arc<dyn CheckpointStore>,
) -> Result<GraphExecutor> {
    let generator = Generator::new(
        llm,
        config.model.clone(),
        Duration::from_secs(config.pipeline.generation_timeout_secs),
    );
    let graph = brief_to_plan_graph()?;
    Ok(GraphExecutor::new(graph, generator, store).with_fallback_cap(config.pipeline.fallback_cap))
}
