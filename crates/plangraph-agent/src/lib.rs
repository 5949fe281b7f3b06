pub mod checkpoint;
pub mod graph;
pub mod nodes;
pub mod pipeline;
pub mod plan;
pub mod report;
pub mod resolver;

pub use checkpoint::{Checkpoint, CheckpointStore, MemoryCheckpointStore, SqliteCheckpointStore};
pub use graph::{
    ExecutionResult, Graph, GraphBuilder, GraphExecutor, Node, NodeContext, NodeResult, RunState,
    StateDiff,
};
pub use pipeline::{brief_to_plan_executor, brief_to_plan_graph, open_checkpoint_store};
pub use plan::{Epic, Estimate, Plan, Story, Task};
pub use report::MarkdownReport;
pub use resolver::{Resolved, Schema, StructuredOutputResolver};
