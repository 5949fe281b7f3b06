//! The brief-to-plan nodes.
//!
//! Each node differs only in the prompt it builds, whether it asks for free
//! text or a structured plan, and which fields it writes.

mod architecture;
mod extend_brief;
mod plan_backend;
mod plan_frontend;

pub use architecture::Architecture;
pub use extend_brief::ExtendBrief;
pub use plan_backend::PlanBackendTasks;
pub use plan_frontend::PlanFrontendTasks;

use tracing::{info, warn};

use plangraph_core::error::Result;
use plangraph_core::types::GenerateOptions;

use crate::graph::{NodeContext, StateDiff};
use crate::plan::Plan;
use crate::resolver::{Resolved, StructuredOutputResolver};

/// Node names, as registered in the graph and recorded in checkpoints.
pub mod names {
    pub const EXTEND_BRIEF: &str = "extendBrief";
    pub const ARCHITECTURE: &str = "architecture";
    pub const PLAN_BACKEND_TASKS: &str = "planBackendTasks";
    pub const PLAN_FRONTEND_TASKS: &str = "planFrontendTasks";
}

/// Run state field names.
pub mod fields {
    pub const BRIEF: &str = "brief";
    pub const EXPANDED_BRIEF: &str = "expandedBrief";
    pub const ARCHITECTURE_DESIGN: &str = "architectureDesign";
    pub const BACKEND_TASKS: &str = "backendTasks";
    pub const BACKEND_PLAN: &str = "backendPlan";
    pub const FRONTEND_TASKS: &str = "frontendTasks";
    pub const FRONTEND_PLAN: &str = "frontendPlan";
}

/// Where a planning node writes its output.
pub(crate) struct PlanTarget {
    pub node: &'static str,
    pub tasks_field: &'static str,
    pub plan_field: &'static str,
    pub note: &'static str,
}

/// Generate a plan and resolve it. The task list is the flattened task
/// names on the structured path and the cleaned lines otherwise; the plan
/// itself is only written when it validated.
pub(crate) async fn plan_tasks(
    ctx: &NodeContext,
    target: &PlanTarget,
    prompt: &str,
    options: GenerateOptions,
) -> Result<StateDiff> {
    let raw = ctx.generate(prompt, options).await?;
    let resolver = StructuredOutputResolver::new(ctx.fallback_cap);

    let diff = match resolver.resolve::<Plan>(&raw, &Plan::schema()) {
        Resolved::Structured(plan) => {
            let tasks = plan.task_names();
            info!(
                run_id = %ctx.run_id,
                node = target.node,
                epics = plan.epic_count(),
                tasks = tasks.len(),
                "Produced structured plan"
            );
            StateDiff::new()
                .with_field(target.tasks_field, tasks)
                .with_serialized(target.plan_field, &plan)?
        }
        Resolved::Degraded(lines) => {
            warn!(
                run_id = %ctx.run_id,
                node = target.node,
                tasks = lines.len(),
                "Plan output did not validate, using line fallback"
            );
            StateDiff::new().with_field(target.tasks_field, lines)
        }
    };
    Ok(diff.with_note(target.note))
}
