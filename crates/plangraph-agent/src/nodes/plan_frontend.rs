use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::info;

use plangraph_core::error::Result;
use plangraph_core::types::GenerateOptions;

use super::{fields, names, plan_tasks, PlanTarget};
use crate::graph::{Node, NodeContext, RunState, StateDiff};

const TARGET: PlanTarget = PlanTarget {
    node: names::PLAN_FRONTEND_TASKS,
    tasks_field: fields::FRONTEND_TASKS,
    plan_field: fields::FRONTEND_PLAN,
    note: "Frontend task plan ready.",
};

const TEMPERATURE: f32 = 0.3;
const MAX_OUTPUT_TOKENS: u32 = 4000;

/// Breaks the analysed brief into a frontend epic/story/task plan.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlanFrontendTasks;

impl PlanFrontendTasks {
    fn prompt(analysis: &str) -> String {
        format!(
            r#"You are a senior frontend engineer creating a detailed implementation plan.
Architecture and technical requirements:
{analysis}

IMPORTANT - Structure Guidelines:
Create 2-4 EPICs maximum. Each EPIC contains multiple STORIES. Each STORY contains multiple TASKS.
The hierarchy is strictly: EPIC > STORY > TASK (exactly 3 levels, no more, no less).

Example structure:
Epic 1: "User Interface Setup"
  Story 1.1: "Authentication UI"
    Task 1.1.1: "Create LoginForm component"
    Task 1.1.2: "Implement auth state management"
  Story 1.2: "Dashboard Layout"
    Task 1.2.1: "Create main dashboard component"

Requirements for each task:
- goal: Technical objective (e.g., "Implement authentication flow with JWT token management")
- deliverable: Concrete output (e.g., "LoginForm.tsx component with unit tests", "auth API client module")
- deps: List of task names this depends on (e.g., ["API client setup", "Auth store created"])
- estimate: XS=1-2h, S=2-4h, M=1d, L=2-3d, XL=1week

Focus areas:
- Component architecture (atomic design, composition patterns)
- State management setup (Redux, Zustand, Context, etc.)
- Routing and navigation structure
- API client implementation and data fetching (REST/GraphQL client)
- Form handling and validation
- Authentication/authorization UI flow
- Error handling and loading states
- Responsive design and cross-browser compatibility
- Performance optimization (code splitting, lazy loading, memoization)
- Accessibility (WCAG compliance, ARIA attributes, keyboard navigation)
- Testing (unit tests, integration tests, e2e tests)
- Build configuration and optimization

Also provide:
- criticalPath: Array of task names on the critical path
- risks: Array of technical risks identified

Answer in STRICT JSON with the keys "epics", "criticalPath" and "risks".
Each epic has "name" and "stories"; each story has "name" and "tasks";
each task has "name", "goal", "deliverable", "deps" and "estimate" (XS|S|M|L|XL)."#
        )
    }
}

impl Node for PlanFrontendTasks {
    fn name(&self) -> &str {
        names::PLAN_FRONTEND_TASKS
    }

    fn invoke(&self, state: Arc<RunState>, ctx: NodeContext) -> BoxFuture<'_, Result<StateDiff>> {
        Box::pin(async move {
            info!(run_id = %ctx.run_id, node = self.name(), "start");
            let analysis = state.get_str(fields::EXPANDED_BRIEF).unwrap_or_default();
            let options = GenerateOptions::new()
                .with_temperature(TEMPERATURE)
                .with_max_output_tokens(MAX_OUTPUT_TOKENS);
            plan_tasks(&ctx, &TARGET, &Self::prompt(analysis), options).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::test_support::context;
    use plangraph_test_utils::{sample_plan_json, MockLlm};

    #[tokio::test]
    async fn test_uses_frontend_generation_options() {
        let mock = MockLlm::new().respond("senior frontend engineer", sample_plan_json());
        let log = mock.call_log();
        let diff = PlanFrontendTasks
            .invoke(
                Arc::new(RunState::new().with_field(fields::EXPANDED_BRIEF, "- SPA")),
                context(mock),
            )
            .await
            .unwrap();

        let calls = log.all();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].temperature, 0.3);
        assert_eq!(calls[0].max_tokens, 4000);
        assert!(diff.get(fields::FRONTEND_PLAN).is_some());
        assert_eq!(diff.notes(), &["Frontend task plan ready."]);
    }

    #[tokio::test]
    async fn test_degraded_output_has_no_plan() {
        let diff = PlanFrontendTasks
            .invoke(
                Arc::new(RunState::new()),
                context(MockLlm::new().respond("", "1. Set up Vite\n2. Add router")),
            )
            .await
            .unwrap();
        assert_eq!(
            diff.get(fields::FRONTEND_TASKS).cloned().unwrap(),
            serde_json::json!(["Set up Vite", "Add router"])
        );
        assert!(diff.get(fields::FRONTEND_PLAN).is_none());
    }
}
