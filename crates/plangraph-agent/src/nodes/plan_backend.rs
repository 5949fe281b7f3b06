use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::info;

use plangraph_core::error::Result;
use plangraph_core::types::GenerateOptions;

use super::{fields, names, plan_tasks, PlanTarget};
use crate::graph::{Node, NodeContext, RunState, StateDiff};

const TARGET: PlanTarget = PlanTarget {
    node: names::PLAN_BACKEND_TASKS,
    tasks_field: fields::BACKEND_TASKS,
    plan_field: fields::BACKEND_PLAN,
    note: "Backend task plan ready.",
};

/// Breaks the analysed brief into a backend epic/story/task plan.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlanBackendTasks;

impl PlanBackendTasks {
    fn prompt(analysis: &str) -> String {
        format!(
            r#"You are a senior backend developer.
Create an execution plan for backend tasks only based on the software architecture below.
Architecture:
{analysis}

Requirements:
- Break down into EPIC -> STORIES -> TASKS (max 3 levels)
- For each task: goal, deliverable, dependencies, estimate (t-shirt size XS|S|M|L|XL)
- Add a "critical path" and "technical risks"
Answer in STRICT JSON matching this schema:
{{
  "epics": [
    {{
      "name": "string",
      "stories": [
        {{
          "name": "string",
          "tasks": [
            {{ "name": "string", "goal": "string", "deliverable": "string", "deps": ["string"], "estimate": "XS|S|M|L|XL" }}
          ]
        }}
      ]
    }}
  ],
  "criticalPath": ["string"],
  "risks": ["string"]
}}"#
        )
    }
}

impl Node for PlanBackendTasks {
    fn name(&self) -> &str {
        names::PLAN_BACKEND_TASKS
    }

    fn invoke(&self, state: Arc<RunState>, ctx: NodeContext) -> BoxFuture<'_, Result<StateDiff>> {
        Box::pin(async move {
            info!(run_id = %ctx.run_id, node = self.name(), "start");
            let analysis = state.get_str(fields::EXPANDED_BRIEF).unwrap_or_default();
            plan_tasks(&ctx, &TARGET, &Self::prompt(analysis), GenerateOptions::new()).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::test_support::context;
    use crate::plan::Plan;
    use plangraph_test_utils::{sample_plan_json, MockLlm};

    fn state() -> Arc<RunState> {
        Arc::new(RunState::from_brief("Build a todo app.").with_field(fields::EXPANDED_BRIEF, "- single user todo list"))
    }

    #[tokio::test]
    async fn test_structured_plan_written() {
        let raw = format!("Sure! Here is the plan:\n```json\n{}\n```", sample_plan_json());
        let mock = MockLlm::new().respond("senior backend developer", raw);
        let log = mock.call_log();
        let diff = PlanBackendTasks.invoke(state(), context(mock)).await.unwrap();

        let tasks: Vec<String> = serde_json::from_value(diff.get(fields::BACKEND_TASKS).cloned().unwrap()).unwrap();
        assert_eq!(tasks, vec!["Schema migrations", "Todo repository", "REST endpoints"]);
        let plan: Plan = serde_json::from_value(diff.get(fields::BACKEND_PLAN).cloned().unwrap()).unwrap();
        assert_eq!(plan.risks.len(), 1);
        assert_eq!(diff.notes(), &["Backend task plan ready."]);

        // prompt is built from the expanded brief
        assert_eq!(log.count_containing("- single user todo list"), 1);
    }

    #[tokio::test]
    async fn test_prose_degrades_to_lines() {
        let prose: String = (1..=80).map(|i| format!("- Step {}: do something\n", i)).collect();
        let diff = PlanBackendTasks
            .invoke(state(), context(MockLlm::new().respond("", prose)))
            .await
            .unwrap();

        let tasks = diff.get(fields::BACKEND_TASKS).and_then(|v| v.as_array()).unwrap();
        assert_eq!(tasks.len(), 60);
        assert_eq!(tasks[0], "Step 1: do something");
        assert!(diff.get(fields::BACKEND_PLAN).is_none());
        assert_eq!(diff.notes(), &["Backend task plan ready."]);
    }

    #[tokio::test]
    async fn test_missing_expanded_brief_uses_empty_text() {
        let mock = MockLlm::new().respond("", sample_plan_json());
        let log = mock.call_log();
        PlanBackendTasks
            .invoke(Arc::new(RunState::new()), context(mock))
            .await
            .unwrap();
        assert!(log.all()[0].prompt.contains("Architecture:\n\n\nRequirements:"));
    }
}
