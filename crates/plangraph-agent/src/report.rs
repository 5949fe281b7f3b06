use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::graph::RunState;
use crate::nodes::fields;
use crate::plan::Plan;

/// Renders a finished run as a Markdown implementation plan.
///
/// Missing fields are skipped rather than reported; rendering never fails.
pub struct MarkdownReport {
    generated_at: DateTime<Utc>,
}

impl Default for MarkdownReport {
    fn default() -> Self {
        Self::new()
    }
}

struct Side {
    plan: Option<Plan>,
    tasks: Vec<String>,
}

impl Side {
    fn read(state: &RunState, plan_field: &str, tasks_field: &str) -> Self {
        Self {
            plan: state.get_as(plan_field),
            tasks: state.get_strings(tasks_field),
        }
    }

    fn epics(&self) -> usize {
        self.plan.as_ref().map_or(0, Plan::epic_count)
    }

    fn stories(&self) -> usize {
        self.plan.as_ref().map_or(0, Plan::story_count)
    }
}

impl MarkdownReport {
    pub fn new() -> Self {
        Self {
            generated_at: Utc::now(),
        }
    }

    /// Fix the timestamp printed in the header.
    pub fn with_timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.generated_at = at;
        self
    }

    pub fn render(&self, state: &RunState) -> String {
        let backend = Side::read(state, fields::BACKEND_PLAN, fields::BACKEND_TASKS);
        let frontend = Side::read(state, fields::FRONTEND_PLAN, fields::FRONTEND_TASKS);
        let mut out = String::new();

        out.push_str("# Technical Implementation Plan\n\n");
        let _ = writeln!(out, "**Generated:** {}\n", self.generated_at.format("%Y-%m-%d %H:%M:%S UTC"));
        out.push_str("---\n\n");

        out.push_str("## Table of Contents\n\n");
        out.push_str("1. [Original Brief](#original-brief)\n");
        out.push_str("2. [Technical Analysis](#technical-analysis)\n");
        out.push_str("3. [System Architecture](#system-architecture)\n");
        out.push_str("4. [Backend Implementation Plan](#backend-implementation-plan)\n");
        out.push_str("5. [Frontend Implementation Plan](#frontend-implementation-plan)\n");
        out.push_str("6. [Summary](#summary)\n\n");
        out.push_str("---\n\n");

        for (title, field) in [
            ("Original Brief", fields::BRIEF),
            ("Technical Analysis", fields::EXPANDED_BRIEF),
            ("System Architecture", fields::ARCHITECTURE_DESIGN),
        ] {
            if let Some(text) = state.get_str(field).filter(|t| !t.trim().is_empty()) {
                let _ = writeln!(out, "## {}\n\n{}\n\n---\n", title, text.trim_end());
            }
        }

        render_side(&mut out, "Backend Implementation Plan", &backend);
        render_side(&mut out, "Frontend Implementation Plan", &frontend);

        out.push_str("## Summary\n\n");
        for (label, side) in [("Backend", &backend), ("Frontend", &frontend)] {
            let _ = writeln!(out, "### {}", label);
            let _ = writeln!(out, "- **Epics:** {}", side.epics());
            let _ = writeln!(out, "- **Stories:** {}", side.stories());
            let _ = writeln!(out, "- **Tasks:** {}\n", side.tasks.len());
        }
        out.push_str("### Total\n");
        let _ = writeln!(out, "- **Epics:** {}", backend.epics() + frontend.epics());
        let _ = writeln!(out, "- **Stories:** {}", backend.stories() + frontend.stories());
        let _ = writeln!(out, "- **Tasks:** {}", backend.tasks.len() + frontend.tasks.len());

        out
    }

    /// Short boxed summary for terminals.
    pub fn render_compact(&self, state: &RunState) -> String {
        let backend = Side::read(state, fields::BACKEND_PLAN, fields::BACKEND_TASKS);
        let frontend = Side::read(state, fields::FRONTEND_PLAN, fields::FRONTEND_TASKS);
        let rule = "─".repeat(65);
        let mut out = String::new();

        out.push_str("╔═══════════════════════════════════════════════════════════════╗\n");
        out.push_str("║          TECHNICAL IMPLEMENTATION PLAN                        ║\n");
        out.push_str("╚═══════════════════════════════════════════════════════════════╝\n\n");

        if let Some(brief) = state.get_str(fields::BRIEF) {
            let _ = writeln!(out, "ORIGINAL BRIEF\n{}\n{}\n", rule, brief);
        }

        let _ = writeln!(out, "SUMMARY\n{}", rule);
        let _ = writeln!(
            out,
            "✓ Epics:          {} (Backend: {}, Frontend: {})",
            backend.epics() + frontend.epics(),
            backend.epics(),
            frontend.epics()
        );
        let _ = writeln!(out, "✓ Backend Tasks:  {}", backend.tasks.len());
        let _ = writeln!(out, "✓ Frontend Tasks: {}", frontend.tasks.len());
        let _ = writeln!(out, "✓ Total Tasks:    {}", backend.tasks.len() + frontend.tasks.len());
        out
    }
}

fn render_side(out: &mut String, title: &str, side: &Side) {
    match &side.plan {
        Some(plan) => {
            render_plan(out, title, plan);
            out.push_str("---\n\n");
        }
        // Degraded run: the flat task list is all there is.
        None if !side.tasks.is_empty() => {
            let _ = writeln!(out, "## {}\n", title);
            for (i, task) in side.tasks.iter().enumerate() {
                let _ = writeln!(out, "{}. {}", i + 1, task);
            }
            out.push_str("\n---\n\n");
        }
        None => {}
    }
}

fn render_plan(out: &mut String, title: &str, plan: &Plan) {
    let _ = writeln!(out, "## {}\n", title);

    let mut task_number = 1;
    for (e, epic) in plan.epics.iter().enumerate() {
        let _ = writeln!(out, "### Epic {}: {}\n", e + 1, epic.name);
        for (s, story) in epic.stories.iter().enumerate() {
            let _ = writeln!(out, "#### Story {}.{}: {}\n", e + 1, s + 1, story.name);
            for task in &story.tasks {
                let _ = writeln!(out, "**Task {}: {}**\n", task_number, task.name);
                let _ = writeln!(out, "- **Goal:** {}", task.goal);
                let _ = writeln!(out, "- **Deliverable:** {}", task.deliverable);
                let _ = writeln!(out, "- **Estimate:** {}", task.estimate);
                if task.deps.is_empty() {
                    out.push_str("- **Dependencies:** None\n\n");
                } else {
                    let _ = writeln!(out, "- **Dependencies:** {}\n", task.deps.join(", "));
                }
                task_number += 1;
            }
        }
    }

    for (heading, items) in [("Critical Path", &plan.critical_path), ("Technical Risks", &plan.risks)] {
        if items.is_empty() {
            continue;
        }
        let _ = writeln!(out, "### {}\n", heading);
        for (i, item) in items.iter().enumerate() {
            let _ = writeln!(out, "{}. {}", i + 1, item);
        }
        out.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::StateDiff;
    use chrono::TimeZone;
    use plangraph_test_utils::sample_plan_json;

    fn finished_state() -> RunState {
        let plan: Plan = serde_json::from_str(&sample_plan_json()).unwrap();
        let mut state = RunState::from_brief("Build a todo app.");
        state.merge(
            StateDiff::new()
                .with_field(fields::EXPANDED_BRIEF, "- personal productivity")
                .with_field(fields::ARCHITECTURE_DESIGN, "- REST API\n- SPA")
                .with_field(fields::BACKEND_TASKS, plan.task_names())
                .with_serialized(fields::BACKEND_PLAN, &plan)
                .unwrap()
                .with_field(fields::FRONTEND_TASKS, vec!["Set up Vite".to_string(), "Add router".to_string()]),
        );
        state
    }

    fn report() -> MarkdownReport {
        MarkdownReport::new().with_timestamp(Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap())
    }

    #[test]
    fn test_render_full_report() {
        let md = report().render(&finished_state());

        assert!(md.starts_with("# Technical Implementation Plan\n"));
        assert!(md.contains("**Generated:** 2026-01-02 03:04:05 UTC"));
        assert!(md.contains("## Original Brief\n\nBuild a todo app."));
        assert!(md.contains("## System Architecture\n\n- REST API\n- SPA"));
        assert!(md.contains("### Epic 2: Delivery"));
        assert!(md.contains("#### Story 1.1: Persistence"));
        // task numbering is global across epics
        assert!(md.contains("**Task 3: REST endpoints**"));
        assert!(md.contains("- **Dependencies:** None"));
        assert!(md.contains("- **Dependencies:** Schema migrations"));
        assert!(md.contains("### Critical Path\n\n1. Schema migrations\n2. Todo repository"));
        assert!(md.contains("### Technical Risks\n\n1. Schema churn"));
    }

    #[test]
    fn test_degraded_side_rendered_as_list() {
        let md = report().render(&finished_state());
        assert!(md.contains("## Frontend Implementation Plan\n\n1. Set up Vite\n2. Add router\n"));
    }

    #[test]
    fn test_summary_counts() {
        let md = report().render(&finished_state());
        let summary = md.split("## Summary").nth(1).unwrap();
        assert!(summary.contains("### Backend\n- **Epics:** 2\n- **Stories:** 2\n- **Tasks:** 3"));
        assert!(summary.contains("### Frontend\n- **Epics:** 0\n- **Stories:** 0\n- **Tasks:** 2"));
        assert!(summary.contains("### Total\n- **Epics:** 2\n- **Stories:** 2\n- **Tasks:** 5"));
    }

    #[test]
    fn test_empty_state_still_renders() {
        let md = report().render(&RunState::new());
        assert!(md.contains("## Summary"));
        assert!(!md.contains("## Original Brief\n"));
    }

    #[test]
    fn test_compact_summary() {
        let text = report().render_compact(&finished_state());
        assert!(text.contains("TECHNICAL IMPLEMENTATION PLAN"));
        assert!(text.contains("✓ Epics:          2 (Backend: 2, Frontend: 0)"));
        assert!(text.contains("✓ Total Tasks:    5"));
    }
}
