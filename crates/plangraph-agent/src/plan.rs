use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::resolver::{Field, Schema};

/// T-shirt size estimate, ordered smallest to largest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Estimate {
    XS,
    S,
    M,
    L,
    XL,
}

impl Estimate {
    pub const ALL: [Estimate; 5] = [Estimate::XS, Estimate::S, Estimate::M, Estimate::L, Estimate::XL];

    pub fn as_str(&self) -> &'static str {
        match self {
            Estimate::XS => "XS",
            Estimate::S => "S",
            Estimate::M => "M",
            Estimate::L => "L",
            Estimate::XL => "XL",
        }
    }
}

impl fmt::Display for Estimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    pub goal: String,
    pub deliverable: String,
    /// Names of other tasks. Dangling references are allowed.
    #[serde(default)]
    pub deps: Vec<String>,
    pub estimate: Estimate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub name: String,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Epic {
    pub name: String,
    pub stories: Vec<Story>,
}

/// Epics, stories and tasks plus the critical path and risks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub epics: Vec<Epic>,
    #[serde(default)]
    pub critical_path: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
}

impl Plan {
    /// Validation schema for generated plans.
    pub fn schema() -> Schema {
        let task = Schema::object(vec![
            Field::required("name", Schema::non_empty_string()),
            Field::required("goal", Schema::non_empty_string()),
            Field::required("deliverable", Schema::non_empty_string()),
            Field::with_default("deps", Schema::array(Schema::string()), json!([])),
            Field::required("estimate", Schema::one_of(Estimate::ALL.iter().map(Estimate::as_str))),
        ]);
        let story = Schema::object(vec![
            Field::required("name", Schema::string()),
            Field::required("tasks", Schema::array(task)),
        ]);
        let epic = Schema::object(vec![
            Field::required("name", Schema::string()),
            Field::required("stories", Schema::array(story)),
        ]);
        Schema::object(vec![
            Field::required("epics", Schema::array(epic)),
            Field::with_default("criticalPath", Schema::array(Schema::string()), json!([])),
            Field::with_default("risks", Schema::array(Schema::string()), json!([])),
        ])
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.epics
            .iter()
            .flat_map(|e| e.stories.iter())
            .flat_map(|s| s.tasks.iter())
    }

    /// Task names in epic, story, task order.
    pub fn task_names(&self) -> Vec<String> {
        self.tasks().map(|t| t.name.clone()).collect()
    }

    pub fn epic_count(&self) -> usize {
        self.epics.len()
    }

    pub fn story_count(&self) -> usize {
        self.epics.iter().map(|e| e.stories.len()).sum()
    }

    pub fn task_count(&self) -> usize {
        self.tasks().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{Resolved, StructuredOutputResolver};
    use plangraph_test_utils::sample_plan_json;

    fn resolve(raw: &str) -> Resolved<Plan> {
        StructuredOutputResolver::default().resolve(raw, &Plan::schema())
    }

    #[test]
    fn test_estimates_are_ordered() {
        assert!(Estimate::XS < Estimate::S);
        assert!(Estimate::L < Estimate::XL);
        let mut sizes = vec![Estimate::XL, Estimate::XS, Estimate::M];
        sizes.sort();
        assert_eq!(sizes, vec![Estimate::XS, Estimate::M, Estimate::XL]);
    }

    #[test]
    fn test_sample_plan_resolves() {
        let plan = match resolve(&sample_plan_json()) {
            Resolved::Structured(plan) => plan,
            Resolved::Degraded(lines) => panic!("degraded: {:?}", lines),
        };
        assert_eq!(plan.epic_count(), 2);
        assert_eq!(plan.story_count(), 2);
        assert_eq!(
            plan.task_names(),
            vec!["Schema migrations", "Todo repository", "REST endpoints"]
        );
        assert_eq!(plan.critical_path.len(), 3);
        assert_eq!(plan.tasks().next().unwrap().estimate, Estimate::S);
    }

    #[test]
    fn test_plan_after_footnote_resolves() {
        let raw = format!("As discussed in [1], here is the plan:\n{}", sample_plan_json());
        let plan = resolve(&raw).structured().cloned().expect("structured plan");
        assert_eq!(plan.task_count(), 3);
    }

    #[test]
    fn test_defaults_filled_when_absent() {
        let raw = r#"{"epics":[{"name":"E","stories":[{"name":"S","tasks":[
            {"name":"t","goal":"g","deliverable":"d","estimate":"XS"}]}]}]}"#;
        let plan = resolve(raw).structured().cloned().unwrap();
        assert!(plan.critical_path.is_empty());
        assert!(plan.risks.is_empty());
        assert!(plan.epics[0].stories[0].tasks[0].deps.is_empty());
    }

    #[test]
    fn test_dangling_dependencies_tolerated() {
        let raw = r#"{"epics":[{"name":"E","stories":[{"name":"S","tasks":[
            {"name":"t","goal":"g","deliverable":"d","deps":["does not exist"],"estimate":"M"}]}]}]}"#;
        assert!(resolve(raw).is_structured());
    }

    #[test]
    fn test_bad_estimate_degrades() {
        let raw = r#"{"epics":[{"name":"E","stories":[{"name":"S","tasks":[
            {"name":"t","goal":"g","deliverable":"d","estimate":"XXL"}]}]}]}"#;
        match resolve(raw) {
            Resolved::Degraded(lines) => assert_eq!(lines.len(), 2),
            Resolved::Structured(_) => panic!("estimate outside the allowed set was accepted"),
        }
    }

    #[test]
    fn test_empty_goal_degrades() {
        let raw = r#"{"epics":[{"name":"E","stories":[{"name":"S","tasks":[
            {"name":"t","goal":"","deliverable":"d","estimate":"M"}]}]}]}"#;
        assert!(!resolve(raw).is_structured());
    }

    #[test]
    fn test_reparse_is_idempotent() {
        let first = resolve(&sample_plan_json()).structured().cloned().unwrap();
        let serialized = serde_json::to_string_pretty(&first).unwrap();
        let second = resolve(&serialized).structured().cloned().unwrap();
        assert_eq!(first, second);
        // camelCase survives the trip
        assert!(serialized.contains("criticalPath"));
    }
}
