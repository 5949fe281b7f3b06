use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::info;

use plangraph_core::error::Result;
use plangraph_core::types::GenerateOptions;

use super::{fields, names};
use crate::graph::{Node, NodeContext, RunState, StateDiff};

/// Expands the raw brief into a product analysis.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExtendBrief;

impl ExtendBrief {
    fn prompt(brief: &str) -> String {
        format!(
            r#"You are a senior product analyst.
Initial brief:
"{brief}"

Objective:
- Expand the context (targets, value, constraints, data, risks, dependencies)
- List assumptions and success metrics
- Propose missing sections if needed
Answer with 8-15 concise bullet points."#
        )
    }
}

impl Node for ExtendBrief {
    fn name(&self) -> &str {
        names::EXTEND_BRIEF
    }

    fn invoke(&self, state: Arc<RunState>, ctx: NodeContext) -> BoxFuture<'_, Result<StateDiff>> {
        Box::pin(async move {
            info!(run_id = %ctx.run_id, node = self.name(), "start");
            let brief = state.get_str(fields::BRIEF).unwrap_or_default();
            let expanded = ctx.generate(&Self::prompt(brief), GenerateOptions::new()).await?;
            info!(run_id = %ctx.run_id, node = self.name(), "done");

            Ok(StateDiff::new()
                .with_field(fields::EXPANDED_BRIEF, expanded)
                .with_note("Extended brief ready."))
        })
    }
}
