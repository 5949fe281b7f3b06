use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::info;

use plangraph_core::error::Result;
use plangraph_core::types::GenerateOptions;

use super::{fields, names};
use crate::graph::{Node, NodeContext, RunState, StateDiff};

/// Proposes a technical architecture for the brief.
#[derive(Debug, Default, Clone, Copy)]
pub struct Architecture;

impl Architecture {
    fn prompt(brief: &str) -> String {
        format!(
            r#"You are a senior software architect.
Initial brief:
"{brief}"

Objective:
- Define the technical architecture suited for the project
- Identify main components and their interactions
- Propose appropriate technologies and frameworks
- Anticipate technical challenges and propose solutions

Answer with 8-15 concise bullet points."#
        )
    }
}

impl Node for Architecture {
    fn name(&self) -> &str {
        names::ARCHITECTURE
    }

    fn invoke(&self, state: Arc<RunState>, ctx: NodeContext) -> BoxFuture<'_, Result<StateDiff>> {
        Box::pin(async move {
            info!(run_id = %ctx.run_id, node = self.name(), "start");
            let brief = state.get_str(fields::BRIEF).unwrap_or_default();
            let design = ctx.generate(&Self::prompt(brief), GenerateOptions::new()).await?;
            info!(run_id = %ctx.run_id, node = self.name(), "done");

            Ok(StateDiff::new()
                .with_field(fields::ARCHITECTURE_DESIGN, design)
                .with_note("Technical architecture ready."))
        })
    }
}
