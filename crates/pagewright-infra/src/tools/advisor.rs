//! `consult_advisor`: ask a simulated domain expert for an opinion.
//!
//! The advisor is a one-shot completion on the build's own model with an
//! advisor persona as the system prompt. Advice is stashed in the turn
//! context under `advice:{advisor}` so later calls in the same turn can
//! build on it.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use pagewright_core::build::plan;
use pagewright_core::build::prompt::advisor_persona;
use pagewright_core::build::tool::{BuildTool, TurnContext};
use pagewright_core::llm::box_provider::BoxLlmProvider;
use pagewright_types::llm::{CompletionRequest, Message};
use pagewright_types::tool::{ToolDefinition, ToolError, ToolOutput};

use super::{definition_for, parse_input, require_text};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AdvisorInput {
    /// One of: positioning_strategist, conversion_copywriter, cro_specialist, brand_voice_editor.
    pub advisor: String,
    /// What you want the advisor's opinion on, with the draft if there is one.
    pub question: String,
}

pub struct ConsultAdvisorTool {
    provider: BoxLlmProvider,
    model: String,
    max_tokens: u32,
}

impl ConsultAdvisorTool {
    pub fn new(provider: BoxLlmProvider, model: String, max_tokens: u32) -> Self {
        Self {
            provider,
            model,
            max_tokens,
        }
    }

    fn context_block(ctx: &TurnContext) -> String {
        let stage = plan::step(ctx.current_step).map_or("unknown", |s| s.name);
        let mut lines = vec![
            format!("Product: {}", ctx.project.name),
            format!("Current stage: {stage}"),
        ];
        if let Some(description) = ctx.project.description.as_deref() {
            lines.push(format!("Description: {description}"));
        }
        if Some(ctx.current_step) == plan::sub_staged_step() {
            lines.push(format!(
                "Current section: {}",
                plan::section_label(ctx.current_substep)
            ));
        }
        if let Some(brief) = ctx.artifact("brief") {
            lines.push(format!("Brief: {brief}"));
        }
        for (key, advice) in ctx.recall_prefixed("advice:") {
            lines.push(format!("Earlier advice ({}): {advice}", &key["advice:".len()..]));
        }
        lines.join("\n")
    }
}

impl BuildTool for ConsultAdvisorTool {
    fn definition(&self) -> ToolDefinition {
        definition_for::<AdvisorInput>(
            plan::ADVISOR_TOOL,
            "Consult a domain advisor before presenting a stage's output. Some stages require specific advisors.",
        )
    }

    async fn execute(
        &self,
        ctx: &TurnContext,
        input: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let input: AdvisorInput = parse_input(input)?;
        require_text("question", &input.question)?;
        let Some(persona) = advisor_persona(&input.advisor) else {
            return Err(ToolError::InvalidInput(format!(
                "unknown advisor '{}', expected one of: {}",
                input.advisor,
                plan::KNOWN_ADVISORS.join(", ")
            )));
        };

        let system = format!(
            "{persona}\nAnswer in at most five short bullet points. Be specific to this product.\n\n<context>\n{}\n</context>",
            Self::context_block(ctx)
        );
        let request = CompletionRequest {
            model: self.model.clone(),
            messages: vec![Message::user(input.question.trim())],
            system: Some(system),
            max_tokens: self.max_tokens,
            temperature: Some(0.4),
            stream: false,
            stop_sequences: None,
            tools: Vec::new(),
        };

        let response = self
            .provider
            .complete(&request)
            .await
            .map_err(|e| ToolError::Execution(format!("advisor call failed: {e}")))?;
        let advice = response.content.trim().to_string();
        if advice.is_empty() {
            return Err(ToolError::Execution("advisor returned no advice".into()));
        }

        ctx.stash(
            format!("advice:{}", input.advisor),
            serde_json::Value::String(advice.clone()),
        );
        Ok(ToolOutput::text(advice))
    }
}
