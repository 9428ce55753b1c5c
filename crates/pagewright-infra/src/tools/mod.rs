//! Build tools the agent calls to produce and ship a landing page.
//!
//! Every stage of the plan has one tool here. Inputs are typed structs whose
//! JSON Schema is generated with `schemars` and advertised to the model;
//! outputs are artifacts merged into the build session.
//!
//! Artifact keys:
//!
//! | Tool                 | Artifact keys                          |
//! |----------------------|----------------------------------------|
//! | `save_brief`         | `brief`                                |
//! | `save_wireframe`     | `wireframe`                            |
//! | `write_section`      | `copy:{section}` (one per section)     |
//! | `generate_design`    | `design`                               |
//! | `build_page`         | `page`                                 |
//! | `run_quality_review` | `review`                               |
//! | `deploy_site`        | `deployment`, `siteUrl`                |
//! | `finalize_launch`    | `launch`                               |
//! | `consult_advisor`    | none (advice is streamed to the user)  |

pub mod advisor;
pub mod artifact;
pub mod deploy;
pub mod page;

use std::path::PathBuf;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;

use pagewright_core::build::plan::PlanError;
use pagewright_core::build::tool::ToolRegistry;
use pagewright_core::llm::box_provider::BoxLlmProvider;
use pagewright_types::tool::{ToolDefinition, ToolError};

pub use advisor::ConsultAdvisorTool;
pub use artifact::{
    FinalizeLaunchTool, GenerateDesignTool, RunQualityReviewTool, SaveBriefTool,
    SaveWireframeTool, WriteSectionTool,
};
pub use deploy::DeploySiteTool;
pub use page::BuildPageTool;

/// Everything the default tool set needs from the host.
#[derive(Clone)]
pub struct ToolSettings {
    pub provider: BoxLlmProvider,
    /// Model used for advisor consultations.
    pub model: String,
    pub advisor_max_tokens: u32,
    /// Directory deployed sites are written under.
    pub sites_dir: PathBuf,
    /// Public URL prefix the sites directory is served at.
    pub site_base_url: String,
}

/// Register every plan tool plus the advisor tool, and check the result
/// against the plan.
pub fn default_registry(settings: ToolSettings) -> Result<ToolRegistry, PlanError> {
    let mut registry = ToolRegistry::new();
    registry
        .register(SaveBriefTool)
        .register(SaveWireframeTool)
        .register(WriteSectionTool)
        .register(GenerateDesignTool)
        .register(BuildPageTool)
        .register(RunQualityReviewTool)
        .register(DeploySiteTool::new(settings.sites_dir, settings.site_base_url))
        .register(FinalizeLaunchTool)
        .register(ConsultAdvisorTool::new(
            settings.provider,
            settings.model,
            settings.advisor_max_tokens,
        ));
    registry.validate()?;
    Ok(registry)
}

/// Tool definition with an input schema generated from `T`.
pub(crate) fn definition_for<T: JsonSchema>(name: &str, description: &str) -> ToolDefinition {
    let mut schema = schemars::schema_for!(T).to_value();
    if let Some(obj) = schema.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    ToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        input_schema: schema,
    }
}

pub(crate) fn parse_input<T: DeserializeOwned>(input: serde_json::Value) -> Result<T, ToolError> {
    serde_json::from_value(input).map_err(|e| ToolError::InvalidInput(e.to_string()))
}

/// Reject blank required text fields.
pub(crate) fn require_text(field: &str, value: &str) -> Result<(), ToolError> {
    if value.trim().is_empty() {
        return Err(ToolError::InvalidInput(format!("'{field}' must not be empty")));
    }
    Ok(())
}

pub(crate) fn to_artifact<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, ToolError> {
    serde_json::to_value(value).map_err(|e| ToolError::Execution(e.to_string()))
}

/// Artifact key for a copy section label: `"social proof"` -> `"copy:social_proof"`.
pub fn section_artifact_key(label: &str) -> String {
    format!("copy:{}", label.trim().to_lowercase().replace(' ', "_"))
}
