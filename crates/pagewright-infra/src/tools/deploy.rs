//! `deploy_site`: publish the built page to the local sites directory.

use std::path::PathBuf;

use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use pagewright_core::build::tool::{BuildTool, TurnContext};
use pagewright_types::tool::{ToolDefinition, ToolError, ToolOutput};

use super::{definition_for, parse_input};
use super::page::render_page;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DeployInput {
    /// Free-form release note kept with the deployment record.
    #[serde(default)]
    pub note: Option<String>,
}

/// Writes `{sites_dir}/{project_id}/index.html` and records the public URL.
pub struct DeploySiteTool {
    sites_dir: PathBuf,
    site_base_url: String,
}

impl DeploySiteTool {
    pub fn new(sites_dir: PathBuf, site_base_url: String) -> Self {
        Self {
            sites_dir,
            site_base_url: site_base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl BuildTool for DeploySiteTool {
    fn definition(&self) -> ToolDefinition {
        definition_for::<DeployInput>(
            "deploy_site",
            "Publish the built page and return its public URL.",
        )
    }

    async fn execute(
        &self,
        ctx: &TurnContext,
        input: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let input: DeployInput = parse_input(input)?;

        // A page built in this same round is not visible yet; render it here.
        let html = match ctx
            .artifact("page")
            .and_then(|p| p.get("html"))
            .and_then(|h| h.as_str())
        {
            Some(html) => html.to_string(),
            None => render_page(&ctx.project, &ctx.project.name, &ctx.artifacts)?,
        };

        let site_dir = self.sites_dir.join(ctx.project.id.to_string());
        tokio::fs::create_dir_all(&site_dir)
            .await
            .map_err(|e| ToolError::Execution(format!("cannot create {}: {e}", site_dir.display())))?;
        let index = site_dir.join("index.html");
        tokio::fs::write(&index, &html)
            .await
            .map_err(|e| ToolError::Execution(format!("cannot write {}: {e}", index.display())))?;

        let url = format!("{}/{}/", self.site_base_url, ctx.project.id);
        tracing::info!(project_id = %ctx.project.id, %url, "site deployed");

        let deployment = serde_json::json!({
            "status": "live",
            "url": url,
            "path": index.display().to_string(),
            "note": input.note,
            "deployedAt": Utc::now().to_rfc3339(),
        });
        Ok(ToolOutput::text(format!("Site deployed at {url}"))
            .with_artifact("deployment", deployment)
            .with_artifact("siteUrl", serde_json::Value::String(url)))
    }
}
