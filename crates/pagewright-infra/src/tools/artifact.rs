//! Tools that validate and save a stage's output as a session artifact.

use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use pagewright_core::build::plan;
use pagewright_core::build::tool::{BuildTool, TurnContext};
use pagewright_types::tool::{ToolDefinition, ToolError, ToolOutput};

use super::{definition_for, parse_input, require_text, section_artifact_key, to_artifact};

// ---------------------------------------------------------------------------
// Brief
// ---------------------------------------------------------------------------

/// Positioning brief for the page.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BriefInput {
    /// Who the page is for.
    pub audience: String,
    /// The problem the audience has today.
    pub problem: String,
    /// One-sentence value proposition the page must land.
    pub value_proposition: String,
    /// Desired voice, e.g. "confident, plain-spoken".
    #[serde(default)]
    pub tone: Option<String>,
    /// What a visitor should do, in priority order.
    #[serde(default)]
    pub goals: Vec<String>,
}

pub struct SaveBriefTool;

impl BuildTool for SaveBriefTool {
    fn definition(&self) -> ToolDefinition {
        definition_for::<BriefInput>(
            "save_brief",
            "Save the positioning brief: audience, problem, value proposition, tone and goals.",
        )
    }

    async fn execute(
        &self,
        _ctx: &TurnContext,
        input: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let brief: BriefInput = parse_input(input)?;
        require_text("audience", &brief.audience)?;
        require_text("problem", &brief.problem)?;
        require_text("value_proposition", &brief.value_proposition)?;

        Ok(ToolOutput::text(format!(
            "Brief saved. Value proposition: {}",
            brief.value_proposition.trim()
        ))
        .with_artifact("brief", to_artifact(&brief)?))
    }
}

// ---------------------------------------------------------------------------
// Wireframe
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WireframeBlock {
    pub name: String,
    /// What this block must accomplish for the visitor.
    pub purpose: String,
}

/// Ordered page layout.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WireframeInput {
    pub blocks: Vec<WireframeBlock>,
}

pub struct SaveWireframeTool;

impl BuildTool for SaveWireframeTool {
    fn definition(&self) -> ToolDefinition {
        definition_for::<WireframeInput>(
            "save_wireframe",
            "Save the page wireframe as an ordered list of blocks with their purpose.",
        )
    }

    async fn execute(
        &self,
        ctx: &TurnContext,
        input: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        if ctx.artifact("brief").is_none() {
            return Err(ToolError::Precondition("save the brief first".into()));
        }
        let wireframe: WireframeInput = parse_input(input)?;
        if wireframe.blocks.is_empty() {
            return Err(ToolError::InvalidInput("wireframe needs at least one block".into()));
        }
        for block in &wireframe.blocks {
            require_text("name", &block.name)?;
        }

        let names: Vec<&str> = wireframe.blocks.iter().map(|b| b.name.as_str()).collect();
        Ok(
            ToolOutput::text(format!("Wireframe saved: {}", names.join(" > ")))
                .with_artifact("wireframe", to_artifact(&wireframe)?),
        )
    }
}

// ---------------------------------------------------------------------------
// Copy sections
// ---------------------------------------------------------------------------

/// One section of page copy.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SectionInput {
    /// Section label. Defaults to the section currently being written.
    #[serde(default)]
    pub section: Option<String>,
    pub headline: String,
    pub body: String,
    /// Call-to-action button text, if the section has one.
    #[serde(default)]
    pub cta: Option<String>,
}

/// Stored form of a written section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionArtifact {
    pub section: String,
    pub headline: String,
    pub body: String,
    #[serde(default)]
    pub cta: Option<String>,
}

pub struct WriteSectionTool;

impl BuildTool for WriteSectionTool {
    fn definition(&self) -> ToolDefinition {
        let description = format!(
            "Write one section of page copy. Sections in order: {}.",
            plan::COPY_SECTIONS.join(", ")
        );
        definition_for::<SectionInput>("write_section", &description)
    }

    async fn execute(
        &self,
        ctx: &TurnContext,
        input: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let input: SectionInput = parse_input(input)?;
        require_text("headline", &input.headline)?;
        require_text("body", &input.body)?;

        let section = match input.section.as_deref().map(str::trim) {
            Some(label) if !label.is_empty() => {
                let label = label.to_lowercase();
                if !plan::COPY_SECTIONS.contains(&label.as_str()) {
                    return Err(ToolError::InvalidInput(format!(
                        "unknown section '{label}', expected one of: {}",
                        plan::COPY_SECTIONS.join(", ")
                    )));
                }
                label
            }
            _ => plan::section_label(ctx.current_substep),
        };

        let artifact = SectionArtifact {
            headline: input.headline.trim().to_string(),
            body: input.body.trim().to_string(),
            cta: input.cta.filter(|c| !c.trim().is_empty()),
            section: section.clone(),
        };
        Ok(
            ToolOutput::text(format!("The {section} section is saved."))
                .with_artifact(section_artifact_key(&section), to_artifact(&artifact)?),
        )
    }
}

// ---------------------------------------------------------------------------
// Design
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Palette {
    /// Hex color, e.g. "#1f6feb".
    pub primary: String,
    pub accent: String,
    pub background: String,
    pub text: String,
}

/// Visual design tokens for the page.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DesignInput {
    pub palette: Palette,
    pub heading_font: String,
    pub body_font: String,
    #[serde(default)]
    pub style_notes: Option<String>,
}

fn is_hex_color(value: &str) -> bool {
    let Some(hex) = value.strip_prefix('#') else {
        return false;
    };
    matches!(hex.len(), 3 | 6) && hex.chars().all(|c| c.is_ascii_hexdigit())
}

pub struct GenerateDesignTool;

impl BuildTool for GenerateDesignTool {
    fn definition(&self) -> ToolDefinition {
        definition_for::<DesignInput>(
            "generate_design",
            "Save the visual design: a hex color palette and heading/body fonts.",
        )
    }

    async fn execute(
        &self,
        _ctx: &TurnContext,
        input: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let design: DesignInput = parse_input(input)?;
        let palette = &design.palette;
        for (field, color) in [
            ("primary", &palette.primary),
            ("accent", &palette.accent),
            ("background", &palette.background),
            ("text", &palette.text),
        ] {
            if !is_hex_color(color) {
                return Err(ToolError::InvalidInput(format!(
                    "palette.{field} must be a hex color, got '{color}'"
                )));
            }
        }
        require_text("heading_font", &design.heading_font)?;
        require_text("body_font", &design.body_font)?;

        Ok(ToolOutput::text(format!(
            "Design saved: {} / {} on {}.",
            design.heading_font, design.body_font, palette.background
        ))
        .with_artifact("design", to_artifact(&design)?))
    }
}

// ---------------------------------------------------------------------------
// Review
// ---------------------------------------------------------------------------

/// Result of reviewing the built page.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReviewInput {
    /// Overall quality score from 0 to 100.
    pub score: u8,
    #[serde(default)]
    pub findings: Vec<String>,
    pub approved: bool,
}

pub struct RunQualityReviewTool;

impl BuildTool for RunQualityReviewTool {
    fn definition(&self) -> ToolDefinition {
        definition_for::<ReviewInput>(
            "run_quality_review",
            "Record a quality review of the built page: score, findings, and approval.",
        )
    }

    async fn execute(
        &self,
        ctx: &TurnContext,
        input: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        if ctx.artifact("page").is_none() {
            return Err(ToolError::Precondition("build the page before reviewing it".into()));
        }
        let review: ReviewInput = parse_input(input)?;
        if review.score > 100 {
            return Err(ToolError::InvalidInput("score must be between 0 and 100".into()));
        }

        let verdict = if review.approved { "approved" } else { "changes requested" };
        Ok(ToolOutput::text(format!(
            "Review recorded: {}/100, {verdict}, {} finding(s).",
            review.score,
            review.findings.len()
        ))
        .with_artifact("review", to_artifact(&review)?))
    }
}

// ---------------------------------------------------------------------------
// Launch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LaunchInput {
    /// Short launch announcement.
    pub announcement: String,
    /// Where to announce, e.g. "newsletter", "x", "product hunt".
    #[serde(default)]
    pub channels: Vec<String>,
}

pub struct FinalizeLaunchTool;

impl BuildTool for FinalizeLaunchTool {
    fn definition(&self) -> ToolDefinition {
        definition_for::<LaunchInput>(
            "finalize_launch",
            "Finish the build with a launch announcement once the site is deployed.",
        )
    }

    async fn execute(
        &self,
        ctx: &TurnContext,
        input: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let Some(site_url) = ctx.artifact("siteUrl").and_then(|v| v.as_str()) else {
            return Err(ToolError::Precondition("deploy the site before launching".into()));
        };
        let launch: LaunchInput = parse_input(input)?;
        require_text("announcement", &launch.announcement)?;

        let artifact = serde_json::json!({
            "announcement": launch.announcement.trim(),
            "channels": launch.channels,
            "siteUrl": site_url,
            "launchedAt": Utc::now().to_rfc3339(),
        });
        Ok(ToolOutput::text(format!("Launch finalized for {site_url}."))
            .with_artifact("launch", artifact))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::ctx_with;
    use serde_json::json;

    fn brief() -> serde_json::Value {
        json!({
            "audience": "ops leads at 10-50 person teams",
            "problem": "inventory lives in spreadsheets",
            "value_proposition": "Know what you have without counting",
            "goals": ["start trial"]
        })
    }

    #[tokio::test]
    async fn test_save_brief() {
        let out = SaveBriefTool.execute(&ctx_with(&[]), brief()).await.unwrap();
        assert!(out.content.contains("Know what you have"));
        assert_eq!(out.artifacts["brief"]["goals"][0], "start trial");
    }

    #[tokio::test]
    async fn test_save_brief_rejects_blank_and_malformed() {
        let mut blank = brief();
        blank["audience"] = json!("  ");
        assert!(matches!(
            SaveBriefTool.execute(&ctx_with(&[]), blank).await,
            Err(ToolError::InvalidInput(m)) if m.contains("audience")
        ));
        assert!(matches!(
            SaveBriefTool.execute(&ctx_with(&[]), json!({"audience": 3})).await,
            Err(ToolError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_wireframe_requires_brief() {
        let input = json!({"blocks": [{"name": "Hero", "purpose": "hook"}]});
        assert!(matches!(
            SaveWireframeTool.execute(&ctx_with(&[]), input.clone()).await,
            Err(ToolError::Precondition(_))
        ));
        let out = SaveWireframeTool
            .execute(&ctx_with(&[("brief", brief())]), input)
            .await
            .unwrap();
        assert_eq!(out.content, "Wireframe saved: Hero");
    }

    #[tokio::test]
    async fn test_write_section_defaults_to_current_section() {
        let ctx = ctx_with(&[]);
        let out = WriteSectionTool
            .execute(&ctx, json!({"headline": "Stop counting", "body": "Live stock levels."}))
            .await
            .unwrap();
        assert_eq!(out.artifacts["copy:hero"]["headline"], "Stop counting");
    }

    #[tokio::test]
    async fn test_write_section_explicit_and_unknown_labels() {
        let ctx = ctx_with(&[]);
        let out = WriteSectionTool
            .execute(
                &ctx,
                json!({"section": "Social Proof", "headline": "Loved", "body": "Quotes", "cta": ""}),
            )
            .await
            .unwrap();
        assert_eq!(out.artifacts["copy:social_proof"]["section"], "social proof");
        assert!(out.artifacts["copy:social_proof"]["cta"].is_null());

        assert!(matches!(
            WriteSectionTool
                .execute(&ctx, json!({"section": "pricing", "headline": "h", "body": "b"}))
                .await,
            Err(ToolError::InvalidInput(m)) if m.contains("pricing")
        ));
    }

    #[tokio::test]
    async fn test_design_validates_colors() {
        let design = json!({
            "palette": {"primary": "#1f6feb", "accent": "#f78166", "background": "#fff", "text": "#111111"},
            "heading_font": "Inter",
            "body_font": "Source Serif"
        });
        let out = GenerateDesignTool.execute(&ctx_with(&[]), design.clone()).await.unwrap();
        assert_eq!(out.artifacts["design"]["palette"]["primary"], "#1f6feb");

        let mut bad = design;
        bad["palette"]["accent"] = json!("orange");
        assert!(matches!(
            GenerateDesignTool.execute(&ctx_with(&[]), bad).await,
            Err(ToolError::InvalidInput(m)) if m.contains("palette.accent")
        ));
    }

    #[tokio::test]
    async fn test_review_requires_page_and_valid_score() {
        let review = json!({"score": 82, "findings": ["tighten hero"], "approved": true});
        assert!(matches!(
            RunQualityReviewTool.execute(&ctx_with(&[]), review.clone()).await,
            Err(ToolError::Precondition(_))
        ));

        let ctx = ctx_with(&[("page", json!({"html": "<html></html>"}))]);
        let out = RunQualityReviewTool.execute(&ctx, review).await.unwrap();
        assert!(out.content.contains("82/100, approved"));

        assert!(matches!(
            RunQualityReviewTool
                .execute(&ctx, json!({"score": 140, "approved": false}))
                .await,
            Err(ToolError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_launch_requires_deployment() {
        let input = json!({"announcement": "We're live!", "channels": ["newsletter"]});
        assert!(matches!(
            FinalizeLaunchTool.execute(&ctx_with(&[]), input.clone()).await,
            Err(ToolError::Precondition(_))
        ));

        let ctx = ctx_with(&[("siteUrl", json!("http://localhost:3000/sites/x/"))]);
        let out = FinalizeLaunchTool.execute(&ctx, input).await.unwrap();
        assert_eq!(out.artifacts["launch"]["siteUrl"], "http://localhost:3000/sites/x/");
    }
}
