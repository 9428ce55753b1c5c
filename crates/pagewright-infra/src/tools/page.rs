//! `build_page`: render the saved brief, copy, and design into one HTML file.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use pagewright_core::build::plan;
use pagewright_core::build::tool::{BuildTool, TurnContext};
use pagewright_types::project::Project;
use pagewright_types::tool::{ToolDefinition, ToolError, ToolOutput};

use super::artifact::{DesignInput, SectionArtifact};
use super::{definition_for, parse_input, section_artifact_key};

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct BuildPageInput {
    /// Page `<title>`. Defaults to the project name.
    #[serde(default)]
    pub title: Option<String>,
}

pub struct BuildPageTool;

impl BuildTool for BuildPageTool {
    fn definition(&self) -> ToolDefinition {
        definition_for::<BuildPageInput>(
            "build_page",
            "Render the saved copy sections and design into the landing page HTML.",
        )
    }

    async fn execute(
        &self,
        ctx: &TurnContext,
        input: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let input: BuildPageInput = if input.is_null() {
            BuildPageInput::default()
        } else {
            parse_input(input)?
        };
        let title = input
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| ctx.project.name.clone());

        let html = render_page(&ctx.project, &title, &ctx.artifacts)?;
        let artifact = serde_json::json!({
            "title": title,
            "html": html,
            "bytes": html.len(),
            "builtAt": Utc::now().to_rfc3339(),
        });

        Ok(
            ToolOutput::text(format!("Page built: {} bytes of HTML.", html.len()))
                .with_artifact("page", artifact),
        )
    }
}

/// Render the page from session artifacts.
///
/// Needs a design and at least one copy section. Sections are emitted in
/// plan order; missing ones are skipped.
pub fn render_page(
    project: &Project,
    title: &str,
    artifacts: &BTreeMap<String, serde_json::Value>,
) -> Result<String, ToolError> {
    let design: DesignInput = artifacts
        .get("design")
        .cloned()
        .ok_or_else(|| ToolError::Precondition("generate the design first".into()))
        .and_then(|v| {
            serde_json::from_value(v)
                .map_err(|e| ToolError::Precondition(format!("saved design is invalid: {e}")))
        })?;

    let sections: Vec<SectionArtifact> = plan::COPY_SECTIONS
        .iter()
        .filter_map(|label| artifacts.get(&section_artifact_key(label)))
        .filter_map(|v| serde_json::from_value(v.clone()).ok())
        .collect();
    if sections.is_empty() {
        return Err(ToolError::Precondition("write the page copy first".into()));
    }

    let description = artifacts
        .get("brief")
        .and_then(|b| b.get("value_proposition"))
        .and_then(|v| v.as_str())
        .or(project.description.as_deref())
        .unwrap_or_default();

    let p = &design.palette;
    let mut html = String::with_capacity(4096);
    // Writing to a String cannot fail.
    let _ = write!(
        html,
        "<!doctype html>\n<html lang=\"en\">\n<head>\n\
         <meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>{title}</title>\n\
         <meta name=\"description\" content=\"{description}\">\n\
         <style>\n\
         :root {{ --primary: {primary}; --accent: {accent}; --bg: {bg}; --text: {text}; }}\n\
         body {{ margin: 0; background: var(--bg); color: var(--text); font-family: '{body_font}', sans-serif; }}\n\
         h1, h2 {{ font-family: '{heading_font}', sans-serif; color: var(--primary); }}\n\
         section {{ max-width: 56rem; margin: 0 auto; padding: 4rem 1.5rem; }}\n\
         .cta {{ display: inline-block; padding: 0.75rem 1.5rem; background: var(--accent); color: var(--bg); border-radius: 0.375rem; text-decoration: none; }}\n\
         </style>\n</head>\n<body>\n",
        title = escape_html(title),
        description = escape_html(description),
        primary = escape_html(&p.primary),
        accent = escape_html(&p.accent),
        bg = escape_html(&p.background),
        text = escape_html(&p.text),
        body_font = escape_html(&design.body_font),
        heading_font = escape_html(&design.heading_font),
    );

    for (i, section) in sections.iter().enumerate() {
        let heading = if i == 0 { "h1" } else { "h2" };
        let id = section.section.replace(' ', "-");
        let _ = write!(
            html,
            "<section id=\"{id}\">\n<{heading}>{headline}</{heading}>\n",
            id = escape_html(&id),
            headline = escape_html(&section.headline),
        );
        for paragraph in section.body.split("\n\n").filter(|p| !p.trim().is_empty()) {
            let _ = writeln!(html, "<p>{}</p>", escape_html(paragraph.trim()));
        }
        if let Some(cta) = &section.cta {
            let _ = writeln!(html, "<a class=\"cta\" href=\"#call-to-action\">{}</a>", escape_html(cta));
        }
        html.push_str("</section>\n");
    }

    html.push_str("</body>\n</html>\n");
    Ok(html)
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
