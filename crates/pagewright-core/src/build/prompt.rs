//! System prompt assembly for the build agent.
//!
//! Sections are wrapped in XML tags so the model can tell the product
//! context, the pipeline description, the mode instructions, and the live
//! build state apart:
//!
//! ```text
//! <product>Name: ... Description: ...</product>
//! <pipeline>0. Brief (checkpoint) -> save_brief ...</pipeline>
//! <mode>interactive | autonomous instructions</mode>
//! <instructions>...</instructions>
//! <build_state>Current stage, section, completed stages, artifacts</build_state>
//! ```
//!
//! `<build_state>` changes every round and is appended by the build loop.

use pagewright_types::build::{BuildMode, BuildSession, StepStatus};
use pagewright_types::project::Project;

use super::plan;

/// Produces the static part of the system prompt for a project.
pub trait PromptComposer: Send + Sync {
    fn compose(&self, project: &Project, mode: BuildMode) -> String;
}

/// Composer built from the project record and optional extra guidance.
#[derive(Debug, Clone, Default)]
pub struct DefaultPromptComposer {
    /// House style or reference notes appended to every prompt.
    pub guidance: Option<String>,
}

impl DefaultPromptComposer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_guidance(guidance: impl Into<String>) -> Self {
        Self {
            guidance: Some(guidance.into()),
        }
    }
}

impl PromptComposer for DefaultPromptComposer {
    fn compose(&self, project: &Project, mode: BuildMode) -> String {
        let mut sections = Vec::with_capacity(5);

        let description = project
            .description
            .as_deref()
            .map(|d| format!("\nDescription: {}", d.trim()))
            .unwrap_or_default();
        sections.push(format!(
            "<product>\nName: {}{description}\n</product>",
            project.name
        ));

        let stages: Vec<String> = plan::STEP_PLAN
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let mut line = format!("{i}. {} -> {}", s.name, s.tool);
                if let Some(sections) = s.sub_stages {
                    line.push_str(&format!(" (one call per section: {})", sections.join(", ")));
                }
                line
            })
            .collect();
        sections.push(format!("<pipeline>\n{}\n</pipeline>", stages.join("\n")));

        let mode_text = match mode {
            BuildMode::Interactive => {
                "You are building interactively. Produce one stage (or one copy section) at a \
                 time, then stop and let the user review it before moving on."
            }
            BuildMode::Autonomous => {
                "You are building autonomously. Work through the stages end to end without \
                 waiting for approval, narrating briefly what you are doing and why."
            }
        };
        sections.push(format!("<mode>\n{mode_text}\n</mode>"));

        sections.push(format!(
            "<instructions>\n\
            You are a landing-page strategist and builder.\n\
            Save every stage's output with its tool; never only describe it.\n\
            Consult advisors with {} when a stage requires it, and build on their advice.\n\
            Keep chat replies short; the saved artifacts carry the detail.\n\
            </instructions>",
            plan::ADVISOR_TOOL
        ));

        if let Some(guidance) = self.guidance.as_deref().filter(|g| !g.trim().is_empty()) {
            sections.push(format!("<guidance>\n{}\n</guidance>", guidance.trim()));
        }

        sections.join("\n\n")
    }
}

/// Render the live position of a session for the model.
pub fn render_build_state(session: &BuildSession) -> String {
    let current = plan::step(session.current_step).map_or("unknown", |s| s.name);
    let mut lines = vec![format!("Current stage: {} ({current})", session.current_step)];

    if Some(session.current_step) == plan::sub_staged_step() {
        lines.push(format!(
            "Current section: {} ({})",
            session.current_substep,
            plan::section_label(session.current_substep)
        ));
    }

    let completed: Vec<&str> = session
        .steps
        .iter()
        .filter(|s| s.status == StepStatus::Complete)
        .map(|s| s.name.as_str())
        .collect();
    if !completed.is_empty() {
        lines.push(format!("Completed stages: {}", completed.join(", ")));
    }

    let required = plan::required_advisors(&plan::stage_key(
        session.current_step,
        session.current_substep,
    ));
    if !required.is_empty() {
        let pending: Vec<&str> = required
            .iter()
            .filter(|a| !session.advisors_consulted.contains(**a))
            .copied()
            .collect();
        if !pending.is_empty() {
            lines.push(format!("Advisors still to consult here: {}", pending.join(", ")));
        }
    }

    if !session.artifacts.is_empty() {
        let keys: Vec<&str> = session.artifacts.keys().map(String::as_str).collect();
        lines.push(format!("Saved artifacts: {}", keys.join(", ")));
    }

    format!("<build_state>\n{}\n</build_state>", lines.join("\n"))
}

/// Persona instructions for an advisor id.
pub fn advisor_persona(advisor: &str) -> Option<&'static str> {
    let persona = match advisor {
        "positioning_strategist" => {
            "You are a positioning strategist. Judge who the product is for, the alternative \
             it replaces, and the one claim the page must own."
        }
        "conversion_copywriter" => {
            "You are a conversion copywriter. Give concrete wording advice: headlines, \
             specificity, and objections the copy must answer."
        }
        "cro_specialist" => {
            "You are a conversion-rate optimisation specialist. Focus on friction, calls to \
             action, proof placement, and what to test first."
        }
        "brand_voice_editor" => {
            "You are a brand voice editor. Check tone consistency, jargon, and whether the \
             page sounds like one confident voice."
        }
        _ => return None,
    };
    Some(persona)
}
