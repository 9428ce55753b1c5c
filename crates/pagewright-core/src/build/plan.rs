//! The fixed landing-page pipeline and its advisor requirements.
//!
//! Stage indices are the stage ids used everywhere else. The plan is static;
//! `validate_plan` checks the structural assumptions the rest of the build
//! module relies on (one sub-staged stage, one deploy stage, unique tools).

use std::collections::BTreeSet;
use std::ops::RangeInclusive;

/// One stage of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepDefinition {
    pub name: &'static str,
    /// Pause for human review here when running interactively.
    pub is_checkpoint: bool,
    /// Ordered section labels for the one stage that produces several sections.
    pub sub_stages: Option<&'static [&'static str]>,
    /// Tool whose successful invocation marks this stage as produced.
    pub tool: &'static str,
}

impl StepDefinition {
    pub fn sub_stage_count(&self) -> Option<usize> {
        self.sub_stages.map(<[&str]>::len)
    }
}

pub const COPY_SECTIONS: &[&str] = &["hero", "problem", "solution", "social proof", "call to action"];

pub const STEP_PLAN: &[StepDefinition] = &[
    StepDefinition {
        name: "Brief",
        is_checkpoint: true,
        sub_stages: None,
        tool: "save_brief",
    },
    StepDefinition {
        name: "Wireframe",
        is_checkpoint: false,
        sub_stages: None,
        tool: "save_wireframe",
    },
    StepDefinition {
        name: "Copy",
        is_checkpoint: true,
        sub_stages: Some(COPY_SECTIONS),
        tool: "write_section",
    },
    StepDefinition {
        name: "Design",
        is_checkpoint: true,
        sub_stages: None,
        tool: "generate_design",
    },
    StepDefinition {
        name: "Build",
        is_checkpoint: false,
        sub_stages: None,
        tool: "build_page",
    },
    StepDefinition {
        name: "Review",
        is_checkpoint: true,
        sub_stages: None,
        tool: "run_quality_review",
    },
    StepDefinition {
        name: "Deploy",
        is_checkpoint: false,
        sub_stages: None,
        tool: "deploy_site",
    },
    StepDefinition {
        name: "Launch",
        is_checkpoint: false,
        sub_stages: None,
        tool: "finalize_launch",
    },
];

/// Name of the asynchronous stage that clients poll rather than continue.
pub const DEPLOY_STEP_NAME: &str = "Deploy";

/// Tool that simulates a domain-expert opinion.
pub const ADVISOR_TOOL: &str = "consult_advisor";

/// Stages whose output may not be presented before the required advisors
/// have been consulted. The Review stage has requirements too but is not
/// enforced.
pub const ENFORCED_STEPS: RangeInclusive<usize> = 0..=2;

/// Tool that only moves the pipeline once the page has been built.
const REVIEW_TOOL: &str = "run_quality_review";
const REVIEW_MIN_STEP: usize = 4;
const REVIEW_STEP: usize = 5;

pub const ADVISOR_REQUIREMENTS: &[(&str, &[&str])] = &[
    ("0", &["positioning_strategist"]),
    ("2a", &["conversion_copywriter"]),
    ("2b", &["conversion_copywriter"]),
    ("2c", &["conversion_copywriter"]),
    ("2d", &["conversion_copywriter"]),
    ("2e", &["conversion_copywriter", "cro_specialist"]),
    ("5", &["cro_specialist", "brand_voice_editor"]),
];

/// Every advisor id the advisor tool accepts.
pub const KNOWN_ADVISORS: &[&str] = &[
    "positioning_strategist",
    "conversion_copywriter",
    "cro_specialist",
    "brand_voice_editor",
];

/// Errors from plan or registry validation at startup.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("plan must contain exactly one sub-staged stage, found {0}")]
    SubStagedCount(usize),

    #[error("plan must contain a stage named '{DEPLOY_STEP_NAME}'")]
    MissingDeployStage,

    #[error("tool '{0}' is mapped to more than one stage")]
    DuplicateTool(String),

    #[error("no tool registered for '{0}'")]
    UnregisteredTool(String),
}

/// Stage names in plan order.
pub fn step_names() -> Vec<&'static str> {
    STEP_PLAN.iter().map(|s| s.name).collect()
}

pub fn step(index: usize) -> Option<&'static StepDefinition> {
    STEP_PLAN.get(index)
}

pub fn last_step() -> usize {
    STEP_PLAN.len() - 1
}

/// Index of the stage that is split into sections.
pub fn sub_staged_step() -> Option<usize> {
    STEP_PLAN.iter().position(|s| s.sub_stages.is_some())
}

pub fn deploy_step() -> Option<usize> {
    STEP_PLAN.iter().position(|s| s.name == DEPLOY_STEP_NAME)
}

/// Stage a successful invocation of `tool` advances to, given where the
/// session currently is. `None` for tools that do not drive progress.
pub fn tool_target(tool: &str, current_step: usize) -> Option<usize> {
    if tool == REVIEW_TOOL {
        return (current_step >= REVIEW_MIN_STEP).then(|| (current_step + 1).min(REVIEW_STEP));
    }
    STEP_PLAN.iter().position(|s| s.tool == tool)
}

/// Requirement key for a position: the stage index, or `"{step}{letter}"`
/// inside the sub-staged stage.
pub fn stage_key(step: usize, substep: usize) -> String {
    if Some(step) == sub_staged_step() {
        let letter = (b'a' + (substep % 26) as u8) as char;
        format!("{step}{letter}")
    } else {
        step.to_string()
    }
}

pub fn required_advisors(key: &str) -> &'static [&'static str] {
    ADVISOR_REQUIREMENTS
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, advisors)| *advisors)
        .unwrap_or(&[])
}

/// Human label for a section of the sub-staged stage.
pub fn section_label(substep: usize) -> String {
    COPY_SECTIONS
        .get(substep)
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("section {}", substep + 1))
}

/// Tool names that map to a stage, in plan order.
pub fn plan_tools() -> Vec<&'static str> {
    STEP_PLAN.iter().map(|s| s.tool).collect()
}

/// Check the structural assumptions about `STEP_PLAN`.
pub fn validate_plan() -> Result<(), PlanError> {
    let sub_staged = STEP_PLAN.iter().filter(|s| s.sub_stages.is_some()).count();
    if sub_staged != 1 {
        return Err(PlanError::SubStagedCount(sub_staged));
    }
    if deploy_step().is_none() {
        return Err(PlanError::MissingDeployStage);
    }
    let mut seen = BTreeSet::new();
    for tool in plan_tools() {
        if !seen.insert(tool) {
            return Err(PlanError::DuplicateTool(tool.to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_is_valid() {
        validate_plan().unwrap();
        assert_eq!(STEP_PLAN.len(), 8);
        assert_eq!(sub_staged_step(), Some(2));
        assert_eq!(deploy_step(), Some(6));
        assert_eq!(step(2).and_then(StepDefinition::sub_stage_count), Some(5));
    }

    #[test]
    fn test_stage_keys() {
        assert_eq!(stage_key(0, 0), "0");
        assert_eq!(stage_key(2, 0), "2a");
        assert_eq!(stage_key(2, 4), "2e");
        assert_eq!(stage_key(5, 3), "5");
    }

    #[test]
    fn test_required_advisors_lookup() {
        assert_eq!(required_advisors("0"), &["positioning_strategist"]);
        assert_eq!(
            required_advisors("2e"),
            &["conversion_copywriter", "cro_specialist"]
        );
        assert!(required_advisors("1").is_empty());
        assert!(required_advisors("2z").is_empty());
    }

    #[test]
    fn test_every_required_advisor_is_known() {
        for (_, advisors) in ADVISOR_REQUIREMENTS {
            for advisor in *advisors {
                assert!(KNOWN_ADVISORS.contains(advisor), "{advisor}");
            }
        }
    }

    #[test]
    fn test_tool_targets() {
        assert_eq!(tool_target("save_brief", 0), Some(0));
        assert_eq!(tool_target("generate_design", 1), Some(3));
        assert_eq!(tool_target("consult_advisor", 0), None);
        assert_eq!(tool_target("nonexistent", 0), None);
    }

    #[test]
    fn test_review_tool_is_gated() {
        assert_eq!(tool_target("run_quality_review", 2), None);
        assert_eq!(tool_target("run_quality_review", 3), None);
        assert_eq!(tool_target("run_quality_review", 4), Some(5));
        assert_eq!(tool_target("run_quality_review", 5), Some(5));
    }

    #[test]
    fn test_section_labels() {
        assert_eq!(section_label(0), "hero");
        assert_eq!(section_label(4), "call to action");
        assert_eq!(section_label(9), "section 10");
    }
}
