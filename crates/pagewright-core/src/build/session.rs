//! Build session transition logic.
//!
//! The `BuildSession` struct lives in `pagewright-types`; this module provides
//! an extension trait (`BuildSessionExt`) with the monotonic transition
//! functions over it: stage advancement from tool invocations, sub-stage
//! advancement, explicit forward jumps, and advisor bookkeeping.

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::debug;

use pagewright_types::build::{BuildMode, BuildSession, StepStatus};
use pagewright_types::project::ProjectId;

use super::plan;

/// Create a fresh session over the full pipeline.
pub fn new_build_session(project_id: ProjectId, mode: BuildMode) -> BuildSession {
    BuildSession::new(project_id, mode, &plan::step_names())
}

/// Extension trait for `BuildSession` state transitions.
pub trait BuildSessionExt {
    /// Advance to the furthest stage reached by a batch of successful tool
    /// invocations. Returns whether `current_step` moved.
    fn advance_step(&mut self, invoked_tools: &[&str]) -> bool;

    /// Move to the next section of the sub-staged stage, rolling over into
    /// the next stage after the last section. Returns whether a stage-level
    /// advance occurred. No-op outside the sub-staged stage.
    fn advance_substep(&mut self) -> bool;

    /// Force the session forward to `step` (and optionally a section within
    /// it). Requests that do not move forward are ignored.
    fn continue_to(&mut self, step: usize, substep: Option<usize>) -> bool;

    /// Flag the stage a failed tool was trying to produce.
    fn mark_tool_failed(&mut self, tool: &str);

    /// Record that an advisor was consulted in the current window.
    fn track_advisor_call(&mut self, advisor: &str);

    /// `None` when every advisor required at the current position has been
    /// consulted; otherwise a corrective instruction naming the missing ones.
    fn check_advisor_requirements(&self) -> Option<String>;

    /// Requirement key for the current position.
    fn stage_key(&self) -> String;

    fn merge_artifacts(&mut self, artifacts: BTreeMap<String, serde_json::Value>);
}

impl BuildSessionExt for BuildSession {
    fn advance_step(&mut self, invoked_tools: &[&str]) -> bool {
        let current = self.current_step;
        let max_step = invoked_tools
            .iter()
            .filter_map(|name| {
                let target = plan::tool_target(name, current);
                if target.is_none() {
                    debug!(tool = %name, step = current, "tool does not advance the pipeline");
                }
                target
            })
            .max();

        let Some(max_step) = max_step else {
            return false;
        };
        if max_step <= current || max_step >= self.steps.len() {
            return false;
        }

        complete_through(self, max_step);
        activate(self, max_step + 1);
        move_to(self, max_step, 0);
        true
    }

    fn advance_substep(&mut self) -> bool {
        let Some(sub_staged) = plan::sub_staged_step() else {
            return false;
        };
        if self.current_step != sub_staged {
            return false;
        }
        let count = plan::step(sub_staged)
            .and_then(|s| s.sub_stage_count())
            .unwrap_or(0);

        let next_substep = self.current_substep + 1;
        if next_substep < count {
            move_to(self, sub_staged, next_substep);
            return false;
        }

        if let Some(step) = self.steps.get_mut(sub_staged) {
            step.status = StepStatus::Complete;
        }
        let next = sub_staged + 1;
        if next < self.steps.len() {
            activate(self, next);
            move_to(self, next, 0);
        } else {
            move_to(self, sub_staged, 0);
        }
        true
    }

    fn continue_to(&mut self, step: usize, substep: Option<usize>) -> bool {
        if step >= self.steps.len() {
            return false;
        }

        let section_count = plan::step(step).and_then(|s| s.sub_stage_count());
        let substep = match (substep, section_count) {
            (Some(s), Some(count)) if s < count => s,
            _ => 0,
        };

        if step > self.current_step {
            complete_through(self, step);
            activate(self, step + 1);
            move_to(self, step, substep);
            return true;
        }

        // Forward jump between sections of the current stage.
        if step == self.current_step && section_count.is_some() && substep > self.current_substep {
            move_to(self, step, substep);
            return true;
        }

        false
    }

    fn mark_tool_failed(&mut self, tool: &str) {
        let Some(target) = plan::tool_target(tool, self.current_step) else {
            return;
        };
        if target <= self.current_step {
            return;
        }
        if let Some(step) = self.steps.get_mut(target) {
            if step.status != StepStatus::Complete {
                step.status = StepStatus::Error;
            }
        }
    }

    fn track_advisor_call(&mut self, advisor: &str) {
        self.advisors_consulted.insert(advisor.to_string());
    }

    fn check_advisor_requirements(&self) -> Option<String> {
        let key = self.stage_key();
        let missing: Vec<&str> = plan::required_advisors(&key)
            .iter()
            .filter(|advisor| !self.advisors_consulted.contains(**advisor))
            .copied()
            .collect();

        if missing.is_empty() {
            return None;
        }

        let target = if Some(self.current_step) == plan::sub_staged_step() {
            format!("the {} section", plan::section_label(self.current_substep))
        } else {
            let name = plan::step(self.current_step).map_or("current", |s| s.name);
            format!("the {name} stage")
        };

        Some(format!(
            "Before presenting {target}, you must consult the following advisor(s) with the \
             {} tool: {}. Incorporate their feedback, then continue.",
            plan::ADVISOR_TOOL,
            missing.join(", ")
        ))
    }

    fn stage_key(&self) -> String {
        plan::stage_key(self.current_step, self.current_substep)
    }

    fn merge_artifacts(&mut self, artifacts: BTreeMap<String, serde_json::Value>) {
        if artifacts.is_empty() {
            return;
        }
        self.artifacts.extend(artifacts);
        self.updated_at = Utc::now();
    }
}

/// Mark every stage up to and including `step` complete.
fn complete_through(session: &mut BuildSession, step: usize) {
    for state in session.steps.iter_mut().take(step + 1) {
        state.status = StepStatus::Complete;
    }
}

fn activate(session: &mut BuildSession, step: usize) {
    if let Some(state) = session.steps.get_mut(step) {
        if state.status != StepStatus::Complete {
            state.status = StepStatus::Active;
        }
    }
}

/// Set the position. The advisor window belongs to a position, so it is
/// cleared on every move.
fn move_to(session: &mut BuildSession, step: usize, substep: usize) {
    session.current_step = step;
    session.current_substep = substep;
    session.advisors_consulted.clear();
    session.updated_at = Utc::now();
}
