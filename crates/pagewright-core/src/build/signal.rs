//! End-of-turn signal resolution.

use pagewright_types::build::{BuildMode, BuildSession, StreamEndSignal};

use super::plan;

/// Path clients poll while the deploy stage is running.
pub fn deployment_poll_url(session: &BuildSession) -> String {
    format!("/api/v1/projects/{}/deployment", session.project_id)
}

/// Derive the instruction the client receives at the end of a turn.
///
/// Total over every session state: precedence is complete, poll,
/// checkpoint (interactive only), continue.
pub fn determine_signal(session: &BuildSession) -> StreamEndSignal {
    let step = session.current_step;

    if session.is_finished() {
        return StreamEndSignal::Complete {
            result: serde_json::to_value(&session.artifacts).unwrap_or_default(),
        };
    }

    if plan::deploy_step() == Some(step) {
        return StreamEndSignal::Poll {
            step,
            poll_url: deployment_poll_url(session),
        };
    }

    let definition = plan::step(step);
    let is_checkpoint = definition.is_some_and(|d| d.is_checkpoint);
    if session.mode == BuildMode::Interactive && is_checkpoint {
        if definition.is_some_and(|d| d.sub_stages.is_some()) {
            let label = plan::section_label(session.current_substep);
            return StreamEndSignal::Checkpoint {
                step,
                substep: Some(session.current_substep),
                prompt: format!("The {label} section is ready for review"),
            };
        }
        let name = definition.map_or("This stage", |d| d.name);
        return StreamEndSignal::Checkpoint {
            step,
            substep: None,
            prompt: format!("{name} is ready for review"),
        };
    }

    StreamEndSignal::Continue { step }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::session::{BuildSessionExt, new_build_session};
    use pagewright_types::build::StepStatus;
    use pagewright_types::project::ProjectId;

    fn session(step: usize, mode: BuildMode) -> BuildSession {
        let mut s = new_build_session(ProjectId::new(), mode);
        if step > 0 {
            s.continue_to(step, None);
        }
        s
    }

    #[test]
    fn test_interactive_checkpoint_stage() {
        let signal = determine_signal(&session(0, BuildMode::Interactive));
        assert_eq!(
            signal,
            StreamEndSignal::Checkpoint {
                step: 0,
                substep: None,
                prompt: "Brief is ready for review".into(),
            }
        );
    }

    #[test]
    fn test_interactive_non_checkpoint_stage_continues() {
        let signal = determine_signal(&session(1, BuildMode::Interactive));
        assert_eq!(signal, StreamEndSignal::Continue { step: 1 });
    }

    #[test]
    fn test_autonomous_ignores_checkpoints() {
        let signal = determine_signal(&session(0, BuildMode::Autonomous));
        assert_eq!(signal, StreamEndSignal::Continue { step: 0 });
    }

    #[test]
    fn test_deploy_stage_polls() {
        for mode in [BuildMode::Interactive, BuildMode::Autonomous] {
            let s = session(6, mode);
            let signal = determine_signal(&s);
            assert_eq!(
                signal,
                StreamEndSignal::Poll {
                    step: 6,
                    poll_url: format!("/api/v1/projects/{}/deployment", s.project_id),
                }
            );
        }
    }

    #[test]
    fn test_complete_carries_artifacts() {
        let mut s = session(7, BuildMode::Interactive);
        s.artifacts
            .insert("siteUrl".into(), serde_json::json!("https://acme.example.com"));
        assert_eq!(s.steps[7].status, StepStatus::Complete);

        match determine_signal(&s) {
            StreamEndSignal::Complete { result } => {
                assert_eq!(result["siteUrl"], s.artifacts["siteUrl"]);
            }
            other => panic!("expected complete, got {other:?}"),
        }
    }

    #[test]
    fn test_copy_checkpoint_names_section() {
        let mut s = session(2, BuildMode::Interactive);
        s.continue_to(2, Some(3));
        assert_eq!(
            determine_signal(&s),
            StreamEndSignal::Checkpoint {
                step: 2,
                substep: Some(3),
                prompt: "The social proof section is ready for review".into(),
            }
        );
    }

    #[test]
    fn test_signal_is_total() {
        let statuses = [
            StepStatus::Pending,
            StepStatus::Active,
            StepStatus::Complete,
            StepStatus::Error,
        ];
        for mode in [BuildMode::Interactive, BuildMode::Autonomous] {
            for step in 0..plan::STEP_PLAN.len() {
                for substep in 0..5 {
                    for last in statuses {
                        let mut s = session(step, mode);
                        s.current_substep = substep;
                        if let Some(final_step) = s.steps.last_mut() {
                            final_step.status = last;
                        }

                        let signal = determine_signal(&s);
                        let is_complete = matches!(signal, StreamEndSignal::Complete { .. });
                        assert_eq!(is_complete, last == StepStatus::Complete);

                        if !is_complete && mode == BuildMode::Autonomous && step != 6 {
                            assert_eq!(signal, StreamEndSignal::Continue { step });
                        }
                    }
                }
            }
        }
    }
}
