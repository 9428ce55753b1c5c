//! Inbound turn preparation and execution, shared by the SSE endpoint and
//! `pagewright build send`.
//!
//! Preparation runs every check that can reject a turn (shape, project,
//! credentials, session lookup) before anything is streamed. Execution then
//! drives the build loop under the configured wall-clock budget.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use pagewright_core::build::plan;
use pagewright_core::build::prompt::PromptComposer;
use pagewright_core::build::session::{BuildSessionExt, new_build_session};
use pagewright_core::build::store::BuildSessionStore;
use pagewright_core::repository::project::ProjectRepository;
use pagewright_types::build::{BuildEvent, BuildSession, BuildTurnRequest};
use pagewright_types::error::ProjectError;
use pagewright_types::project::{Project, ProjectId};

use crate::http::error::AppError;
use crate::state::{AppState, ConcreteBuildLoop};

/// Outbound channel depth between the build loop and the stream writer.
pub const EVENT_BUFFER: usize = 64;

/// Everything needed to run one turn, resolved up front.
pub struct PreparedTurn {
    pub project: Project,
    pub session: BuildSession,
    pub message: String,
    pub system_prompt: String,
    pub build_loop: Arc<ConcreteBuildLoop>,
    pub budget: Duration,
}

/// Validate the request and resolve the project, session, and build loop.
///
/// Errors here map to 400/404/500 responses; nothing has been mutated yet.
pub async fn prepare_turn(
    state: &AppState,
    project_id: &ProjectId,
    request: &BuildTurnRequest,
) -> Result<PreparedTurn, AppError> {
    request.validate().map_err(AppError::Validation)?;

    let project = state
        .projects
        .get_by_id(project_id)
        .await?
        .ok_or(ProjectError::NotFound)?;
    let build_loop = state
        .require_build_loop()
        .map_err(AppError::Configuration)?;

    let existing = state.sessions.load_session(project_id).await?;
    let (session, message) = apply_request(existing, project.id, request)?;
    let system_prompt = state.composer.compose(&project, session.mode);

    Ok(PreparedTurn {
        project,
        session,
        message,
        system_prompt,
        build_loop,
        budget: Duration::from_secs(state.config.turn_timeout_secs),
    })
}

/// Apply an inbound turn to the stored session (if any) and derive the
/// message the agent receives.
pub fn apply_request(
    existing: Option<BuildSession>,
    project_id: ProjectId,
    request: &BuildTurnRequest,
) -> Result<(BuildSession, String), AppError> {
    match (request, existing) {
        (BuildTurnRequest::ModeSelect { mode }, None) => Ok((
            new_build_session(project_id, *mode),
            format!("Start building the landing page in {mode} mode."),
        )),
        (BuildTurnRequest::ModeSelect { mode }, Some(mut session)) => {
            let message = if session.mode == *mode {
                format!("Carry on in {mode} mode.")
            } else {
                session.mode = *mode;
                format!("Switch to {mode} mode and carry on from the current stage.")
            };
            Ok((session, message))
        }
        (_, None) => Err(AppError::Validation(
            "no build session for this project; send mode_select first".to_string(),
        )),
        (BuildTurnRequest::User { content }, Some(session)) => {
            Ok((session, content.trim().to_string()))
        }
        (BuildTurnRequest::Continue { step, substep }, Some(mut session)) => {
            let Some(step) = *step else {
                return Ok((session, "Continue.".to_string()));
            };
            let Some(definition) = plan::step(step) else {
                return Err(AppError::Validation(format!(
                    "step {step} is out of range (0..={})",
                    plan::last_step()
                )));
            };
            let message = if session.continue_to(step, *substep) {
                if definition.sub_stages.is_some() {
                    format!(
                        "Continue with the {} section of {}.",
                        plan::section_label(session.current_substep),
                        definition.name
                    )
                } else {
                    format!("Continue from the {} stage.", definition.name)
                }
            } else {
                "Continue.".to_string()
            };
            Ok((session, message))
        }
    }
}

/// Run a prepared turn, sending events to `events`.
///
/// Failures after streaming has begun, including running out of time,
/// become a single `BuildEvent::Error`. State committed by completed rounds
/// stays in the store.
pub async fn run_prepared(turn: PreparedTurn, events: mpsc::Sender<BuildEvent>) {
    let PreparedTurn {
        project,
        mut session,
        message,
        system_prompt,
        build_loop,
        budget,
    } = turn;
    let project_id = project.id;

    let outcome = tokio::time::timeout(
        budget,
        build_loop.run_turn(&mut session, &project, &system_prompt, &message, &events),
    )
    .await;

    let failure = match outcome {
        Ok(Ok(_)) => return,
        Ok(Err(e)) => e.to_string(),
        Err(_) => format!("turn exceeded its {}s budget", budget.as_secs()),
    };
    tracing::error!(%project_id, error = %failure, "build turn failed");
    let _ = events.send(BuildEvent::Error { message: failure }).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagewright_types::build::{BuildMode, StepStatus};

    fn existing(step: usize) -> BuildSession {
        let mut session = new_build_session(ProjectId::new(), BuildMode::Interactive);
        if step > 0 {
            session.continue_to(step, None);
        }
        session
    }

    #[test]
    fn test_mode_select_creates_session() {
        let id = ProjectId::new();
        let (session, message) = apply_request(
            None,
            id,
            &BuildTurnRequest::ModeSelect {
                mode: BuildMode::Autonomous,
            },
        )
        .unwrap();
        assert_eq!(session.project_id, id);
        assert_eq!(session.mode, BuildMode::Autonomous);
        assert_eq!(session.version, 0);
        assert!(message.contains("autonomous"));
    }

    #[test]
    fn test_mode_select_switches_existing_mode() {
        let session = existing(3);
        let (session, message) = apply_request(
            Some(session),
            ProjectId::new(),
            &BuildTurnRequest::ModeSelect {
                mode: BuildMode::Autonomous,
            },
        )
        .unwrap();
        assert_eq!(session.mode, BuildMode::Autonomous);
        assert_eq!(session.current_step, 3);
        assert!(message.starts_with("Switch"));
    }

    #[test]
    fn test_user_turn_requires_session() {
        let request = BuildTurnRequest::User {
            content: "hello".into(),
        };
        assert!(matches!(
            apply_request(None, ProjectId::new(), &request),
            Err(AppError::Validation(_))
        ));

        let (_, message) = apply_request(
            Some(existing(0)),
            ProjectId::new(),
            &BuildTurnRequest::User {
                content: "  make it punchier ".into(),
            },
        )
        .unwrap();
        assert_eq!(message, "make it punchier");
    }

    #[test]
    fn test_continue_to_explicit_step_moves_forward() {
        let (session, message) = apply_request(
            Some(existing(6)),
            ProjectId::new(),
            &BuildTurnRequest::Continue {
                step: Some(7),
                substep: None,
            },
        )
        .unwrap();
        assert_eq!(session.current_step, 7);
        assert_eq!(session.status_of(6), Some(StepStatus::Complete));
        assert_eq!(message, "Continue from the Launch stage.");
    }

    #[test]
    fn test_continue_backwards_is_ignored() {
        let (session, message) = apply_request(
            Some(existing(4)),
            ProjectId::new(),
            &BuildTurnRequest::Continue {
                step: Some(1),
                substep: None,
            },
        )
        .unwrap();
        assert_eq!(session.current_step, 4);
        assert_eq!(message, "Continue.");
    }

    #[test]
    fn test_continue_to_copy_section_names_it() {
        let (session, message) = apply_request(
            Some(existing(2)),
            ProjectId::new(),
            &BuildTurnRequest::Continue {
                step: Some(2),
                substep: Some(3),
            },
        )
        .unwrap();
        assert_eq!(session.current_substep, 3);
        assert_eq!(message, "Continue with the social proof section of Copy.");
    }

    #[test]
    fn test_continue_out_of_range_rejected() {
        let result = apply_request(
            Some(existing(0)),
            ProjectId::new(),
            &BuildTurnRequest::Continue {
                step: Some(42),
                substep: None,
            },
        );
        assert!(matches!(result, Err(AppError::Validation(m)) if m.contains("42")));
    }

    #[tokio::test]
    async fn test_prepare_turn_boundary_errors() {
        let state = crate::state::test_support::test_state().await;

        let malformed = BuildTurnRequest::User {
            content: " ".into(),
        };
        assert!(matches!(
            prepare_turn(&state, &ProjectId::new(), &malformed).await,
            Err(AppError::Validation(_))
        ));

        let request = BuildTurnRequest::ModeSelect {
            mode: BuildMode::Interactive,
        };
        assert!(matches!(
            prepare_turn(&state, &ProjectId::new(), &request).await,
            Err(AppError::Project(ProjectError::NotFound))
        ));

        let project = state
            .projects
            .create(&Project::new("Acme", None))
            .await
            .unwrap();
        assert!(matches!(
            prepare_turn(&state, &project.id, &request).await,
            Err(AppError::Configuration(_))
        ));
    }
}
