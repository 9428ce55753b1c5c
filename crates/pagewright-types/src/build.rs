//! Build session types.
//!
//! A [`BuildSession`] is the per-project, resumable record of how far the
//! landing-page pipeline has progressed. The transition rules live in
//! `pagewright-core::build::session`; this module only defines the data shapes
//! and the wire formats exchanged with clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::project::ProjectId;

/// How the agent drives the pipeline.
///
/// - Interactive: pauses at checkpoint stages for human review
/// - Autonomous: runs end-to-end, narrating progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    Interactive,
    Autonomous,
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildMode::Interactive => write!(f, "interactive"),
            BuildMode::Autonomous => write!(f, "autonomous"),
        }
    }
}

impl FromStr for BuildMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "interactive" => Ok(BuildMode::Interactive),
            "autonomous" => Ok(BuildMode::Autonomous),
            other => Err(format!("invalid build mode: '{other}'")),
        }
    }
}

/// Status of a single pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Active,
    Complete,
    Error,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "pending"),
            StepStatus::Active => write!(f, "active"),
            StepStatus::Complete => write!(f, "complete"),
            StepStatus::Error => write!(f, "error"),
        }
    }
}

/// Observable state of one stage inside a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepState {
    pub name: String,
    pub status: StepStatus,
}

/// Per-project build state.
///
/// Invariants maintained by the core transition functions:
/// - `current_step` never decreases
/// - every stage before `current_step` is `Complete`
/// - `advisors_consulted` is cleared whenever `current_step` or
///   `current_substep` changes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildSession {
    pub project_id: ProjectId,
    pub mode: BuildMode,
    pub current_step: usize,
    pub current_substep: usize,
    pub steps: Vec<StepState>,
    /// Everything the tools have produced so far, keyed by artifact name.
    #[serde(default)]
    pub artifacts: BTreeMap<String, serde_json::Value>,
    /// Advisors consulted since the last stage or sub-stage change.
    #[serde(default)]
    pub advisors_consulted: BTreeSet<String>,
    /// Optimistic concurrency stamp, bumped by the store on every save.
    #[serde(default)]
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BuildSession {
    /// Create a fresh session over the given stage names. The first stage
    /// starts `Active`, the rest `Pending`.
    pub fn new<S: AsRef<str>>(project_id: ProjectId, mode: BuildMode, stage_names: &[S]) -> Self {
        let now = Utc::now();
        let steps = stage_names
            .iter()
            .enumerate()
            .map(|(i, name)| StepState {
                name: name.as_ref().to_string(),
                status: if i == 0 {
                    StepStatus::Active
                } else {
                    StepStatus::Pending
                },
            })
            .collect();

        Self {
            project_id,
            mode,
            current_step: 0,
            current_substep: 0,
            steps,
            artifacts: BTreeMap::new(),
            advisors_consulted: BTreeSet::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Status of the stage at `index`, if it exists.
    pub fn status_of(&self, index: usize) -> Option<StepStatus> {
        self.steps.get(index).map(|s| s.status)
    }

    pub fn is_finished(&self) -> bool {
        self.steps
            .last()
            .is_some_and(|s| s.status == StepStatus::Complete)
    }
}

/// Instruction sent to the client at the end of every streamed turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEndSignal {
    /// Pause for human review.
    Checkpoint {
        step: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        substep: Option<usize>,
        prompt: String,
    },
    /// Send another turn to keep going.
    Continue { step: usize },
    /// An asynchronous stage is running; poll `poll_url` until it settles.
    Poll { step: usize, poll_url: String },
    /// The pipeline has finished.
    Complete { result: serde_json::Value },
}

impl StreamEndSignal {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEndSignal::Checkpoint { .. } => "checkpoint",
            StreamEndSignal::Continue { .. } => "continue",
            StreamEndSignal::Poll { .. } => "poll",
            StreamEndSignal::Complete { .. } => "complete",
        }
    }
}

/// One framed event in the outbound build stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BuildEvent {
    /// Assistant text tokens as they arrive from the model.
    TextDelta { delta: String },
    /// Verbatim output of an advisor consultation, attributed to the advisor.
    AdvisorSegment { advisor: String, content: String },
    /// Terminal instruction. Exactly one per completed turn.
    End { signal: StreamEndSignal },
    /// The turn failed after streaming began.
    Error { message: String },
}

impl BuildEvent {
    /// SSE event name for this event.
    pub fn event_name(&self) -> &'static str {
        match self {
            BuildEvent::TextDelta { .. } => "text",
            BuildEvent::AdvisorSegment { .. } => "advisor",
            BuildEvent::End { .. } => "end",
            BuildEvent::Error { .. } => "error",
        }
    }
}

/// Inbound turn shapes accepted by the build stream endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BuildTurnRequest {
    /// Choose (or switch) the build mode; creates the session on first use.
    ModeSelect { mode: BuildMode },
    /// A free-form user message.
    User { content: String },
    /// Resume, optionally jumping forward to an explicit stage.
    Continue {
        #[serde(default)]
        step: Option<usize>,
        #[serde(default)]
        substep: Option<usize>,
    },
}

impl BuildTurnRequest {
    /// Shape checks that do not need session state.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            BuildTurnRequest::User { content } if content.trim().is_empty() => {
                Err("user message content must not be empty".to_string())
            }
            BuildTurnRequest::Continue {
                step: None,
                substep: Some(_),
            } => Err("substep requires an explicit step".to_string()),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<&'static str> {
        vec!["Brief", "Wireframe", "Copy"]
    }

    #[test]
    fn test_new_session_first_stage_active() {
        let s = BuildSession::new(ProjectId::new(), BuildMode::Interactive, &names());
        assert_eq!(s.current_step, 0);
        assert_eq!(s.status_of(0), Some(StepStatus::Active));
        assert_eq!(s.status_of(1), Some(StepStatus::Pending));
        assert_eq!(s.status_of(3), None);
        assert!(!s.is_finished());
        assert_eq!(s.version, 0);
    }

    #[test]
    fn test_build_mode_parse() {
        assert_eq!("Autonomous".parse::<BuildMode>().unwrap(), BuildMode::Autonomous);
        assert!("manual".parse::<BuildMode>().is_err());
    }

    #[test]
    fn test_signal_wire_format() {
        let signal = StreamEndSignal::Poll {
            step: 6,
            poll_url: "/x".into(),
        };
        let json = serde_json::to_value(&signal).unwrap();
        assert_eq!(json["type"], "poll");
        assert_eq!(json["step"], 6);
        assert_eq!(json["poll_url"], "/x");

        let checkpoint = StreamEndSignal::Checkpoint {
            step: 0,
            substep: None,
            prompt: "Brief is ready for review".into(),
        };
        let json = serde_json::to_value(&checkpoint).unwrap();
        assert!(json.get("substep").is_none());
    }

    #[test]
    fn test_turn_request_parse_and_validate() {
        let req: BuildTurnRequest =
            serde_json::from_str(r#"{"type":"mode_select","mode":"autonomous"}"#).unwrap();
        assert_eq!(
            req,
            BuildTurnRequest::ModeSelect {
                mode: BuildMode::Autonomous
            }
        );

        let req: BuildTurnRequest = serde_json::from_str(r#"{"type":"continue"}"#).unwrap();
        assert!(req.validate().is_ok());

        let req: BuildTurnRequest =
            serde_json::from_str(r#"{"type":"user","content":"   "}"#).unwrap();
        assert!(req.validate().is_err());

        let req: BuildTurnRequest =
            serde_json::from_str(r#"{"type":"continue","substep":2}"#).unwrap();
        assert!(req.validate().is_err());

        assert!(serde_json::from_str::<BuildTurnRequest>(r#"{"type":"launch"}"#).is_err());
    }

    #[test]
    fn test_event_names() {
        let ev = BuildEvent::AdvisorSegment {
            advisor: "cro_specialist".into(),
            content: "Shorten the CTA".into(),
        };
        assert_eq!(ev.event_name(), "advisor");
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "advisor_segment");
    }
}
