//! The build loop: drives the model through one inbound turn.
//!
//! A turn runs at most `max_rounds` model rounds. Each round streams text
//! to the caller, executes the requested tools concurrently, advances the
//! session, and commits it to the store. Advisor requirements are checked
//! after every round, text-only or not, with a bounded number of corrective
//! retries. The turn ends with exactly one `BuildEvent::End` carrying the
//! `StreamEndSignal`.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::{Stream, StreamExt};
use pin_project_lite::pin_project;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, field, info, info_span, warn};

use pagewright_types::build::{BuildEvent, BuildMode, BuildSession, StreamEndSignal};
use pagewright_types::config::GlobalConfig;
use pagewright_types::conversation::ConversationTurn;
use pagewright_types::error::RepositoryError;
use pagewright_types::llm::{
    CompletionRequest, ContentBlock, LlmError, Message, MessageRole, StreamEvent, Usage,
};
use pagewright_types::project::Project;
use pagewright_types::tool::{ToolCall, ToolInvocation};

use super::plan;
use super::prompt::render_build_state;
use super::session::BuildSessionExt;
use super::signal::determine_signal;
use super::store::BuildSessionStore;
use super::tool::{ToolRegistry, TurnContext};
use crate::llm::box_provider::BoxLlmProvider;

/// Bounds and model parameters for the build loop.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: Option<f64>,
    pub max_rounds: usize,
    pub history_window: usize,
    pub enforcement_retries: usize,
}

impl From<&GlobalConfig> for LoopConfig {
    fn from(config: &GlobalConfig) -> Self {
        Self {
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            max_rounds: config.max_rounds,
            history_window: config.history_window,
            enforcement_retries: config.enforcement_retries,
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::from(&GlobalConfig::default())
    }
}

/// Errors that end a turn after streaming has begun.
#[derive(Debug, thiserror::Error)]
pub enum BuildLoopError {
    #[error("model call failed: {0}")]
    Model(#[from] LlmError),

    #[error("session store failed: {0}")]
    Store(#[from] RepositoryError),
}

/// What one model round produced.
#[derive(Debug, Default)]
struct RoundOutput {
    text: String,
    tool_calls: Vec<ToolCall>,
    usage: Usage,
}

/// What folding one round's tool results did to the session.
#[derive(Debug, Default)]
struct RoundEffects {
    /// Sections moved past after a successful write (autonomous mode).
    sections_advanced: usize,
    /// Correction for a section that was moved past with advisors missing.
    section_correction: Option<String>,
}

/// Drives one turn at a time for a project's build session.
pub struct BuildLoop<S> {
    provider: BoxLlmProvider,
    tools: Arc<ToolRegistry>,
    store: Arc<S>,
    config: LoopConfig,
}

impl<S: BuildSessionStore> BuildLoop<S> {
    pub fn new(
        provider: BoxLlmProvider,
        tools: Arc<ToolRegistry>,
        store: Arc<S>,
        config: LoopConfig,
    ) -> Self {
        Self {
            provider,
            tools,
            store,
            config,
        }
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Run one inbound turn.
    ///
    /// `session` is committed to the store after every tool round and once
    /// more at the end. Events are sent to `events` as they happen; a closed
    /// receiver does not stop the turn.
    pub async fn run_turn(
        &self,
        session: &mut BuildSession,
        project: &Project,
        system_prompt: &str,
        user_message: &str,
        events: &mpsc::Sender<BuildEvent>,
    ) -> Result<StreamEndSignal, BuildLoopError> {
        let span = info_span!(
            "build_turn",
            project_id = %session.project_id,
            mode = %session.mode,
            step = session.current_step,
            gen_ai.operation.name = "chat",
            gen_ai.system = self.provider.name(),
            gen_ai.request.model = %self.config.model,
            gen_ai.usage.input_tokens = field::Empty,
            gen_ai.usage.output_tokens = field::Empty,
        );
        let turn_span = span.clone();

        async move {
            let project_id = session.project_id;

            let mut history = self.store.load_history(&project_id).await?;
            let user_turn = ConversationTurn::user(user_message);
            self.store
                .append_history(&project_id, std::slice::from_ref(&user_turn))
                .await?;
            history.append(user_turn);

            let mut messages = history.to_messages(self.config.history_window);
            let tool_definitions = self.tools.definitions();
            let mut ctx = TurnContext::new(project.clone(), session);

            let mut assistant_text = String::new();
            let mut usage = Usage::default();
            let mut retries_used = 0;
            let mut rounds = 0;

            while rounds < self.config.max_rounds {
                rounds += 1;

                let request = CompletionRequest {
                    model: self.config.model.clone(),
                    messages: messages.clone(),
                    system: Some(format!("{system_prompt}\n\n{}", render_build_state(session))),
                    max_tokens: self.config.max_tokens,
                    temperature: self.config.temperature,
                    stream: true,
                    stop_sequences: None,
                    tools: tool_definitions.clone(),
                };

                let round = self.stream_round(request, events, rounds).await?;
                usage.input_tokens += round.usage.input_tokens;
                usage.output_tokens += round.usage.output_tokens;

                if !round.text.is_empty() {
                    if !assistant_text.is_empty() {
                        assistant_text.push_str("\n\n");
                    }
                    assistant_text.push_str(&round.text);
                }

                if round.tool_calls.is_empty() {
                    let unmet = enforced_requirements(session);
                    match self.gate(unmet, &session.stage_key(), &mut retries_used) {
                        Some(correction) => {
                            if !round.text.is_empty() {
                                messages.push(assistant_message(&round));
                            }
                            push_user_text(&mut messages, correction);
                            continue;
                        }
                        None => {
                            debug!(round = rounds, "model finished without tool calls");
                            break;
                        }
                    }
                }

                info!(
                    round = rounds,
                    tools = ?round.tool_calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
                    "executing tool calls"
                );
                let invocations = self.tools.execute_all(&ctx, &round.tool_calls).await;

                let effects = self.apply_invocations(session, &invocations, events).await;
                session.version = self.store.save_session(session).await?;
                ctx.sync(session);

                messages.push(assistant_message(&round));
                let mut results = tool_result_message(&invocations);

                // Sections already moved past were checked at their own position.
                let unmet = if effects.sections_advanced > 0 {
                    effects.section_correction
                } else {
                    enforced_requirements(session)
                };
                if let Some(correction) =
                    self.gate(unmet, &session.stage_key(), &mut retries_used)
                {
                    results.content.push(ContentBlock::Text { text: correction });
                }
                messages.push(results);

                if rounds == self.config.max_rounds {
                    warn!(max_rounds = self.config.max_rounds, "round limit reached");
                }
            }

            turn_span.record("gen_ai.usage.input_tokens", usage.input_tokens);
            turn_span.record("gen_ai.usage.output_tokens", usage.output_tokens);

            if !assistant_text.trim().is_empty() {
                self.store
                    .append_history(&project_id, &[ConversationTurn::assistant(&assistant_text)])
                    .await?;
            }

            let signal = determine_signal(session);
            if matches!(signal, StreamEndSignal::Checkpoint { .. }) && session.advance_substep() {
                debug!(step = session.current_step, "section rollover advanced the stage");
            }
            session.version = self.store.save_session(session).await?;

            info!(
                rounds,
                signal = signal.kind(),
                step = session.current_step,
                substep = session.current_substep,
                "build turn complete"
            );
            emit(
                events,
                BuildEvent::End {
                    signal: signal.clone(),
                },
            )
            .await;
            Ok(signal)
        }
        .instrument(span)
        .await
    }

    /// Stream one model call, forwarding text deltas as they arrive.
    async fn stream_round(
        &self,
        request: CompletionRequest,
        events: &mpsc::Sender<BuildEvent>,
        round: usize,
    ) -> Result<RoundOutput, LlmError> {
        let span = info_span!(
            "gen_ai.stream",
            gen_ai.system = self.provider.name(),
            gen_ai.request.model = %request.model,
            gen_ai.request.max_tokens = request.max_tokens,
            gen_ai.request.temperature = ?request.temperature,
            round,
        );
        let mut stream = StreamInSpan::new(self.provider.stream(request), span);
        let mut out = RoundOutput::default();

        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::TextDelta { text, .. } => {
                    out.text.push_str(&text);
                    emit(events, BuildEvent::TextDelta { delta: text }).await;
                }
                StreamEvent::ToolUseComplete { id, name, input } => {
                    out.tool_calls.push(ToolCall { id, name, input });
                }
                StreamEvent::Usage(usage) => {
                    out.usage.input_tokens = out.usage.input_tokens.max(usage.input_tokens);
                    out.usage.output_tokens = out.usage.output_tokens.max(usage.output_tokens);
                }
                StreamEvent::MessageDelta { stop_reason } => {
                    debug!(%stop_reason, "model stopped");
                }
                StreamEvent::Done => break,
                _ => {}
            }
        }

        Ok(out)
    }

    /// Decide whether an unmet requirement is injected as a correction,
    /// spending one retry if so.
    fn gate(
        &self,
        unmet: Option<String>,
        stage_key: &str,
        retries_used: &mut usize,
    ) -> Option<String> {
        let correction = unmet?;
        if *retries_used < self.config.enforcement_retries {
            *retries_used += 1;
            info!(
                stage_key,
                retry = *retries_used,
                "advisor requirements unmet, injecting correction"
            );
            Some(correction)
        } else {
            warn!(
                stage_key,
                "advisor requirements still unmet after retries, proceeding"
            );
            None
        }
    }

    /// Fold a round's tool results into the session.
    ///
    /// In autonomous mode every successful section write moves the session
    /// to the next section within the round, after checking the written
    /// section's requirements. Advisors consulted in the same round count
    /// for every section written in it.
    async fn apply_invocations(
        &self,
        session: &mut BuildSession,
        invocations: &[ToolInvocation],
        events: &mpsc::Sender<BuildEvent>,
    ) -> RoundEffects {
        let succeeded: Vec<&str> = invocations
            .iter()
            .filter(|inv| !inv.is_error)
            .map(|inv| inv.name.as_str())
            .collect();
        for failed in invocations.iter().filter(|inv| inv.is_error) {
            session.mark_tool_failed(&failed.name);
        }
        if session.advance_step(&succeeded) {
            info!(step = session.current_step, "pipeline advanced");
        }

        for inv in invocations {
            session.merge_artifacts(inv.artifacts.clone());
        }

        let mut consulted = Vec::new();
        for inv in invocations.iter().filter(|inv| inv.name == plan::ADVISOR_TOOL) {
            let advisor = advisor_id(inv);
            if inv.is_error {
                warn!(
                    advisor = %advisor,
                    error = %inv.result_content,
                    "advisor consultation failed, counting it as consulted"
                );
            } else {
                emit(
                    events,
                    BuildEvent::AdvisorSegment {
                        advisor: advisor.clone(),
                        content: inv.result_content.clone(),
                    },
                )
                .await;
            }
            session.track_advisor_call(&advisor);
            consulted.push(advisor);
        }

        let mut effects = RoundEffects::default();
        if session.mode != BuildMode::Autonomous {
            return effects;
        }
        let Some(sub_staged) = plan::sub_staged_step() else {
            return effects;
        };
        let section_tool = plan::step(sub_staged).map(|s| s.tool);
        let writes = invocations
            .iter()
            .filter(|inv| !inv.is_error && Some(inv.name.as_str()) == section_tool)
            .count();

        for _ in 0..writes {
            if session.current_step != sub_staged {
                break;
            }
            for advisor in &consulted {
                session.track_advisor_call(advisor);
            }
            if effects.section_correction.is_none() {
                effects.section_correction = enforced_requirements(session);
            }
            effects.sections_advanced += 1;
            if session.advance_substep() {
                info!(step = session.current_step, "last section written, stage complete");
            } else {
                debug!(substep = session.current_substep, "moved to next section");
            }
        }
        effects
    }
}

/// Unmet requirements at the current position, if that position is enforced.
fn enforced_requirements(session: &BuildSession) -> Option<String> {
    if !plan::ENFORCED_STEPS.contains(&session.current_step) {
        return None;
    }
    session.check_advisor_requirements()
}

/// Append text to the trailing user message, or start a new one.
fn push_user_text(messages: &mut Vec<Message>, text: String) {
    if let Some(last) = messages.last_mut() {
        if last.role == MessageRole::User {
            last.content.push(ContentBlock::Text { text });
            return;
        }
    }
    messages.push(Message {
        role: MessageRole::User,
        content: vec![ContentBlock::Text { text }],
    });
}

fn advisor_id(inv: &ToolInvocation) -> String {
    inv.input
        .get("advisor")
        .and_then(|v| v.as_str())
        .unwrap_or("advisor")
        .to_string()
}

fn assistant_message(round: &RoundOutput) -> Message {
    let mut content = Vec::with_capacity(round.tool_calls.len() + 1);
    if !round.text.is_empty() {
        content.push(ContentBlock::Text {
            text: round.text.clone(),
        });
    }
    content.extend(round.tool_calls.iter().map(|call| ContentBlock::ToolUse {
        id: call.id.clone(),
        name: call.name.clone(),
        input: call.input.clone(),
    }));
    Message {
        role: MessageRole::Assistant,
        content,
    }
}

fn tool_result_message(invocations: &[ToolInvocation]) -> Message {
    Message {
        role: MessageRole::User,
        content: invocations
            .iter()
            .map(|inv| ContentBlock::ToolResult {
                tool_use_id: inv.id.clone(),
                content: inv.result_content.clone(),
                is_error: inv.is_error,
            })
            .collect(),
    }
}

async fn emit(events: &mpsc::Sender<BuildEvent>, event: BuildEvent) {
    if events.send(event).await.is_err() {
        debug!("build event receiver dropped");
    }
}

type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send + 'static>>;

pin_project! {
    /// Keeps a span entered while the provider stream is polled, so events
    /// consumed later are still attributed to the model call.
    struct StreamInSpan {
        #[pin]
        inner: EventStream,
        span: tracing::Span,
    }
}

impl StreamInSpan {
    fn new(inner: EventStream, span: tracing::Span) -> Self {
        Self { inner, span }
    }
}

impl Stream for StreamInSpan {
    type Item = Result<StreamEvent, LlmError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let _enter = this.span.enter();
        this.inner.poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use pagewright_types::build::StepStatus;
    use pagewright_types::llm::{
        CompletionResponse, ProviderCapabilities, StopReason,
    };
    use pagewright_types::tool::{ToolDefinition, ToolError, ToolOutput};

    use crate::build::session::new_build_session;
    use crate::build::store::InMemoryBuildSessionStore;
    use crate::build::tool::BuildTool;
    use crate::llm::provider::LlmProvider;

    type Script = Vec<Result<StreamEvent, String>>;

    /// Replays one scripted event list per model call and records requests.
    struct ScriptedProvider {
        rounds: Mutex<VecDeque<Script>>,
        requests: Arc<Mutex<Vec<CompletionRequest>>>,
        capabilities: ProviderCapabilities,
    }

    impl ScriptedProvider {
        fn new(rounds: Vec<Script>) -> (Self, Arc<Mutex<Vec<CompletionRequest>>>) {
            let requests = Arc::new(Mutex::new(Vec::new()));
            let provider = Self {
                rounds: Mutex::new(rounds.into()),
                requests: requests.clone(),
                capabilities: ProviderCapabilities {
                    streaming: true,
                    tool_calling: true,
                    max_context_tokens: 200_000,
                    max_output_tokens: 8192,
                },
            };
            (provider, requests)
        }
    }

    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn capabilities(&self) -> &ProviderCapabilities {
            &self.capabilities
        }

        async fn complete(
            &self,
            _request: &CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            Err(LlmError::InvalidRequest("not scripted".into()))
        }

        fn stream(
            &self,
            request: CompletionRequest,
        ) -> Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send + 'static>> {
            self.requests.lock().unwrap().push(request);
            let script = self
                .rounds
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| text_round("(no more script)"));
            let events: Vec<Result<StreamEvent, LlmError>> = script
                .into_iter()
                .map(|e| e.map_err(LlmError::Stream))
                .collect();
            Box::pin(futures_util::stream::iter(events))
        }
    }

    fn text_round(text: &str) -> Script {
        vec![
            Ok(StreamEvent::Connected),
            Ok(StreamEvent::TextDelta {
                index: 0,
                text: text.to_string(),
            }),
            Ok(StreamEvent::MessageDelta {
                stop_reason: StopReason::EndTurn,
            }),
            Ok(StreamEvent::Done),
        ]
    }

    fn tool_round(calls: &[(&str, serde_json::Value)]) -> Script {
        let mut script = vec![Ok(StreamEvent::Connected)];
        for (i, (name, input)) in calls.iter().enumerate() {
            script.push(Ok(StreamEvent::ToolUseComplete {
                id: format!("toolu_{name}_{i}"),
                name: name.to_string(),
                input: input.clone(),
            }));
        }
        script.push(Ok(StreamEvent::MessageDelta {
            stop_reason: StopReason::ToolUse,
        }));
        script.push(Ok(StreamEvent::Done));
        script
    }

    fn advise(advisor: &str) -> (&'static str, serde_json::Value) {
        (
            plan::ADVISOR_TOOL,
            serde_json::json!({"advisor": advisor, "question": "thoughts?"}),
        )
    }

    /// Saves its input under its own name.
    struct SaveTool(&'static str);

    impl BuildTool for SaveTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: self.0.to_string(),
                description: "save".into(),
                input_schema: serde_json::json!({"type": "object"}),
            }
        }

        async fn execute(
            &self,
            _ctx: &TurnContext,
            input: serde_json::Value,
        ) -> Result<ToolOutput, ToolError> {
            if input.get("fail").is_some() {
                return Err(ToolError::Execution("disk full".into()));
            }
            Ok(ToolOutput::text(format!("saved {}", self.0)).with_artifact(self.0, input))
        }
    }

    struct AdvisorTool {
        fail: bool,
    }

    impl BuildTool for AdvisorTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: plan::ADVISOR_TOOL.to_string(),
                description: "advise".into(),
                input_schema: serde_json::json!({"type": "object"}),
            }
        }

        async fn execute(
            &self,
            _ctx: &TurnContext,
            input: serde_json::Value,
        ) -> Result<ToolOutput, ToolError> {
            if self.fail {
                return Err(ToolError::Execution("advisor unavailable".into()));
            }
            Ok(ToolOutput::text(format!(
                "Advice from {}",
                input["advisor"].as_str().unwrap_or("?")
            )))
        }
    }

    struct Harness {
        driver: BuildLoop<InMemoryBuildSessionStore>,
        store: Arc<InMemoryBuildSessionStore>,
        requests: Arc<Mutex<Vec<CompletionRequest>>>,
        project: Project,
    }

    fn harness(rounds: Vec<Script>, advisor_fails: bool, config: LoopConfig) -> Harness {
        let (provider, requests) = ScriptedProvider::new(rounds);
        let mut registry = ToolRegistry::new();
        for tool in plan::plan_tools() {
            registry.register(SaveTool(tool));
        }
        registry.register(AdvisorTool {
            fail: advisor_fails,
        });
        registry.validate().unwrap();

        let store = Arc::new(InMemoryBuildSessionStore::default());
        Harness {
            driver: BuildLoop::new(
                BoxLlmProvider::new(provider),
                Arc::new(registry),
                store.clone(),
                config,
            ),
            store,
            requests,
            project: Project::new("Acme", None),
        }
    }

    async fn run(
        h: &Harness,
        session: &mut BuildSession,
        message: &str,
    ) -> (Result<StreamEndSignal, BuildLoopError>, Vec<BuildEvent>) {
        let (tx, mut rx) = mpsc::channel(256);
        let result = h
            .driver
            .run_turn(session, &h.project, "system", message, &tx)
            .await;
        drop(tx);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (result, events)
    }

    fn end_count(events: &[BuildEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, BuildEvent::End { .. }))
            .count()
    }

    fn session_for(h: &Harness, mode: BuildMode, step: usize) -> BuildSession {
        let mut session = new_build_session(h.project.id, mode);
        if step > 0 {
            session.continue_to(step, None);
        }
        session
    }

    #[tokio::test]
    async fn test_brief_turn_streams_advisor_and_checkpoints() {
        let h = harness(
            vec![
                {
                    let mut round = text_round("Let me check positioning.");
                    round.pop();
                    round.extend(tool_round(&[
                        advise("positioning_strategist"),
                        ("save_brief", serde_json::json!({"audience": "devs"})),
                    ]));
                    round
                },
                text_round("Here is your brief."),
            ],
            false,
            LoopConfig::default(),
        );
        let mut session = session_for(&h, BuildMode::Interactive, 0);

        let (result, events) = run(&h, &mut session, "We sell widgets").await;
        let signal = result.unwrap();

        assert_eq!(
            signal,
            StreamEndSignal::Checkpoint {
                step: 0,
                substep: None,
                prompt: "Brief is ready for review".into(),
            }
        );
        assert_eq!(end_count(&events), 1);
        assert!(matches!(events.last(), Some(BuildEvent::End { .. })));
        assert!(events.iter().any(|e| matches!(
            e,
            BuildEvent::AdvisorSegment { advisor, content }
                if advisor == "positioning_strategist" && content == "Advice from positioning_strategist"
        )));

        assert_eq!(session.artifacts["save_brief"]["audience"], "devs");
        assert!(session.advisors_consulted.contains("positioning_strategist"));

        let stored = h.store.load_session(&session.project_id).await.unwrap().unwrap();
        assert_eq!(stored.version, session.version);

        let history = h.store.load_history(&session.project_id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(
            history.turns()[1].content,
            "Let me check positioning.\n\nHere is your brief."
        );

        // Second request carries tool use and tool results.
        let requests = h.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].messages.len(), 3);
        assert!(requests[1].system.as_deref().unwrap().contains("<build_state>"));
        assert_eq!(requests[0].tools.len(), plan::STEP_PLAN.len() + 1);
    }

    #[tokio::test]
    async fn test_unmet_requirements_inject_bounded_corrections() {
        let brief_only = || tool_round(&[("save_brief", serde_json::json!({}))]);
        let h = harness(
            vec![brief_only(), brief_only(), brief_only(), brief_only(), text_round("ok")],
            false,
            LoopConfig::default(),
        );
        let mut session = session_for(&h, BuildMode::Interactive, 0);

        let (result, events) = run(&h, &mut session, "go").await;
        assert!(result.is_ok());
        assert_eq!(end_count(&events), 1);

        let requests = h.requests.lock().unwrap();
        assert_eq!(requests.len(), 5);
        let corrections = requests[4]
            .messages
            .iter()
            .flat_map(|m| m.content.iter())
            .filter(|b| matches!(b, ContentBlock::Text { text } if text.contains("positioning_strategist")))
            .count();
        assert_eq!(corrections, 2);
    }

    #[tokio::test]
    async fn test_no_enforcement_outside_copy_range() {
        let h = harness(
            vec![
                tool_round(&[("generate_design", serde_json::json!({}))]),
                text_round("done"),
            ],
            false,
            LoopConfig::default(),
        );
        let mut session = session_for(&h, BuildMode::Interactive, 4);
        session.continue_to(5, None);

        let (result, _) = run(&h, &mut session, "review it").await;
        assert!(result.is_ok());
        let requests = h.requests.lock().unwrap();
        let last_user = requests[1].messages.last().unwrap();
        assert!(
            last_user
                .content
                .iter()
                .all(|b| matches!(b, ContentBlock::ToolResult { .. }))
        );
    }

    #[tokio::test]
    async fn test_round_limit_terminates_with_signal() {
        let rounds = (0..10)
            .map(|_| tool_round(&[("save_wireframe", serde_json::json!({}))]))
            .collect();
        let config = LoopConfig {
            max_rounds: 3,
            ..LoopConfig::default()
        };
        let h = harness(rounds, false, config);
        let mut session = session_for(&h, BuildMode::Interactive, 0);

        let (result, events) = run(&h, &mut session, "go").await;
        assert_eq!(result.unwrap(), StreamEndSignal::Continue { step: 1 });
        assert_eq!(h.requests.lock().unwrap().len(), 3);
        assert_eq!(end_count(&events), 1);
    }

    #[tokio::test]
    async fn test_model_failure_keeps_committed_rounds() {
        let h = harness(
            vec![
                tool_round(&[("save_wireframe", serde_json::json!({"layout": "f"}))]),
                vec![
                    Ok(StreamEvent::Connected),
                    Err("connection reset".to_string()),
                ],
            ],
            false,
            LoopConfig::default(),
        );
        let mut session = session_for(&h, BuildMode::Interactive, 0);

        let (result, events) = run(&h, &mut session, "go").await;
        assert!(matches!(result, Err(BuildLoopError::Model(_))));
        assert_eq!(end_count(&events), 0);

        let stored = h.store.load_session(&session.project_id).await.unwrap().unwrap();
        assert_eq!(stored.current_step, 1);
        assert_eq!(stored.artifacts["save_wireframe"]["layout"], "f");
    }

    #[tokio::test]
    async fn test_failed_tool_is_fed_back_not_fatal() {
        let h = harness(
            vec![
                tool_round(&[("save_wireframe", serde_json::json!({"fail": true}))]),
                text_round("that failed"),
            ],
            false,
            LoopConfig::default(),
        );
        let mut session = session_for(&h, BuildMode::Interactive, 0);

        let (result, _) = run(&h, &mut session, "go").await;
        assert!(result.is_ok());
        assert_eq!(session.current_step, 0);
        assert_eq!(session.steps[1].status, StepStatus::Error);

        let requests = h.requests.lock().unwrap();
        let results = requests[1].messages.last().unwrap();
        assert!(matches!(
            &results.content[0],
            ContentBlock::ToolResult { is_error: true, content, .. } if content.contains("disk full")
        ));
    }

    #[tokio::test]
    async fn test_failed_advisor_counts_as_consulted() {
        let h = harness(
            vec![
                tool_round(&[advise("positioning_strategist")]),
                text_round("moving on"),
            ],
            true,
            LoopConfig::default(),
        );
        let mut session = session_for(&h, BuildMode::Interactive, 0);

        let (result, events) = run(&h, &mut session, "go").await;
        assert!(result.is_ok());
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, BuildEvent::AdvisorSegment { .. }))
        );
        assert!(session.advisors_consulted.contains("positioning_strategist"));

        let requests = h.requests.lock().unwrap();
        let results = requests[1].messages.last().unwrap();
        assert_eq!(results.content.len(), 1);
    }

    #[tokio::test]
    async fn test_interactive_copy_checkpoint_advances_section() {
        let h = harness(
            vec![
                tool_round(&[
                    advise("conversion_copywriter"),
                    ("write_section", serde_json::json!({"section": "hero"})),
                ]),
                text_round("Hero drafted."),
            ],
            false,
            LoopConfig::default(),
        );
        let mut session = session_for(&h, BuildMode::Interactive, 2);

        let (result, _) = run(&h, &mut session, "write the hero").await;
        assert_eq!(
            result.unwrap(),
            StreamEndSignal::Checkpoint {
                step: 2,
                substep: Some(0),
                prompt: "The hero section is ready for review".into(),
            }
        );
        assert_eq!(session.current_substep, 1);
        assert!(session.advisors_consulted.is_empty());

        let stored = h.store.load_session(&session.project_id).await.unwrap().unwrap();
        assert_eq!(stored.current_substep, 1);
    }

    #[tokio::test]
    async fn test_autonomous_section_write_advances_section() {
        let h = harness(
            vec![
                tool_round(&[
                    advise("conversion_copywriter"),
                    ("write_section", serde_json::json!({"section": "hero"})),
                ]),
                text_round("Hero done, moving to the problem section."),
            ],
            false,
            LoopConfig::default(),
        );
        let mut session = session_for(&h, BuildMode::Autonomous, 1);

        let (result, _) = run(&h, &mut session, "continue").await;
        assert_eq!(result.unwrap(), StreamEndSignal::Continue { step: 2 });
        assert_eq!((session.current_step, session.current_substep), (2, 1));
        assert_eq!(session.steps[1].status, StepStatus::Complete);
    }

    fn last_message_text(request: &CompletionRequest) -> String {
        request
            .messages
            .last()
            .map(|m| {
                m.content
                    .iter()
                    .filter_map(|b| match b {
                        ContentBlock::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_text_only_round_is_enforced() {
        let h = harness(
            vec![
                text_round("Here is your brief."),
                tool_round(&[advise("positioning_strategist")]),
                text_round("Revised brief."),
            ],
            false,
            LoopConfig::default(),
        );
        let mut session = session_for(&h, BuildMode::Interactive, 0);

        let (result, events) = run(&h, &mut session, "We sell widgets").await;
        assert_eq!(
            result.unwrap(),
            StreamEndSignal::Checkpoint {
                step: 0,
                substep: None,
                prompt: "Brief is ready for review".into(),
            }
        );
        assert_eq!(end_count(&events), 1);

        let requests = h.requests.lock().unwrap();
        assert_eq!(requests.len(), 3);

        let second = &requests[1].messages;
        assert_eq!(second.len(), 3);
        assert_eq!(second[1].role, MessageRole::Assistant);
        assert_eq!(
            second[1].content,
            vec![ContentBlock::Text {
                text: "Here is your brief.".into()
            }]
        );
        assert_eq!(second[2].role, MessageRole::User);
        assert!(last_message_text(&requests[1]).contains("positioning_strategist"));
        assert!(session.advisors_consulted.contains("positioning_strategist"));
    }

    #[tokio::test]
    async fn test_text_only_corrections_are_bounded() {
        let h = harness(
            vec![text_round("a"), text_round("b"), text_round("c"), text_round("d")],
            false,
            LoopConfig::default(),
        );
        let mut session = session_for(&h, BuildMode::Interactive, 0);

        let (result, events) = run(&h, &mut session, "go").await;
        assert!(matches!(result.unwrap(), StreamEndSignal::Checkpoint { step: 0, .. }));
        assert_eq!(end_count(&events), 1);
        assert_eq!(h.requests.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_autonomous_turn_writes_every_section() {
        let mut rounds: Vec<Script> = plan::COPY_SECTIONS
            .iter()
            .map(|label| {
                tool_round(&[
                    advise("conversion_copywriter"),
                    ("write_section", serde_json::json!({"section": label})),
                ])
            })
            .collect();
        rounds.push(text_round("All sections written."));
        let h = harness(rounds, false, LoopConfig::default());
        let mut session = session_for(&h, BuildMode::Autonomous, 2);

        let (result, events) = run(&h, &mut session, "write the copy").await;
        assert_eq!(result.unwrap(), StreamEndSignal::Continue { step: 3 });
        assert_eq!(end_count(&events), 1);
        assert_eq!((session.current_step, session.current_substep), (3, 0));
        assert_eq!(session.steps[2].status, StepStatus::Complete);
        assert_eq!(session.steps[3].status, StepStatus::Active);

        let stored = h.store.load_session(&session.project_id).await.unwrap().unwrap();
        assert_eq!(stored.current_step, 3);

        let requests = h.requests.lock().unwrap();
        assert_eq!(requests.len(), plan::COPY_SECTIONS.len() + 1);
        // Sections a through d had their copywriter; only the last one needs more.
        for request in &requests[1..plan::COPY_SECTIONS.len()] {
            assert_eq!(last_message_text(request), "");
        }
        let correction = last_message_text(&requests[plan::COPY_SECTIONS.len()]);
        assert!(correction.contains("cro_specialist"));
        assert!(correction.contains("call to action"));
        assert!(!correction.contains("conversion_copywriter"));
    }

    #[tokio::test]
    async fn test_autonomous_sections_advance_per_round() {
        let h = harness(
            vec![
                tool_round(&[
                    advise("conversion_copywriter"),
                    ("write_section", serde_json::json!({"section": "hero"})),
                ]),
                tool_round(&[
                    advise("conversion_copywriter"),
                    ("write_section", serde_json::json!({"section": "problem"})),
                ]),
                text_round("Two down."),
            ],
            false,
            LoopConfig::default(),
        );
        let mut session = session_for(&h, BuildMode::Autonomous, 2);

        let (result, _) = run(&h, &mut session, "go").await;
        assert!(result.is_ok());

        let requests = h.requests.lock().unwrap();
        assert!(requests[1].system.as_deref().unwrap().contains("Current section: 1 (problem)"));
        assert!(requests[2].system.as_deref().unwrap().contains("Current section: 2 (solution)"));
        assert_eq!((session.current_step, session.current_substep), (2, 2));
    }

    #[tokio::test]
    async fn test_interactive_last_section_checkpoint_rolls_over() {
        let h = harness(
            vec![
                tool_round(&[
                    advise("conversion_copywriter"),
                    advise("cro_specialist"),
                    ("write_section", serde_json::json!({"section": "call to action"})),
                ]),
                text_round("Call to action drafted."),
            ],
            false,
            LoopConfig::default(),
        );
        let mut session = session_for(&h, BuildMode::Interactive, 2);
        session.continue_to(2, Some(4));

        let (result, _) = run(&h, &mut session, "write the cta").await;
        assert_eq!(
            result.unwrap(),
            StreamEndSignal::Checkpoint {
                step: 2,
                substep: Some(4),
                prompt: "The call to action section is ready for review".into(),
            }
        );
        assert_eq!((session.current_step, session.current_substep), (3, 0));
        assert_eq!(session.steps[2].status, StepStatus::Complete);
        assert_eq!(h.requests.lock().unwrap().len(), 2);

        let stored = h.store.load_session(&session.project_id).await.unwrap().unwrap();
        assert_eq!(stored.current_step, 3);
    }

    #[tokio::test]
    async fn test_deploy_stage_emits_poll() {
        let h = harness(
            vec![
                tool_round(&[("deploy_site", serde_json::json!({}))]),
                text_round("Deploying."),
            ],
            false,
            LoopConfig::default(),
        );
        let mut session = session_for(&h, BuildMode::Autonomous, 5);

        let (result, _) = run(&h, &mut session, "ship it").await;
        match result.unwrap() {
            StreamEndSignal::Poll { step, poll_url } => {
                assert_eq!(step, 6);
                assert!(poll_url.contains(&session.project_id.to_string()));
            }
            other => panic!("expected poll, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_closed_receiver_does_not_abort_turn() {
        let h = harness(vec![text_round("hello")], false, LoopConfig::default());
        let mut session = session_for(&h, BuildMode::Interactive, 1);

        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let result = h
            .driver
            .run_turn(&mut session, &h.project, "system", "hi", &tx)
            .await;
        assert_eq!(result.unwrap(), StreamEndSignal::Continue { step: 1 });
    }

    #[tokio::test]
    async fn test_stale_session_conflicts() {
        let h = harness(
            vec![
                tool_round(&[("save_wireframe", serde_json::json!({}))]),
                text_round("a"),
                tool_round(&[("save_wireframe", serde_json::json!({}))]),
                text_round("b"),
            ],
            false,
            LoopConfig::default(),
        );
        let mut first = session_for(&h, BuildMode::Interactive, 0);
        let mut second = first.clone();

        assert!(run(&h, &mut first, "go").await.0.is_ok());
        let (result, _) = run(&h, &mut second, "go").await;
        assert!(matches!(
            result,
            Err(BuildLoopError::Store(RepositoryError::Conflict(_)))
        ));
    }
}
