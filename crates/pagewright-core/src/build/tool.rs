//! Build tools, their registry, and the per-turn context passed to them.
//!
//! `BuildTool` uses RPITIT like every async trait in this workspace;
//! `BoxBuildTool` is the object-safe wrapper the registry stores.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use futures_util::future::join_all;
use tracing::{Instrument, debug, info_span, warn};

use pagewright_types::build::{BuildMode, BuildSession};
use pagewright_types::project::Project;
use pagewright_types::tool::{ToolCall, ToolDefinition, ToolError, ToolInvocation, ToolOutput};

use super::plan::{self, PlanError};

// ---------------------------------------------------------------------------
// Turn context
// ---------------------------------------------------------------------------

/// State visible to tools during one inbound turn.
///
/// Created once per turn and refreshed from the session between rounds.
/// `scratch` carries intermediate results from one tool call to another
/// within the same turn and is dropped with the turn.
#[derive(Debug)]
pub struct TurnContext {
    pub project: Project,
    pub mode: BuildMode,
    pub current_step: usize,
    pub current_substep: usize,
    pub artifacts: BTreeMap<String, serde_json::Value>,
    scratch: Mutex<BTreeMap<String, serde_json::Value>>,
}

impl TurnContext {
    pub fn new(project: Project, session: &BuildSession) -> Self {
        Self {
            project,
            mode: session.mode,
            current_step: session.current_step,
            current_substep: session.current_substep,
            artifacts: session.artifacts.clone(),
            scratch: Mutex::new(BTreeMap::new()),
        }
    }

    /// Refresh the session snapshot after a round has been committed.
    pub fn sync(&mut self, session: &BuildSession) {
        self.mode = session.mode;
        self.current_step = session.current_step;
        self.current_substep = session.current_substep;
        self.artifacts = session.artifacts.clone();
    }

    pub fn artifact(&self, key: &str) -> Option<&serde_json::Value> {
        self.artifacts.get(key)
    }

    pub fn stash(&self, key: impl Into<String>, value: serde_json::Value) {
        let mut scratch = self.scratch.lock().unwrap_or_else(|e| e.into_inner());
        scratch.insert(key.into(), value);
    }

    pub fn recall(&self, key: &str) -> Option<serde_json::Value> {
        let scratch = self.scratch.lock().unwrap_or_else(|e| e.into_inner());
        scratch.get(key).cloned()
    }

    /// All scratch entries whose key starts with `prefix`.
    pub fn recall_prefixed(&self, prefix: &str) -> Vec<(String, serde_json::Value)> {
        let scratch = self.scratch.lock().unwrap_or_else(|e| e.into_inner());
        scratch
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tool trait + object-safe wrapper
// ---------------------------------------------------------------------------

/// A tool the build agent can call.
pub trait BuildTool: Send + Sync {
    /// Name, description, and input schema advertised to the model.
    fn definition(&self) -> ToolDefinition;

    fn execute(
        &self,
        ctx: &TurnContext,
        input: serde_json::Value,
    ) -> impl Future<Output = Result<ToolOutput, ToolError>> + Send;
}

/// Object-safe version of [`BuildTool`] with boxed futures.
pub trait BuildToolDyn: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    fn execute_boxed<'a>(
        &'a self,
        ctx: &'a TurnContext,
        input: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<ToolOutput, ToolError>> + Send + 'a>>;
}

impl<T: BuildTool> BuildToolDyn for T {
    fn definition(&self) -> ToolDefinition {
        BuildTool::definition(self)
    }

    fn execute_boxed<'a>(
        &'a self,
        ctx: &'a TurnContext,
        input: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<ToolOutput, ToolError>> + Send + 'a>> {
        Box::pin(self.execute(ctx, input))
    }
}

/// Type-erased build tool.
pub struct BoxBuildTool {
    inner: Box<dyn BuildToolDyn>,
}

impl BoxBuildTool {
    pub fn new<T: BuildTool + 'static>(tool: T) -> Self {
        Self {
            inner: Box::new(tool),
        }
    }

    pub fn definition(&self) -> ToolDefinition {
        self.inner.definition()
    }

    pub async fn execute(
        &self,
        ctx: &TurnContext,
        input: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        self.inner.execute_boxed(ctx, input).await
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Name-keyed set of tools available to the build agent.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, (ToolDefinition, BoxBuildTool)>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under the name from its definition, replacing any
    /// tool previously registered under that name.
    pub fn register<T: BuildTool + 'static>(&mut self, tool: T) -> &mut Self {
        let tool = BoxBuildTool::new(tool);
        let definition = tool.definition();
        debug!(tool = %definition.name, "registered build tool");
        self.tools.insert(definition.name.clone(), (definition, tool));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|(d, _)| d.clone()).collect()
    }

    /// Every plan tool and the advisor tool must be registered.
    pub fn validate(&self) -> Result<(), PlanError> {
        plan::validate_plan()?;
        for tool in plan::plan_tools().into_iter().chain([plan::ADVISOR_TOOL]) {
            if !self.contains(tool) {
                return Err(PlanError::UnregisteredTool(tool.to_string()));
            }
        }
        Ok(())
    }

    /// Run one call. Failures, including unknown tool names, become
    /// error-tagged invocations.
    pub async fn execute(&self, ctx: &TurnContext, call: &ToolCall) -> ToolInvocation {
        let Some((_, tool)) = self.tools.get(&call.name) else {
            warn!(tool = %call.name, "model requested an unregistered tool");
            return ToolInvocation::failure(call, &ToolError::Unknown(call.name.clone()));
        };

        let span = info_span!("execute_tool", tool = %call.name, tool_use_id = %call.id);
        match tool.execute(ctx, call.input.clone()).instrument(span).await {
            Ok(output) => ToolInvocation::success(call, output),
            Err(e) => {
                warn!(tool = %call.name, error = %e, "tool execution failed");
                ToolInvocation::failure(call, &e)
            }
        }
    }

    /// Run a batch of calls concurrently. Results are in request order.
    pub async fn execute_all(&self, ctx: &TurnContext, calls: &[ToolCall]) -> Vec<ToolInvocation> {
        join_all(calls.iter().map(|call| self.execute(ctx, call))).await
    }
}
