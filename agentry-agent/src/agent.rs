//! Agent execution loop: think, act, observe, until the agent completes,
//! delegates, or runs out of budget.

use crate::definition::{AgentDefinition, AgentRegistry};
use crate::execution::{AgentExecution, AgentStep, ExecutionStatus, StepAction};
use crate::response::{parse_action, ParsedAction};
use agentry_core::{
    target_path, wrap, Authorization, BreakerConfig, BreakerSet, ChatMessage, ChatProvider,
    CompletionRequest, CompletionResponse, Error, PermissionGate, Result, RetryPolicy,
    ToolDefinition,
    ToolExecutor, ToolInvoker,
};
use futures_util::future::{FutureExt, LocalBoxFuture};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Asked before a tool call that needs confirmation: `(tool, params)`
pub type ApprovalCallback =
    Arc<dyn Fn(&str, &Value) -> Pin<Box<dyn Future<Output = bool> + Send>> + Send + Sync>;

/// Configuration for the loop
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Cycles before giving up
    pub max_steps: usize,
    /// Wall-clock budget, shared with delegated sub-loops
    pub max_duration: Duration,
    /// Deepest delegation chain allowed below the top-level agent
    pub max_depth: usize,
    /// A sub-loop gets `remaining_steps / divisor` (at least one)
    pub delegation_step_divisor: usize,
    /// Run tools that need confirmation without asking
    pub auto_approve: bool,
    /// Scope for permission grants and the approval queue
    pub session_id: Option<String>,
    pub model: Option<String>,
    /// Advertise the agent's tools as native function definitions
    pub native_tools: bool,
    pub chat_policy: RetryPolicy,
    pub breaker: BreakerConfig,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_steps: 20,
            max_duration: Duration::from_secs(300),
            max_depth: 5,
            delegation_step_divisor: 2,
            auto_approve: false,
            session_id: None,
            model: None,
            native_tools: false,
            chat_policy: RetryPolicy::default(),
            breaker: BreakerConfig::default(),
        }
    }
}

impl LoopConfig {
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = max_duration;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_auto_approve(mut self, auto_approve: bool) -> Self {
        self.auto_approve = auto_approve;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_chat_policy(mut self, policy: RetryPolicy) -> Self {
        self.chat_policy = policy;
        self
    }
}

/// Drives one agent (and whatever it delegates to) to a finished
/// `AgentExecution`.
pub struct AgentLoop<P, T> {
    provider: P,
    invoker: ToolInvoker<T>,
    registry: Arc<dyn AgentRegistry>,
    config: LoopConfig,
    approval: Option<ApprovalCallback>,
    breakers: BreakerSet,
}

impl<P: ChatProvider, T: ToolExecutor> AgentLoop<P, T> {
    pub fn new(provider: P, invoker: ToolInvoker<T>, registry: Arc<dyn AgentRegistry>) -> Self {
        let config = LoopConfig::default();
        Self {
            provider,
            invoker,
            registry,
            breakers: BreakerSet::new(config.breaker),
            config,
            approval: None,
        }
    }

    pub fn with_config(mut self, config: LoopConfig) -> Self {
        self.breakers = BreakerSet::new(config.breaker);
        self.config = config;
        self
    }

    pub fn with_approval(mut self, callback: ApprovalCallback) -> Self {
        self.approval = Some(callback);
        self
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    pub fn registry(&self) -> &dyn AgentRegistry {
        self.registry.as_ref()
    }

    pub fn invoker(&self) -> &ToolInvoker<T> {
        &self.invoker
    }

    /// Breakers guarding chat calls, one per agent (`chat:<agent>`)
    pub fn breakers(&self) -> &BreakerSet {
        &self.breakers
    }

    /// Run `agent_name` on `input`.
    ///
    /// Only an unknown agent is an `Err`. Everything that goes wrong inside
    /// the run is recorded as an `error` step and the loop carries on.
    pub async fn execute(&self, agent_name: &str, input: &str) -> Result<AgentExecution> {
        let deadline = Instant::now() + self.config.max_duration;
        self.run_agent(agent_name, input.to_string(), self.config.max_steps, deadline, 0)
            .await
    }

    fn run_agent<'a>(
        &'a self,
        name: &'a str,
        input: String,
        max_steps: usize,
        deadline: Instant,
        depth: usize,
    ) -> LocalBoxFuture<'a, Result<AgentExecution>> {
        async move {
            let agent = self
                .registry
                .get(name)
                .cloned()
                .ok_or_else(|| Error::agent_not_found(name).with_operation("agent::execute"))?;

            let deadline = match agent.timeout_secs {
                Some(secs) => deadline.min(Instant::now() + Duration::from_secs(secs)),
                None => deadline,
            };

            tracing::info!(agent = %agent.name, depth, max_steps, "agent started");

            let mut exec = AgentExecution::new(&agent.name, input.clone());
            let mut transcript = vec![
                ChatMessage::system(self.system_prompt(&agent)),
                ChatMessage::user(input),
            ];

            let status = loop {
                if exec.steps.len() >= max_steps {
                    tracing::warn!(agent = %agent.name, max_steps, "step budget exhausted");
                    break ExecutionStatus::Failed;
                }
                if Instant::now() >= deadline {
                    tracing::warn!(agent = %agent.name, steps = exec.steps.len(), "time budget exhausted");
                    break ExecutionStatus::Failed;
                }

                let response = match self.chat(&agent, &transcript).await {
                    Ok(response) => response,
                    Err(e) => {
                        let step = AgentStep::error("", format!("chat failed: {e}"));
                        observe(&mut transcript, None, &step);
                        exec.push(step);
                        continue;
                    }
                };

                let parsed = match parse_action(&response) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        tracing::debug!(agent = %agent.name, error = %e, "unparseable reply");
                        transcript.push(ChatMessage::assistant(
                            response.content.clone().unwrap_or_default(),
                        ));
                        let step = AgentStep::error("", e.to_string());
                        observe(&mut transcript, None, &step);
                        exec.push(step);
                        continue;
                    }
                };
                transcript.push(assistant_message(&response, &parsed));
                tracing::debug!(agent = %agent.name, action = %parsed.action, "action parsed");

                if parsed.is_complete() {
                    let result = parsed.result();
                    exec.push(
                        AgentStep::new(parsed.thought, StepAction::Complete, parsed.params)
                            .with_result(result.clone()),
                    );
                    exec.output = Some(result);
                    break ExecutionStatus::Completed;
                }

                if parsed.is_delegate() {
                    let remaining = max_steps - exec.steps.len();
                    match self.check_delegation(&agent, &parsed, depth) {
                        Err(e) => {
                            let step = AgentStep::new(
                                parsed.thought.clone(),
                                StepAction::Delegate,
                                parsed.params.clone(),
                            )
                            .with_error(e.to_string());
                            observe(&mut transcript, parsed.tool_call_id.as_deref(), &step);
                            exec.push(step);
                            continue;
                        }
                        Ok(target) => {
                            let divisor = self.config.delegation_step_divisor.max(1);
                            let sub_steps = (remaining / divisor).max(1);
                            tracing::info!(
                                from = %agent.name,
                                to = %target,
                                sub_steps,
                                "delegating"
                            );
                            let sub = self
                                .run_agent(
                                    &target,
                                    parsed.delegate_input(),
                                    sub_steps,
                                    deadline,
                                    depth + 1,
                                )
                                .await;
                            match sub {
                                Ok(sub) => {
                                    let mut step = AgentStep::new(
                                        parsed.thought,
                                        StepAction::Delegate,
                                        parsed.params,
                                    );
                                    if let Some(output) = sub.output.clone() {
                                        step = step.with_result(output);
                                    }
                                    if !sub.is_completed() {
                                        step = step.with_error(format!("`{target}` did not complete"));
                                    }
                                    exec.push(step);
                                    exec.output = sub.output.clone();
                                    let status = sub.status;
                                    exec.delegated = Some(Box::new(sub));
                                    break status;
                                }
                                Err(e) => {
                                    let step = AgentStep::error(parsed.thought, e.to_string());
                                    observe(&mut transcript, None, &step);
                                    exec.push(step);
                                    continue;
                                }
                            }
                        }
                    }
                }

                let step = self.run_tool(&agent, &parsed).await;
                observe(&mut transcript, parsed.tool_call_id.as_deref(), &step);
                exec.push(step);
            };

            exec.finish(status);
            tracing::info!(
                agent = %agent.name,
                status = ?exec.status,
                steps = exec.steps.len(),
                "agent finished"
            );
            Ok(exec)
        }
        .boxed_local()
    }

    async fn chat(
        &self,
        agent: &AgentDefinition,
        transcript: &[ChatMessage],
    ) -> Result<CompletionResponse> {
        let mut request = CompletionRequest::new(transcript.to_vec());
        if let Some(model) = agent.model.as_ref().or(self.config.model.as_ref()) {
            request = request.with_model(model.clone());
        }
        if self.config.native_tools && !agent.tools.is_empty() {
            request = request.with_tools(self.tool_definitions(agent));
        }

        let name = format!("chat:{}", agent.name);
        let breaker = self.breakers.get(&name);
        wrap(&name, &self.config.chat_policy, Some(breaker.as_ref()), || {
            self.provider.complete(request.clone())
        })
        .await
    }

    fn tool_definitions(&self, agent: &AgentDefinition) -> Vec<ToolDefinition> {
        agent
            .tools
            .iter()
            .filter_map(|name| self.invoker.executor().tool(name))
            .map(|info| ToolDefinition::new(info.name, info.description))
            .collect()
    }

    /// Target agent name if `parsed` may be delegated from `agent` at `depth`
    fn check_delegation(
        &self,
        agent: &AgentDefinition,
        parsed: &ParsedAction,
        depth: usize,
    ) -> Result<String> {
        let Some(target) = parsed.delegate_target() else {
            return Err(Error::malformed_response("delegate needs `params.agent`")
                .with_operation("agent::delegate"));
        };
        if !agent.can_delegate_to(target) {
            return Err(Error::delegation_denied(
                target,
                format!("`{}` may not delegate to `{target}`", agent.name),
            ));
        }
        if depth + 1 > self.config.max_depth {
            return Err(Error::delegation_denied(
                target,
                format!("delegation depth limit {} reached", self.config.max_depth),
            ));
        }
        if !self.registry.has(target) {
            return Err(Error::agent_not_found(target).with_operation("agent::delegate"));
        }
        Ok(target.to_string())
    }

    /// Gate check, approval if needed, then the call itself
    async fn run_tool(&self, agent: &AgentDefinition, parsed: &ParsedAction) -> AgentStep {
        let tool = parsed.action.as_str();
        let step = AgentStep::new(
            parsed.thought.clone(),
            StepAction::Tool(tool.to_string()),
            parsed.params.clone(),
        );

        if !agent.allows_tool(tool) {
            let err = Error::tool_not_found(tool)
                .with_operation("agent::run_tool")
                .with_context("agent", agent.name.clone());
            return step.with_error(format!("{err}; available tools: {}", agent.tools.join(", ")));
        }

        let session = self.config.session_id.as_deref();
        let approved = match self.invoker.authorize(tool, &parsed.params, session) {
            Err(e) => return step.with_error(e.to_string()),
            Ok(Authorization::Denied) => {
                return step.with_error(
                    Error::permission_denied(tool, "denied by permission rule").to_string(),
                )
            }
            Ok(Authorization::Allowed(_)) => false,
            Ok(Authorization::NeedsApproval { .. }) => {
                if !self.request_approval(parsed).await {
                    tracing::warn!(agent = %agent.name, tool, "tool call not approved");
                    return step.with_error(
                        Error::permission_denied(tool, "not approved").to_string(),
                    );
                }
                true
            }
        };

        match self
            .invoker
            .invoke(tool, parsed.params.clone(), session, approved)
            .await
        {
            Ok(result) => step.with_result(result),
            Err(e) => step.with_error(e.to_string()),
        }
    }

    /// Auto-approve, or queue the operation and ask the callback. No
    /// callback means no.
    ///
    /// A yes approves this call only: it is passed straight to the invoker
    /// and never becomes a grant other calls in the session could use.
    async fn request_approval(&self, parsed: &ParsedAction) -> bool {
        if self.config.auto_approve {
            return true;
        }
        let Some(callback) = &self.approval else {
            return false;
        };

        let gate = self.invoker.gate();
        let session = self.config.session_id.as_deref();
        let tool = parsed.action.as_str();
        let description = if parsed.thought.is_empty() {
            format!("run `{tool}`")
        } else {
            parsed.thought.clone()
        };
        let pending = gate.queue_for_approval(
            session,
            tool,
            target_path(&parsed.params),
            parsed.params.clone(),
            description,
        );

        let queued = QueuedApproval {
            gate: gate.as_ref(),
            session,
            id: pending.id,
        };

        let approved = callback(tool, &parsed.params).await;
        if !approved {
            gate.deny_operation(session, &queued.id);
        }
        approved
    }

    fn system_prompt(&self, agent: &AgentDefinition) -> String {
        let mut prompt = String::new();
        if !agent.system_prompt.trim().is_empty() {
            prompt.push_str(agent.system_prompt.trim());
            prompt.push_str("\n\n");
        }
        prompt.push_str(
            "## Protocol\n\
             Reply with exactly one JSON object per turn:\n\
             {\"thought\": \"<your reasoning>\", \"action\": \"<action>\", \"params\": {...}}\n\n\
             ## Actions\n\
             - complete: finish the task; put the answer in params.result\n",
        );
        if !agent.can_delegate.is_empty() {
            prompt.push_str(&format!(
                "- delegate: hand the task to another agent; params.agent is one of [{}], params.input is the task\n",
                agent.can_delegate.join(", ")
            ));
        }
        for name in &agent.tools {
            let description = self
                .invoker
                .executor()
                .tool(name)
                .map(|info| info.description)
                .unwrap_or_default();
            prompt.push_str(&format!("- {name}: {description}\n"));
        }
        if !agent.output_formats.is_empty() {
            prompt.push_str(&format!(
                "\nPreferred output formats: {}\n",
                agent.output_formats.join(", ")
            ));
        }
        prompt
    }
}

/// The assistant turn as the model sent it, trimmed to the one tool call
/// that gets executed
/// An operation waiting on the approval callback. Leaves the queue when
/// dropped, including when the loop is cancelled mid-question.
struct QueuedApproval<'a> {
    gate: &'a PermissionGate,
    session: Option<&'a str>,
    id: String,
}

impl Drop for QueuedApproval<'_> {
    fn drop(&mut self) {
        self.gate.withdraw_operation(self.session, &self.id);
    }
}

fn assistant_message(response: &CompletionResponse, parsed: &ParsedAction) -> ChatMessage {
    let mut message = ChatMessage::assistant(response.content.clone().unwrap_or_default());
    if parsed.tool_call_id.is_some() {
        message.tool_calls = response.tool_calls.first().cloned().map(|call| vec![call]);
    }
    message
}

/// Feed a step's outcome back as the next turn
fn observe(transcript: &mut Vec<ChatMessage>, tool_call_id: Option<&str>, step: &AgentStep) {
    let text = match (&step.error, &step.result) {
        (Some(error), _) => format!(
            "Error: {error}\nReply with a single JSON action that corrects course."
        ),
        (None, Some(result)) => format!("Result: {result}"),
        (None, None) => "Result: (none)".to_string(),
    };
    let message = match tool_call_id {
        Some(id) => ChatMessage::tool_result(id, text),
        None => ChatMessage::user(text),
    };
    transcript.push(message);
}
