//! Executes a [`WorkflowDefinition`] one step at a time.

use super::interpolate::{evaluate_condition, interpolate};
use super::{
    StepResult, StepStatus, WorkflowContext, WorkflowDefinition, WorkflowResult, WorkflowStep,
};
use crate::agent::AgentLoop;
use agentry_core::{ChatProvider, Error, Result, ToolExecutor};
use futures_util::future::join_all;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(300);

/// Asked before a step that requires approval: `(step, index, message)`
pub type CheckpointCallback = Arc<
    dyn Fn(&WorkflowStep, usize, &str) -> Pin<Box<dyn Future<Output = bool> + Send>>
        + Send
        + Sync,
>;

#[derive(Clone, Default)]
pub struct RunnerOptions {
    /// Overrides the workflow's own `autoApprove` setting
    pub auto_approve: Option<bool>,
    pub checkpoint: Option<CheckpointCallback>,
}

impl RunnerOptions {
    pub fn with_auto_approve(mut self, auto_approve: bool) -> Self {
        self.auto_approve = Some(auto_approve);
        self
    }

    pub fn with_checkpoint(mut self, callback: CheckpointCallback) -> Self {
        self.checkpoint = Some(callback);
        self
    }
}

pub struct WorkflowRunner<P, T> {
    agent_loop: AgentLoop<P, T>,
    options: RunnerOptions,
}

impl<P: ChatProvider, T: ToolExecutor> WorkflowRunner<P, T> {
    pub fn new(agent_loop: AgentLoop<P, T>) -> Self {
        Self {
            agent_loop,
            options: RunnerOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RunnerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn agent_loop(&self) -> &AgentLoop<P, T> {
        &self.agent_loop
    }

    /// Run every step in order.
    ///
    /// Never fails as a whole: problems land in the step ledger and
    /// `errors`, with `success` cleared when the run did not go through.
    pub async fn run(
        &self,
        def: &WorkflowDefinition,
        inputs: HashMap<String, Value>,
    ) -> WorkflowResult {
        let started = Instant::now();
        tracing::info!(workflow = %def.name, steps = def.steps.len(), "workflow started");

        let inputs = match resolve_inputs(def, inputs) {
            Ok(inputs) => inputs,
            Err(e) => {
                tracing::warn!(workflow = %def.name, error = %e, "workflow inputs rejected");
                return WorkflowResult {
                    success: false,
                    outputs: HashMap::new(),
                    steps: Vec::new(),
                    errors: vec![e.to_string()],
                    duration_ms: elapsed_ms(started),
                };
            }
        };

        let mut ctx = WorkflowContext::new(inputs);
        let mut ledger = Vec::with_capacity(def.steps.len());
        let mut success = true;

        for (index, step) in def.steps.iter().enumerate() {
            ctx.current_step = index;

            if let Some(condition) = &step.condition {
                if !evaluate_condition(condition, &ctx.variables) {
                    tracing::info!(step = %step.id, condition = %condition, "step skipped");
                    ledger.push(StepResult::new(step, StepStatus::Skipped));
                    continue;
                }
            }

            if step.requires_approval && !self.auto_approve(def) {
                if !self.checkpoint(step, index).await {
                    tracing::warn!(step = %step.id, "checkpoint denied, halting");
                    let mut result = StepResult::new(step, StepStatus::Denied);
                    result.error = Some("checkpoint denied".to_string());
                    ctx.errors.push(format!("step `{}`: checkpoint denied", step.id));
                    ledger.push(result);
                    success = false;
                    break;
                }
                ctx.checkpoints.push(step.id.clone());
            }

            let result = if step.is_parallel() {
                self.run_parallel(def, step, &mut ctx).await
            } else {
                let result = self.run_single(def, step, &ctx.variables).await;
                if let (true, Some(output)) = (result.is_completed(), &result.output) {
                    if let Some(name) = &step.output {
                        ctx.bind(name, output.clone());
                    }
                    ctx.set_prev(output.clone());
                }
                result
            };

            tracing::info!(
                step = %step.id,
                status = ?result.status,
                duration_ms = result.duration_ms,
                "step finished"
            );

            if result.is_completed() {
                ledger.push(result);
                continue;
            }

            let error = result.error.clone().unwrap_or_else(|| "step failed".to_string());
            ctx.errors.push(format!("step `{}`: {}", step.id, error));
            ledger.push(result);
            if step.on_error.halts() {
                tracing::warn!(step = %step.id, "step failed, halting");
                success = false;
                break;
            }
        }

        let outputs = if def.outputs.is_empty() {
            ctx.outputs
        } else {
            def.outputs
                .iter()
                .filter_map(|name| ctx.outputs.get(name).map(|v| (name.clone(), v.clone())))
                .collect()
        };

        let result = WorkflowResult {
            success,
            outputs,
            steps: ledger,
            errors: ctx.errors,
            duration_ms: elapsed_ms(started),
        };
        tracing::info!(
            workflow = %def.name,
            success = result.success,
            duration_ms = result.duration_ms,
            "workflow finished"
        );
        result
    }

    fn auto_approve(&self, def: &WorkflowDefinition) -> bool {
        self.options.auto_approve.unwrap_or(def.settings.auto_approve)
    }

    async fn checkpoint(&self, step: &WorkflowStep, index: usize) -> bool {
        let Some(callback) = &self.options.checkpoint else {
            return false;
        };
        let message = step
            .approval_message
            .clone()
            .unwrap_or_else(|| format!("Run step `{}`?", step.id));
        callback(step, index, &message).await
    }

    /// Run the members chunk by chunk. Outputs bind once a chunk has joined,
    /// so members of one chunk only see what earlier chunks produced.
    async fn run_parallel(
        &self,
        def: &WorkflowDefinition,
        group: &WorkflowStep,
        ctx: &mut WorkflowContext,
    ) -> StepResult {
        let started = Instant::now();
        let mut members = Vec::with_capacity(group.parallel.len());
        let mut outputs = Map::new();

        for chunk in group.parallel.chunks(def.settings.max_parallel.max(1)) {
            let variables = ctx.variables.clone();
            tracing::debug!(group = %group.id, size = chunk.len(), "parallel chunk started");
            let results = join_all(
                chunk
                    .iter()
                    .map(|member| self.run_member(def, member, &variables)),
            )
            .await;

            for (member, result) in chunk.iter().zip(results) {
                if let (true, Some(output)) = (result.is_completed(), &result.output) {
                    if let Some(name) = &member.output {
                        ctx.bind(name, output.clone());
                    }
                    outputs.insert(member.id.clone(), output.clone());
                } else if let Some(error) = &result.error {
                    ctx.errors.push(format!("step `{}`: {}", member.id, error));
                }
                members.push(result);
            }
        }

        let failed = members
            .iter()
            .filter(|m| m.status == StepStatus::Failed)
            .count();
        let mut result = StepResult::new(group, StepStatus::Completed);
        result.attempts = 1;
        if failed == 0 {
            let output = Value::Object(outputs);
            if let Some(name) = &group.output {
                ctx.bind(name, output.clone());
            }
            ctx.set_prev(output.clone());
            result.output = Some(output);
        } else {
            result.status = StepStatus::Failed;
            result.error = Some(format!("{failed} of {} members failed", members.len()));
        }
        result.parallel = members;
        result.duration_ms = elapsed_ms(started);
        result
    }

    async fn run_member(
        &self,
        def: &WorkflowDefinition,
        member: &WorkflowStep,
        variables: &HashMap<String, Value>,
    ) -> StepResult {
        if let Some(condition) = &member.condition {
            if !evaluate_condition(condition, variables) {
                return StepResult::new(member, StepStatus::Skipped);
            }
        }
        self.run_single(def, member, variables).await
    }

    /// One agent run per attempt, each raced against the step timeout
    async fn run_single(
        &self,
        def: &WorkflowDefinition,
        step: &WorkflowStep,
        variables: &HashMap<String, Value>,
    ) -> StepResult {
        let started = Instant::now();
        let agent = step.agent.as_deref().unwrap_or_default();
        let input = interpolate(&step.input, variables);
        let timeout = step
            .timeout_secs
            .or(def.settings.default_timeout_secs)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_STEP_TIMEOUT);

        let mut result = StepResult::new(step, StepStatus::Failed);
        result.resolved_input = Some(input.clone());

        let attempts = step.attempts();
        for attempt in 1..=attempts {
            result.attempts = attempt;
            tracing::info!(step = %step.id, agent, attempt, "step started");

            let error = match tokio::time::timeout(timeout, self.agent_loop.execute(agent, &input))
                .await
            {
                Ok(Ok(exec)) if exec.is_completed() => {
                    result.status = StepStatus::Completed;
                    result.output = exec.output;
                    result.error = None;
                    break;
                }
                Ok(Ok(exec)) => format!(
                    "agent `{agent}` did not complete ({} steps)",
                    exec.steps.len()
                ),
                Ok(Err(e)) => e.to_string(),
                Err(_) => Error::timeout(step.id.clone(), timeout.as_millis()).to_string(),
            };

            if attempt < attempts {
                tracing::warn!(step = %step.id, attempt, error = %error, "step failed, retrying");
            }
            result.error = Some(error);
        }

        result.duration_ms = elapsed_ms(started);
        result
    }
}

/// Apply declared input types and defaults; undeclared inputs pass through
fn resolve_inputs(
    def: &WorkflowDefinition,
    mut provided: HashMap<String, Value>,
) -> Result<HashMap<String, Value>> {
    let mut resolved = HashMap::with_capacity(provided.len() + def.inputs.len());
    for spec in &def.inputs {
        match provided.remove(&spec.name) {
            Some(value) => {
                let value = spec.input_type.coerce(value).ok_or_else(|| {
                    Error::invalid_argument(format!(
                        "input `{}` must be a {}",
                        spec.name, spec.input_type
                    ))
                    .with_operation("workflow::run")
                    .with_context("input", spec.name.clone())
                })?;
                resolved.insert(spec.name.clone(), value);
            }
            None => match &spec.default {
                Some(default) => {
                    resolved.insert(spec.name.clone(), default.clone());
                }
                None if spec.required => {
                    return Err(Error::invalid_argument(format!(
                        "missing required input `{}`",
                        spec.name
                    ))
                    .with_operation("workflow::run")
                    .with_context("input", spec.name.clone()));
                }
                None => {}
            },
        }
    }
    resolved.extend(provided);
    Ok(resolved)
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
