//! Validation and normalization of raw workflow definitions.
//!
//! The raw form is loose (every field optional, camelCase or snake_case);
//! the output is a [`WorkflowDefinition`] the runner can use without
//! further checks.

use super::{InputSpec, InputType, OnError, WorkflowDefinition, WorkflowSettings, WorkflowStep};
use crate::definition::AgentRegistry;
use agentry_core::{Error, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawWorkflow {
    name: Option<String>,
    description: Option<String>,
    #[serde(default)]
    steps: Vec<RawStep>,
    inputs: Option<RawInputs>,
    #[serde(default)]
    outputs: Vec<String>,
    #[serde(default)]
    settings: RawSettings,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStep {
    id: Option<String>,
    agent: Option<String>,
    input: Option<Value>,
    output: Option<String>,
    condition: Option<Value>,
    #[serde(alias = "on_error")]
    on_error: Option<String>,
    #[serde(alias = "max_retries")]
    max_retries: Option<u32>,
    #[serde(alias = "requires_approval")]
    requires_approval: Option<bool>,
    #[serde(alias = "approval_message")]
    approval_message: Option<String>,
    #[serde(default)]
    parallel: Vec<RawStep>,
    #[serde(alias = "timeout_secs", alias = "timeout")]
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawInputs {
    List(Vec<RawInput>),
    Map(BTreeMap<String, RawInput>),
}

#[derive(Debug, Default, Deserialize)]
struct RawInput {
    name: Option<String>,
    #[serde(rename = "type")]
    input_type: Option<String>,
    required: Option<bool>,
    default: Option<Value>,
    description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSettings {
    #[serde(alias = "max_parallel")]
    max_parallel: Option<i64>,
    #[serde(alias = "default_timeout_secs", alias = "defaultTimeoutSecs", alias = "default_timeout")]
    default_timeout: Option<u64>,
    #[serde(alias = "auto_approve")]
    auto_approve: Option<bool>,
}

fn invalid(message: impl Into<String>) -> Error {
    Error::workflow_invalid(message).with_operation("workflow::parse")
}

/// Validate `raw` against `registry` and fill in defaults.
///
/// Rejects a missing name, an empty step list, unknown agents (with the
/// offending step index in the error context), duplicate ids, steps with
/// both or neither of `agent`/`parallel`, and malformed inputs or settings.
pub fn parse_workflow(raw: &Value, registry: &dyn AgentRegistry) -> Result<WorkflowDefinition> {
    let raw: RawWorkflow = serde_json::from_value(raw.clone())
        .map_err(|e| invalid("workflow definition has the wrong shape").set_source(e))?;

    let name = raw
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| invalid("workflow needs a name"))?;
    if raw.steps.is_empty() {
        return Err(invalid("workflow has no steps").with_context("workflow", name));
    }

    let settings = normalize_settings(raw.settings)?;
    let inputs = match raw.inputs {
        Some(inputs) => normalize_inputs(inputs)?,
        None => Vec::new(),
    };

    let mut ids = HashSet::new();
    let mut steps = Vec::with_capacity(raw.steps.len());
    for (index, raw_step) in raw.steps.into_iter().enumerate() {
        let step = normalize_step(raw_step, index, registry, &mut ids)
            .map_err(|e| e.with_context("workflow", name.clone()))?;
        steps.push(step);
    }

    Ok(WorkflowDefinition {
        name,
        description: raw.description,
        steps,
        inputs,
        outputs: raw.outputs,
        settings,
    })
}

/// Parse YAML text, then validate it like [`parse_workflow`]
pub fn parse_workflow_yaml(text: &str, registry: &dyn AgentRegistry) -> Result<WorkflowDefinition> {
    let raw: Value = serde_yaml::from_str(text).map_err(|e| {
        Error::parse_failed("invalid workflow YAML")
            .with_operation("workflow::parse_yaml")
            .set_source(e)
    })?;
    parse_workflow(&raw, registry)
}

fn normalize_settings(raw: RawSettings) -> Result<WorkflowSettings> {
    let defaults = WorkflowSettings::default();
    let max_parallel = match raw.max_parallel {
        None => defaults.max_parallel,
        Some(n) if n >= 1 => n as usize,
        Some(n) => {
            return Err(invalid("maxParallel must be at least 1")
                .with_context("max_parallel", n.to_string()))
        }
    };
    Ok(WorkflowSettings {
        max_parallel,
        default_timeout_secs: raw.default_timeout,
        auto_approve: raw.auto_approve.unwrap_or(defaults.auto_approve),
    })
}

fn normalize_inputs(raw: RawInputs) -> Result<Vec<InputSpec>> {
    let entries: Vec<(Option<String>, RawInput)> = match raw {
        RawInputs::List(list) => list.into_iter().map(|i| (i.name.clone(), i)).collect(),
        RawInputs::Map(map) => map.into_iter().map(|(k, i)| (Some(k), i)).collect(),
    };

    let mut seen = HashSet::new();
    let mut specs = Vec::with_capacity(entries.len());
    for (name, input) in entries {
        let name = name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| invalid("input without a name"))?;
        if !seen.insert(name.clone()) {
            return Err(invalid(format!("duplicate input `{name}`")));
        }

        let type_name = input.input_type.as_deref().unwrap_or("any");
        let input_type = InputType::parse(type_name).ok_or_else(|| {
            invalid(format!("input `{name}` has unknown type `{type_name}`"))
                .with_context("input", name.clone())
        })?;
        if let Some(default) = &input.default {
            if !input_type.accepts(default) {
                return Err(invalid(format!(
                    "default of input `{name}` is not a {input_type}"
                ))
                .with_context("input", name));
            }
        }

        specs.push(InputSpec {
            name,
            input_type,
            required: input.required.unwrap_or(false),
            default: input.default,
            description: input.description,
        });
    }
    Ok(specs)
}

fn normalize_step(
    raw: RawStep,
    index: usize,
    registry: &dyn AgentRegistry,
    ids: &mut HashSet<String>,
) -> Result<WorkflowStep> {
    let step_ctx = index.to_string();
    let id = step_id(raw.id.as_deref(), || format!("step-{}", index + 1));
    if !ids.insert(id.clone()) {
        return Err(invalid(format!("duplicate step id `{id}`")).with_context("step", step_ctx));
    }

    let agent = raw.agent.map(|a| a.trim().to_string()).filter(|a| !a.is_empty());
    let on_error = parse_on_error(raw.on_error.as_deref())
        .and_then(|on_error| check_output(raw.output.as_deref()).map(|_| on_error))
        .map_err(|e| e.with_context("step", step_ctx.clone()))?;

    let parallel = match (&agent, raw.parallel.is_empty()) {
        (Some(_), false) => {
            return Err(invalid("a step has either `agent` or `parallel`, not both")
                .with_context("step", step_ctx))
        }
        (None, true) => {
            return Err(invalid("a step needs `agent` or a non-empty `parallel` list")
                .with_context("step", step_ctx))
        }
        (Some(agent), true) => {
            if !registry.has(agent) {
                return Err(invalid(format!("unknown agent `{agent}`"))
                    .with_context("step", step_ctx)
                    .with_context("agent", agent.clone()));
            }
            Vec::new()
        }
        (None, false) => raw
            .parallel
            .into_iter()
            .enumerate()
            .map(|(member, raw)| normalize_member(raw, index, member, registry, ids))
            .collect::<Result<Vec<_>>>()?,
    };

    Ok(WorkflowStep {
        id,
        agent,
        input: raw.input.map(template).unwrap_or_default(),
        output: raw.output,
        condition: raw.condition.map(template).filter(|c| !c.trim().is_empty()),
        on_error,
        max_retries: raw.max_retries.unwrap_or(0),
        requires_approval: raw.requires_approval.unwrap_or(false),
        approval_message: raw.approval_message,
        parallel,
        timeout_secs: raw.timeout_secs,
    })
}

fn normalize_member(
    raw: RawStep,
    index: usize,
    member: usize,
    registry: &dyn AgentRegistry,
    ids: &mut HashSet<String>,
) -> Result<WorkflowStep> {
    let with_ctx = |e: Error| {
        e.with_context("step", index.to_string())
            .with_context("member", member.to_string())
    };

    if !raw.parallel.is_empty() {
        return Err(with_ctx(invalid("parallel groups cannot be nested")));
    }
    if raw.requires_approval.unwrap_or(false) {
        return Err(with_ctx(invalid(
            "approval checkpoints go on the parallel group, not its members",
        )));
    }
    let Some(agent) = raw.agent.map(|a| a.trim().to_string()).filter(|a| !a.is_empty()) else {
        return Err(with_ctx(invalid("parallel member needs an `agent`")));
    };
    if !registry.has(&agent) {
        return Err(with_ctx(invalid(format!("unknown agent `{agent}`"))).with_context("agent", agent));
    }

    let id = step_id(raw.id.as_deref(), || format!("step-{}-{}", index + 1, member + 1));
    if !ids.insert(id.clone()) {
        return Err(with_ctx(invalid(format!("duplicate step id `{id}`"))));
    }
    let on_error = parse_on_error(raw.on_error.as_deref()).map_err(with_ctx)?;
    check_output(raw.output.as_deref()).map_err(with_ctx)?;

    Ok(WorkflowStep {
        id,
        agent: Some(agent),
        input: raw.input.map(template).unwrap_or_default(),
        output: raw.output,
        condition: raw.condition.map(template).filter(|c| !c.trim().is_empty()),
        on_error,
        max_retries: raw.max_retries.unwrap_or(0),
        requires_approval: false,
        approval_message: None,
        parallel: Vec::new(),
        timeout_secs: raw.timeout_secs,
    })
}

fn step_id(raw: Option<&str>, generate: impl FnOnce() -> String) -> String {
    raw.map(str::trim)
        .filter(|id| !id.is_empty())
        .map(String::from)
        .unwrap_or_else(generate)
}

fn parse_on_error(raw: Option<&str>) -> Result<OnError> {
    match raw {
        None => Ok(OnError::default()),
        Some(s) => OnError::parse(s).ok_or_else(|| invalid(format!("unknown onError `{s}`"))),
    }
}

fn check_output(output: Option<&str>) -> Result<()> {
    match output {
        Some(name) if name.trim().is_empty() || name == "prev" || name.starts_with('$') => {
            Err(invalid(format!("`{name}` cannot be used as an output name")))
        }
        _ => Ok(()),
    }
}

/// Templates may be written as YAML scalars of any type
fn template(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
