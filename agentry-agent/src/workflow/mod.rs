//! Declarative workflows: an ordered list of agent runs with conditions,
//! parallel groups, retries and approval checkpoints.
//!
//! A raw definition goes through [`parse_workflow`] (validation and
//! normalization), then [`WorkflowRunner::run`] executes it.

mod interpolate;
mod parser;
mod runner;

pub use interpolate::{evaluate_condition, interpolate, lookup};
pub use parser::{parse_workflow, parse_workflow_yaml};
pub use runner::{CheckpointCallback, RunnerOptions, WorkflowRunner};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Variable holding the output of the last completed step
pub const PREV: &str = "$prev";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    #[default]
    Stop,
    Continue,
    /// Retry up to `max_retries`, then continue
    Retry,
}

impl OnError {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stop" => Some(OnError::Stop),
            "continue" => Some(OnError::Continue),
            "retry" => Some(OnError::Retry),
            _ => None,
        }
    }

    pub fn halts(self) -> bool {
        self == OnError::Stop
    }
}

/// A normalized step. Either `agent` is set or `parallel` is non-empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowStep {
    pub id: String,
    pub agent: Option<String>,
    /// Input template, interpolated against the workflow variables
    pub input: String,
    /// Variable the step's output is bound to
    pub output: Option<String>,
    pub condition: Option<String>,
    pub on_error: OnError,
    pub max_retries: u32,
    pub requires_approval: bool,
    pub approval_message: Option<String>,
    pub parallel: Vec<WorkflowStep>,
    pub timeout_secs: Option<u64>,
}

impl WorkflowStep {
    pub fn is_parallel(&self) -> bool {
        !self.parallel.is_empty()
    }

    /// Attempts a single step gets before its failure is final
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    String,
    Number,
    Boolean,
    Object,
    Array,
    Any,
}

impl InputType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "string" => Some(InputType::String),
            "number" | "integer" => Some(InputType::Number),
            "boolean" | "bool" => Some(InputType::Boolean),
            "object" => Some(InputType::Object),
            "array" | "list" => Some(InputType::Array),
            "any" | "" => Some(InputType::Any),
            _ => None,
        }
    }

    pub fn accepts(self, value: &Value) -> bool {
        match self {
            InputType::String => value.is_string(),
            InputType::Number => value.is_number(),
            InputType::Boolean => value.is_boolean(),
            InputType::Object => value.is_object(),
            InputType::Array => value.is_array(),
            InputType::Any => true,
        }
    }

    /// Coerce a command-line string into this type
    pub fn coerce(self, value: Value) -> Option<Value> {
        if self.accepts(&value) {
            return Some(value);
        }
        let Value::String(s) = &value else {
            return None;
        };
        match self {
            InputType::Number => s.trim().parse::<serde_json::Number>().ok().map(Value::Number),
            InputType::Boolean => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Some(Value::Bool(true)),
                "false" | "no" | "0" => Some(Value::Bool(false)),
                _ => None,
            },
            InputType::Object | InputType::Array => serde_json::from_str::<Value>(s)
                .ok()
                .filter(|v| self.accepts(v)),
            InputType::String | InputType::Any => Some(value),
        }
    }
}

impl fmt::Display for InputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InputType::String => "string",
            InputType::Number => "number",
            InputType::Boolean => "boolean",
            InputType::Object => "object",
            InputType::Array => "array",
            InputType::Any => "any",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputSpec {
    pub name: String,
    pub input_type: InputType,
    pub required: bool,
    pub default: Option<Value>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkflowSettings {
    /// Largest chunk of a parallel group run at once
    pub max_parallel: usize,
    pub default_timeout_secs: Option<u64>,
    pub auto_approve: bool,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            max_parallel: 3,
            default_timeout_secs: None,
            auto_approve: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowDefinition {
    pub name: String,
    pub description: Option<String>,
    pub steps: Vec<WorkflowStep>,
    pub inputs: Vec<InputSpec>,
    /// Outputs reported in the result; empty means all
    pub outputs: Vec<String>,
    pub settings: WorkflowSettings,
}

/// Mutable state of one run, owned by the runner
#[derive(Debug, Clone, Default)]
pub struct WorkflowContext {
    pub inputs: HashMap<String, Value>,
    pub outputs: HashMap<String, Value>,
    /// Inputs, bound step outputs and [`PREV`]
    pub variables: HashMap<String, Value>,
    pub current_step: usize,
    pub errors: Vec<String>,
    /// Step ids whose checkpoint was approved
    pub checkpoints: Vec<String>,
}

impl WorkflowContext {
    pub fn new(inputs: HashMap<String, Value>) -> Self {
        Self {
            variables: inputs.clone(),
            inputs,
            ..Default::default()
        }
    }

    /// Bind a step output to its variable name
    pub fn bind(&mut self, name: &str, value: Value) {
        self.outputs.insert(name.to_string(), value.clone());
        self.variables.insert(name.to_string(), value);
    }

    pub fn set_prev(&mut self, value: Value) {
        self.variables.insert(PREV.to_string(), value);
    }

    pub fn prev(&self) -> Option<&Value> {
        self.variables.get(PREV)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Completed,
    Failed,
    Skipped,
    Denied,
}

/// Ledger entry for one step
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    pub status: StepStatus,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_input: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parallel: Vec<StepResult>,
}

impl StepResult {
    pub(crate) fn new(step: &WorkflowStep, status: StepStatus) -> Self {
        Self {
            step_id: step.id.clone(),
            agent: step.agent.clone(),
            status,
            duration_ms: 0,
            output: None,
            error: None,
            attempts: 0,
            resolved_input: None,
            parallel: Vec::new(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == StepStatus::Completed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowResult {
    pub success: bool,
    pub outputs: HashMap<String, Value>,
    pub steps: Vec<StepResult>,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

impl WorkflowResult {
    pub fn step(&self, id: &str) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.step_id == id)
    }
}
