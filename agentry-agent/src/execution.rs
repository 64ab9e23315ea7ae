//! Records of an agent run: one `AgentStep` per cycle, gathered in an
//! `AgentExecution`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// What a step did. Serialized as a plain string: `complete`, `delegate`,
/// `error`, or the tool name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StepAction {
    Tool(String),
    Complete,
    Delegate,
    Error,
}

impl From<String> for StepAction {
    fn from(s: String) -> Self {
        match s.as_str() {
            "complete" => StepAction::Complete,
            "delegate" => StepAction::Delegate,
            "error" => StepAction::Error,
            _ => StepAction::Tool(s),
        }
    }
}

impl From<StepAction> for String {
    fn from(action: StepAction) -> Self {
        action.to_string()
    }
}

impl fmt::Display for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepAction::Tool(name) => write!(f, "{}", name),
            StepAction::Complete => write!(f, "complete"),
            StepAction::Delegate => write!(f, "delegate"),
            StepAction::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStep {
    pub thought: String,
    pub action: StepAction,
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Unix millis
    pub timestamp: u64,
}

impl AgentStep {
    pub fn new(thought: impl Into<String>, action: StepAction, params: Value) -> Self {
        Self {
            thought: thought.into(),
            action,
            params,
            result: None,
            error: None,
            timestamp: now_millis(),
        }
    }

    /// A step recording a problem; the loop feeds it back to the model
    pub fn error(thought: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(thought, StepAction::Error, Value::Null).with_error(message)
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentExecution {
    pub agent_name: String,
    pub input: String,
    pub steps: Vec<AgentStep>,
    pub status: ExecutionStatus,
    pub started_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// The sub-run a successful delegation produced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegated: Option<Box<AgentExecution>>,
}

impl AgentExecution {
    pub fn new(agent_name: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            input: input.into(),
            steps: Vec::new(),
            status: ExecutionStatus::Running,
            started_at: now_millis(),
            finished_at: None,
            output: None,
            delegated: None,
        }
    }

    pub fn push(&mut self, step: AgentStep) {
        self.steps.push(step);
    }

    pub fn is_running(&self) -> bool {
        self.status == ExecutionStatus::Running
    }

    pub fn is_completed(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }

    /// Move out of `Running`. Later calls are ignored: a finished
    /// execution never changes status again.
    pub fn finish(&mut self, status: ExecutionStatus) {
        if !self.is_running() || status == ExecutionStatus::Running {
            return;
        }
        self.status = status;
        self.finished_at = Some(now_millis());
        if self.output.is_none() {
            self.output = Some(self.fallback_output());
        }
    }

    /// The last `complete` step, if any
    pub fn completion(&self) -> Option<&AgentStep> {
        self.steps
            .iter()
            .rev()
            .find(|s| s.action == StepAction::Complete)
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.finished_at.map(|end| end.saturating_sub(self.started_at))
    }

    /// Last `complete` result, else a summary built from recorded thoughts
    fn fallback_output(&self) -> Value {
        if let Some(result) = self.completion().and_then(|s| s.result.clone()) {
            return result;
        }
        let thoughts: Vec<&str> = self
            .steps
            .iter()
            .map(|s| s.thought.trim())
            .filter(|t| !t.is_empty())
            .collect();
        if thoughts.is_empty() {
            Value::String(format!(
                "{} stopped after {} steps without a result",
                self.agent_name,
                self.steps.len()
            ))
        } else {
            Value::String(format!("Incomplete. Progress so far:\n- {}", thoughts.join("\n- ")))
        }
    }
}

pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
