//! # Agentry Agent
//!
//! Drives agents to completion:
//! 1. An agent definition names a prompt, its tools and who it may delegate to
//! 2. The execution loop asks the model for one action per cycle
//! 3. Tool actions go through the permission gate, then the tool invoker
//! 4. `complete` ends the run; `delegate` hands off to a sub-loop
//! 5. Workflows sequence agent runs with conditions, parallel groups,
//!    retries and approval checkpoints
//!
//! The model decides, the loop bounds it.

mod agent;
mod definition;
mod execution;
pub mod response;
pub mod workflow;

#[cfg(test)]
mod testing;

pub use agent::{AgentLoop, ApprovalCallback, LoopConfig};
pub use definition::{AgentDefinition, AgentRegistry, StaticAgentRegistry};
pub use execution::{AgentExecution, AgentStep, ExecutionStatus, StepAction};
pub use response::{parse_action, ParsedAction};
pub use workflow::{
    parse_workflow, parse_workflow_yaml, CheckpointCallback, InputSpec, InputType, OnError,
    RunnerOptions, StepResult, StepStatus, WorkflowContext, WorkflowDefinition, WorkflowResult,
    WorkflowRunner, WorkflowSettings, WorkflowStep,
};
