//! # Agentry Core
//!
//! The protective layer between an agent and the outside world.
//!
//! ## Core Concepts
//! - **Provider**: Trait-based chat capability (`ChatProvider`) plus an
//!   OpenAI-compatible HTTP client
//! - **Resilience**: Timeout + bounded exponential-backoff retry, guarded by
//!   per-operation circuit breakers
//! - **Storage**: Key-value backends (memory, JSON files) for durable state
//! - **Permission**: The gate deciding whether a tool call may proceed
//! - **Tool**: Registry/executor seam and the invoker that ties it to the gate

pub mod permission;
pub mod provider;
pub mod resilience;
pub mod storage;
pub mod tool;

pub use agentry_error::{Error, ErrorKind, ErrorStatus, Result};
pub use permission::{
    BatchDecision, BatchEntry, GateConfig, PathPattern, PendingApproval, PermissionGate,
    PermissionLevel, PermissionRule, PermissionSource, Resolution, RiskLevel, RuleStore,
};
pub use provider::{
    ChatMessage, ChatProvider, CompletionRequest, CompletionResponse, FinishReason,
    OpenAiProvider, ProviderConfig, Role, ToolCall, ToolDefinition, Usage,
};
pub use resilience::{
    wrap, BreakerConfig, BreakerPermit, BreakerSet, BreakerSnapshot, CircuitBreaker, CircuitState,
    RetryPolicy,
};
pub use storage::{FileStorage, MemoryStorage, StorageBackend};
pub use tool::{target_path, Authorization, ToolExecutor, ToolInfo, ToolInvoker};
