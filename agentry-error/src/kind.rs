//! Error kinds for agentry operations

use std::fmt;

/// The kind of error that occurred.
///
/// Callers match on `ErrorKind` to decide how to react: the agent loop turns
/// most kinds into a corrective `error` step, the workflow runner maps them
/// onto a step's `on_error` policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // =========================================================================
    // General errors
    // =========================================================================
    /// An unexpected error occurred - catch-all for unhandled cases
    Unexpected,

    /// Invalid configuration
    ConfigInvalid,

    /// Invalid argument passed to function
    InvalidArgument,

    // =========================================================================
    // Tool errors
    // =========================================================================
    /// The requested tool is not registered or not allowed for the agent
    ToolNotFound,

    /// The permission gate or a human reviewer refused the call
    PermissionDenied,

    // =========================================================================
    // Agent errors
    // =========================================================================
    /// No agent with the requested name exists in the registry
    AgentNotFound,

    /// Delegation target not allowed, or depth ceiling reached
    DelegationDenied,

    /// The model produced output that could not be understood
    MalformedResponse,

    // =========================================================================
    // Workflow errors
    // =========================================================================
    /// Workflow definition failed validation
    WorkflowInvalid,

    // =========================================================================
    // Resilience errors
    // =========================================================================
    /// The operation did not finish within its time budget
    Timeout,

    /// A circuit breaker rejected the call without attempting it
    CircuitOpen,

    /// An external dependency (model, tool, HTTP endpoint) failed
    ExternalFailure,

    /// Rate limit exceeded
    RateLimited,

    /// Network error
    NetworkFailed,

    // =========================================================================
    // Storage / IO errors
    // =========================================================================
    /// Storage operation failed
    StorageFailed,

    /// Serialization/deserialization failed
    SerializationFailed,

    /// Failed to parse input
    ParseFailed,

    /// IO operation failed
    IoFailed,
}

impl ErrorKind {
    /// Returns the error kind as a static string
    pub fn as_str(&self) -> &'static str {
        match self {
            // General
            ErrorKind::Unexpected => "Unexpected",
            ErrorKind::ConfigInvalid => "ConfigInvalid",
            ErrorKind::InvalidArgument => "InvalidArgument",

            // Tool
            ErrorKind::ToolNotFound => "ToolNotFound",
            ErrorKind::PermissionDenied => "PermissionDenied",

            // Agent
            ErrorKind::AgentNotFound => "AgentNotFound",
            ErrorKind::DelegationDenied => "DelegationDenied",
            ErrorKind::MalformedResponse => "MalformedResponse",

            // Workflow
            ErrorKind::WorkflowInvalid => "WorkflowInvalid",

            // Resilience
            ErrorKind::Timeout => "Timeout",
            ErrorKind::CircuitOpen => "CircuitOpen",
            ErrorKind::ExternalFailure => "ExternalFailure",
            ErrorKind::RateLimited => "RateLimited",
            ErrorKind::NetworkFailed => "NetworkFailed",

            // Storage / IO
            ErrorKind::StorageFailed => "StorageFailed",
            ErrorKind::SerializationFailed => "SerializationFailed",
            ErrorKind::ParseFailed => "ParseFailed",
            ErrorKind::IoFailed => "IoFailed",
        }
    }

    /// Check if this error kind is retryable by default
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout
                | ErrorKind::ExternalFailure
                | ErrorKind::RateLimited
                | ErrorKind::NetworkFailed
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
