//! The main Error type for agentry

use crate::{ErrorKind, ErrorStatus};
use std::fmt;

/// The unified error type for all agentry operations.
///
/// Carries what went wrong (`kind`), whether retrying makes sense
/// (`status`), where it happened (`operation`, with earlier operations kept
/// in `context` as `called`), and the wrapped cause (`source`).
///
/// # Example
///
/// ```rust
/// use agentry_error::{Error, ErrorKind};
///
/// let err = Error::new(ErrorKind::Timeout, "chat call exceeded 30s")
///     .with_operation("resilience::wrap")
///     .with_context("name", "chat:planner")
///     .with_context("attempt", "3");
///
/// assert_eq!(err.kind(), ErrorKind::Timeout);
/// assert!(err.is_retryable());
/// ```
pub struct Error {
    kind: ErrorKind,
    message: String,
    status: ErrorStatus,
    operation: &'static str,
    context: Vec<(&'static str, String)>,
    source: Option<anyhow::Error>,
}

impl Error {
    /// Create a new error. The status is derived from the kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let status = if kind.is_retryable() {
            ErrorStatus::Temporary
        } else {
            ErrorStatus::Permanent
        };

        Self {
            kind,
            message: message.into(),
            status,
            operation: "",
            context: Vec::new(),
            source: None,
        }
    }

    // =========================================================================
    // Getters
    // =========================================================================

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> ErrorStatus {
        self.status
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn context(&self) -> &[(&'static str, String)] {
        &self.context
    }

    /// Look up the most recent context value for `key`
    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context
            .iter()
            .rev()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn source_ref(&self) -> Option<&anyhow::Error> {
        self.source.as_ref()
    }

    // =========================================================================
    // Builders (chainable)
    // =========================================================================

    pub fn with_status(mut self, status: ErrorStatus) -> Self {
        self.status = status;
        self
    }

    /// Mark as temporary (retryable)
    pub fn temporary(mut self) -> Self {
        self.status = ErrorStatus::Temporary;
        self
    }

    /// Mark as permanent (not retryable)
    pub fn permanent(mut self) -> Self {
        self.status = ErrorStatus::Permanent;
        self
    }

    /// Set the operation that caused this error.
    ///
    /// A previously set operation moves into context as "called" so the
    /// call chain survives.
    pub fn with_operation(mut self, operation: &'static str) -> Self {
        if !self.operation.is_empty() {
            self.context.push(("called", self.operation.to_string()));
        }
        self.operation = operation;
        self
    }

    pub fn with_context(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.context.push((key, value.into()));
        self
    }

    /// Set the source error.
    ///
    /// # Panics (debug only)
    /// Panics in debug mode if source was already set.
    pub fn set_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        debug_assert!(self.source.is_none(), "source error already set");
        self.source = Some(source.into());
        self
    }

    // =========================================================================
    // Status mutations
    // =========================================================================

    /// Mark as persistent after failed retries
    pub fn persist(mut self) -> Self {
        self.status = self.status.persist();
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.status.is_retryable()
    }
}

// =============================================================================
// Display - compact, single-line format for logs and step ledgers
// =============================================================================

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.kind, self.status)?;
        if !self.operation.is_empty() {
            write!(f, " at {}", self.operation)?;
        }

        if !self.context.is_empty() {
            let pairs: Vec<String> = self
                .context
                .iter()
                .map(|(key, value)| format!("{}: {}", key, value))
                .collect();
            write!(f, ", context {{ {} }}", pairs.join(", "))?;
        }

        if !self.message.is_empty() {
            write!(f, " => {}", self.message)?;
        }

        Ok(())
    }
}

// =============================================================================
// Debug - verbose, multi-line format
// =============================================================================

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} ({}) at {}", self.kind, self.status, self.operation)?;

        if !self.message.is_empty() {
            writeln!(f, "\n    Message: {}", self.message)?;
        }

        if !self.context.is_empty() {
            writeln!(f, "\n    Context:")?;
            for (key, value) in &self.context {
                writeln!(f, "        {}: {}", key, value)?;
            }
        }

        if let Some(source) = &self.source {
            writeln!(f, "\n    Source: {:?}", source)?;
        }

        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            std::io::ErrorKind::TimedOut => ErrorKind::Timeout,
            _ => ErrorKind::IoFailed,
        };
        Error::new(kind, err.to_string())
            .with_operation("io")
            .set_source(err)
    }
}

// =============================================================================
// Convenience constructors
// =============================================================================

impl Error {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unexpected, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn tool_not_found(tool: impl Into<String>) -> Self {
        let tool = tool.into();
        Self::new(ErrorKind::ToolNotFound, format!("tool '{}' not found", tool))
            .with_context("tool", tool)
    }

    pub fn permission_denied(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        let tool = tool.into();
        Self::new(ErrorKind::PermissionDenied, reason).with_context("tool", tool)
    }

    pub fn agent_not_found(agent: impl Into<String>) -> Self {
        let agent = agent.into();
        Self::new(ErrorKind::AgentNotFound, format!("agent '{}' not found", agent))
            .with_context("agent", agent)
    }

    pub fn delegation_denied(target: impl Into<String>, reason: impl Into<String>) -> Self {
        let target = target.into();
        Self::new(ErrorKind::DelegationDenied, reason).with_context("target", target)
    }

    pub fn malformed_response(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedResponse, message)
    }

    pub fn workflow_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::WorkflowInvalid, message)
    }

    /// A timeout after `millis` milliseconds
    pub fn timeout(name: impl Into<String>, millis: u128) -> Self {
        let name = name.into();
        Self::new(
            ErrorKind::Timeout,
            format!("'{}' timed out after {}ms", name, millis),
        )
        .with_context("name", name)
    }

    pub fn circuit_open(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(
            ErrorKind::CircuitOpen,
            format!("circuit '{}' is open", name),
        )
        .with_context("breaker", name)
    }

    pub fn external_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExternalFailure, message)
    }

    pub fn storage_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StorageFailed, message)
    }

    pub fn serialization_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SerializationFailed, message)
    }

    pub fn parse_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ParseFailed, message)
    }
}
