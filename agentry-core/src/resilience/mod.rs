//! # Resilience
//!
//! Every call that leaves the process (chat completions, tool executions)
//! goes through [`wrap`]: a per-attempt timeout, bounded exponential backoff,
//! and an optional [`CircuitBreaker`] owned by the caller.

mod breaker;
mod retry;

pub use breaker::{
    BreakerConfig, BreakerPermit, BreakerSet, BreakerSnapshot, CircuitBreaker, CircuitState,
};
pub use retry::{wrap, RetryPolicy};
