//! # agentry-error
//!
//! Unified error handling for agentry.
//!
//! ## Design Philosophy
//!
//! - **ErrorKind**: Know what went wrong (e.g., ToolNotFound, CircuitOpen)
//! - **ErrorStatus**: Decide how to handle it (Permanent, Temporary, Persistent)
//! - **Error Context**: Assist in locating the cause with rich context
//! - **Error Source**: Wrap underlying errors without leaking raw types
//!
//! ## Usage
//!
//! ```rust
//! use agentry_error::{Error, ErrorKind};
//!
//! fn example() -> Result<(), Error> {
//!     Err(Error::new(ErrorKind::ToolNotFound, "tool 'deploy' is not registered")
//!         .with_operation("tool::invoke")
//!         .with_context("tool", "deploy")
//!         .with_context("agent", "release-manager"))
//! }
//! ```
//!
//! ## Principles
//!
//! - All library functions return `Result<T, agentry_error::Error>`
//! - External errors are wrapped with `set_source(err)`
//! - Same error handled once, subsequent ops only append context
//! - Don't abuse `From<OtherError>` to prevent raw error leakage

mod error;
mod kind;
mod status;

pub use error::Error;
pub use kind::ErrorKind;
pub use status::ErrorStatus;

/// Result type alias using agentry Error
pub type Result<T> = std::result::Result<T, Error>;
