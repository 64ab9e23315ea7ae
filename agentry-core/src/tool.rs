//! # Tool Invocation
//!
//! `ToolExecutor` is the seam to whatever actually runs tools. `ToolInvoker`
//! puts the permission gate and a timeout in front of it.

use crate::permission::{PermissionGate, PermissionLevel, PermissionSource, RiskLevel};
use crate::resilience::{wrap, RetryPolicy};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    /// Ask before running unless a rule or grant says otherwise
    #[serde(default)]
    pub requires_confirmation: bool,
}

impl ToolInfo {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            requires_confirmation: false,
        }
    }

    pub fn confirmed(mut self) -> Self {
        self.requires_confirmation = true;
        self
    }
}

/// Registry + executor for tools
#[allow(async_fn_in_trait)]
pub trait ToolExecutor: Send + Sync {
    fn tool(&self, name: &str) -> Option<ToolInfo>;

    fn tools(&self) -> Vec<ToolInfo>;

    async fn execute_tool(&self, name: &str, args: Value) -> Result<Value>;
}

impl<T: ToolExecutor> ToolExecutor for Arc<T> {
    fn tool(&self, name: &str) -> Option<ToolInfo> {
        (**self).tool(name)
    }

    fn tools(&self) -> Vec<ToolInfo> {
        (**self).tools()
    }

    async fn execute_tool(&self, name: &str, args: Value) -> Result<Value> {
        (**self).execute_tool(name, args).await
    }
}

/// Outcome of checking a call against the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    Allowed(PermissionLevel),
    NeedsApproval { risk: RiskLevel },
    Denied,
}

/// The file path a call touches, if its arguments name one
pub fn target_path(args: &Value) -> Option<&str> {
    ["path", "file_path", "file"]
        .iter()
        .find_map(|key| args.get(*key).and_then(Value::as_str))
}

pub struct ToolInvoker<T> {
    executor: T,
    gate: Arc<PermissionGate>,
    policy: RetryPolicy,
}

impl<T: ToolExecutor> ToolInvoker<T> {
    /// Tools get one attempt with a 60 s timeout; side effects are not
    /// assumed to be idempotent.
    pub fn new(executor: T, gate: Arc<PermissionGate>) -> Self {
        Self {
            executor,
            gate,
            policy: RetryPolicy::once(Duration::from_secs(60)),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn executor(&self) -> &T {
        &self.executor
    }

    pub fn gate(&self) -> &Arc<PermissionGate> {
        &self.gate
    }

    /// Decide a call without changing any state
    pub fn authorize(
        &self,
        name: &str,
        args: &Value,
        session_id: Option<&str>,
    ) -> Result<Authorization> {
        self.decide(name, args, session_id, false)
    }

    fn decide(
        &self,
        name: &str,
        args: &Value,
        session_id: Option<&str>,
        claim: bool,
    ) -> Result<Authorization> {
        let info = self
            .executor
            .tool(name)
            .ok_or_else(|| Error::tool_not_found(name).with_operation("invoker::authorize"))?;

        let path = target_path(args);
        let resolution = if claim {
            self.gate.claim(name, session_id, path)
        } else {
            self.gate.resolve(name, session_id, path)
        };
        let needs_approval = Authorization::NeedsApproval {
            risk: self.gate.classify_risk(name, path),
        };

        Ok(match resolution.level {
            PermissionLevel::Deny => Authorization::Denied,
            PermissionLevel::Ask => needs_approval,
            _ if info.requires_confirmation && resolution.source == PermissionSource::Default => {
                needs_approval
            }
            level => Authorization::Allowed(level),
        })
    }

    /// Check, then execute under the timeout. An `allow_once` grant that
    /// lets the call through is spent before it runs.
    ///
    /// `approved` records that the caller already obtained a human (or
    /// auto) approval for this one call. A `deny` rule still wins.
    pub async fn invoke(
        &self,
        name: &str,
        args: Value,
        session_id: Option<&str>,
        approved: bool,
    ) -> Result<Value> {
        let authorization = self.decide(name, &args, session_id, true)?;
        match authorization {
            Authorization::Denied => {
                tracing::warn!(tool = name, "tool call denied by rule");
                return Err(Error::permission_denied(name, "denied by permission rule")
                    .with_operation("invoker::invoke"));
            }
            Authorization::NeedsApproval { risk } if !approved => {
                return Err(Error::permission_denied(name, "approval required")
                    .with_operation("invoker::invoke")
                    .with_context("risk", risk.to_string()));
            }
            _ => {}
        }

        let op_name = format!("tool:{name}");
        let result = wrap(&op_name, &self.policy, None, || {
            self.executor.execute_tool(name, args.clone())
        })
        .await;

        tracing::debug!(tool = name, ok = result.is_ok(), "tool call finished");
        result
    }
}
