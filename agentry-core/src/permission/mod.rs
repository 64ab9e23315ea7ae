//! # Permission Gate
//!
//! Decides whether a tool call may proceed. Resolution order, first match
//! wins:
//!
//! 1. sensitive path (`.env`, keys, credentials) → always `ask`
//! 2. session override for this tool + path
//! 3. session override for this tool
//! 4. persisted rule (session row before global row)
//! 5. built-in default (read-only tools `allow_session`, everything else `ask`)
//!
//! Only `allow_once` and `allow_session` let a call through.

mod gate;
mod pattern;
mod store;

pub use gate::{GateConfig, PermissionGate};
pub use pattern::PathPattern;
pub use store::RuleStore;

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    Ask,
    AllowOnce,
    AllowSession,
    Deny,
}

impl PermissionLevel {
    pub fn is_allowed(&self) -> bool {
        matches!(self, PermissionLevel::AllowOnce | PermissionLevel::AllowSession)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionLevel::Ask => "ask",
            PermissionLevel::AllowOnce => "allow_once",
            PermissionLevel::AllowSession => "allow_session",
            PermissionLevel::Deny => "deny",
        }
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which tier of the resolution order produced a level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionSource {
    SensitivePath,
    SessionPath,
    SessionTool,
    Persisted,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub level: PermissionLevel,
    pub source: PermissionSource,
}

/// A persisted rule. `session_id: None` is a global rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRule {
    pub tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_pattern: Option<String>,
    pub level: PermissionLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Unix seconds
    pub created_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        };
        write!(f, "{}", s)
    }
}

/// An operation waiting for a human decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub id: String,
    pub tool: String,
    pub path: Option<String>,
    pub args: serde_json::Value,
    pub description: String,
    pub risk_level: RiskLevel,
}

/// One `{tool, path}` pair for batch checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    pub tool: String,
    pub path: Option<String>,
}

impl BatchEntry {
    pub fn new(tool: impl Into<String>, path: Option<&str>) -> Self {
        Self {
            tool: tool.into(),
            path: path.map(String::from),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchDecision {
    pub allowed: Vec<BatchEntry>,
    pub denied: Vec<BatchEntry>,
    pub needs_approval: Vec<BatchEntry>,
}

impl BatchDecision {
    pub fn all_allowed(&self) -> bool {
        self.denied.is_empty() && self.needs_approval.is_empty()
    }
}

pub(crate) fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_allow_levels_pass() {
        assert!(PermissionLevel::AllowOnce.is_allowed());
        assert!(PermissionLevel::AllowSession.is_allowed());
        assert!(!PermissionLevel::Ask.is_allowed());
        assert!(!PermissionLevel::Deny.is_allowed());
    }

    #[test]
    fn test_level_serde_names() {
        let json = serde_json::to_string(&PermissionLevel::AllowSession).unwrap();
        assert_eq!(json, "\"allow_session\"");
        let level: PermissionLevel = serde_json::from_str("\"allow_once\"").unwrap();
        assert_eq!(level, PermissionLevel::AllowOnce);
    }

    #[test]
    fn test_risk_ordering() {
        assert!(RiskLevel::High > RiskLevel::Medium);
        assert!(RiskLevel::Medium > RiskLevel::Low);
    }
}
