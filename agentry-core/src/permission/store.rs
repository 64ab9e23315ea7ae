//! Persisted permission rules on top of a `StorageBackend`.
//!
//! One row per `(tool, session, pattern)`. Key parts are hex-encoded so no
//! two rows share a key, and file-backed storage never has to rewrite them.
//! Rows are found by decoding every `rule.` entry rather than by parsing keys.

use super::{now_secs, PermissionLevel, PermissionRule};
use crate::storage::StorageBackend;
use crate::{Error, Result};
use std::sync::{Mutex, MutexGuard, PoisonError};

const PREFIX: &str = "rule.";

pub struct RuleStore {
    backend: Mutex<Box<dyn StorageBackend>>,
}

impl RuleStore {
    pub fn new(backend: impl StorageBackend + 'static) -> Self {
        Self {
            backend: Mutex::new(Box::new(backend)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn StorageBackend>> {
        self.backend.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `rule.<scope>.<tool>[.<pattern>]`; scope is `g` (global) or
    /// `s<session>`, every free-form part hex-encoded
    fn key(tool: &str, session_id: Option<&str>, pattern: Option<&str>) -> String {
        let scope = match session_id {
            Some(session) => format!("s{}", hex::encode(session)),
            None => "g".to_string(),
        };
        let tool = hex::encode(tool);
        match pattern {
            Some(p) => format!("{PREFIX}{scope}.{tool}.{}", hex::encode(p)),
            None => format!("{PREFIX}{scope}.{tool}"),
        }
    }

    /// Insert or replace the row for `(tool, session, pattern)`
    pub fn upsert(
        &self,
        tool: &str,
        level: PermissionLevel,
        session_id: Option<&str>,
        path_pattern: Option<&str>,
    ) -> Result<PermissionRule> {
        let rule = PermissionRule {
            tool: tool.to_string(),
            path_pattern: path_pattern.map(String::from),
            level,
            session_id: session_id.map(String::from),
            created_at: now_secs(),
        };
        let value = serde_json::to_value(&rule).map_err(|e| {
            Error::serialization_failed("failed to encode permission rule")
                .with_operation("rules::upsert")
                .set_source(e)
        })?;
        self.lock()
            .set(&Self::key(tool, session_id, path_pattern), value)?;
        Ok(rule)
    }

    fn rows(&self) -> Vec<(String, PermissionRule)> {
        let backend = self.lock();
        backend
            .keys_with_prefix(PREFIX)
            .into_iter()
            .filter_map(|key| {
                let value = backend.get(&key)?;
                match serde_json::from_value::<PermissionRule>(value) {
                    Ok(rule) => Some((key, rule)),
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "skipping undecodable permission rule");
                        None
                    }
                }
            })
            .collect()
    }

    /// Rules for one session, or only global rules when `session_id` is `None`
    pub fn list(&self, session_id: Option<&str>) -> Vec<PermissionRule> {
        self.rows()
            .into_iter()
            .map(|(_, rule)| rule)
            .filter(|rule| rule.session_id.as_deref() == session_id)
            .collect()
    }

    /// Session rules followed by global rules for `tool`
    pub fn for_tool(&self, tool: &str, session_id: Option<&str>) -> Vec<PermissionRule> {
        let mut rules: Vec<_> = self
            .rows()
            .into_iter()
            .map(|(_, rule)| rule)
            .filter(|rule| {
                rule.tool == tool
                    && (rule.session_id.is_none() || rule.session_id.as_deref() == session_id)
            })
            .collect();
        rules.sort_by_key(|rule| rule.session_id.is_none());
        rules
    }

    fn delete_where(&self, pred: impl Fn(&PermissionRule) -> bool) -> Result<usize> {
        let doomed: Vec<String> = self
            .rows()
            .into_iter()
            .filter(|(_, rule)| pred(rule))
            .map(|(key, _)| key)
            .collect();
        let mut backend = self.lock();
        for key in &doomed {
            backend.delete(key)?;
        }
        Ok(doomed.len())
    }

    /// Delete every row belonging to `session_id`
    pub fn delete_session(&self, session_id: &str) -> Result<usize> {
        self.delete_where(|rule| rule.session_id.as_deref() == Some(session_id))
    }

    /// Delete every row for `tool` in the given scope, patterned or not
    pub fn delete_tool(&self, tool: &str, session_id: Option<&str>) -> Result<usize> {
        self.delete_where(|rule| rule.tool == tool && rule.session_id.as_deref() == session_id)
    }
}
