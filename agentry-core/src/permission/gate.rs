use super::pattern::{compile_all, PathPattern};
use super::store::RuleStore;
use super::{
    BatchDecision, BatchEntry, PendingApproval, PermissionLevel, PermissionRule, PermissionSource,
    Resolution, RiskLevel,
};
use crate::storage::StorageBackend;
use crate::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateConfig {
    /// Tools that default to `allow_session` and carry low risk
    pub read_only_tools: Vec<String>,
    /// Tools that are always high risk
    pub shell_tools: Vec<String>,
    /// Paths that always require a decision, whatever the rules say
    pub sensitive_patterns: Vec<String>,
}

impl Default for GateConfig {
    fn default() -> Self {
        let strings =
            |items: &[&str]| -> Vec<String> { items.iter().map(|s| s.to_string()).collect() };
        Self {
            read_only_tools: strings(&[
                "read_file",
                "list_dir",
                "glob",
                "grep",
                "search",
                "web_fetch",
                "web_search",
            ]),
            shell_tools: strings(&["bash", "shell", "exec", "run_command", "delete_file"]),
            sensitive_patterns: strings(&[
                ".env",
                ".env.*",
                "*.pem",
                "*.key",
                "id_rsa*",
                "id_ed25519*",
                ".ssh/**",
                ".aws/**",
                ".gnupg/**",
                "**/credentials*",
                "**/secrets*",
                ".git/config",
            ]),
        }
    }
}

impl GateConfig {
    pub fn with_sensitive_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sensitive_patterns
            .extend(patterns.into_iter().map(Into::into));
        self
    }

    pub fn is_read_only(&self, tool: &str) -> bool {
        self.read_only_tools.iter().any(|t| t == tool)
    }

    pub fn is_shell(&self, tool: &str) -> bool {
        self.shell_tools.iter().any(|t| t == tool)
    }
}

#[derive(Debug)]
struct PathGrant {
    tool: String,
    pattern: PathPattern,
    level: PermissionLevel,
}

#[derive(Debug, Default)]
struct SessionState {
    tool_grants: HashMap<String, PermissionLevel>,
    path_grants: Vec<PathGrant>,
    queue: Vec<PendingApproval>,
}

impl SessionState {
    /// Latest grant for `tool` whose pattern matches `path`
    fn path_grant(&self, tool: &str, path: &str) -> Option<usize> {
        self.path_grants
            .iter()
            .rposition(|g| g.tool == tool && g.pattern.matches(path))
    }
}

/// Cache key: `None` is the global scope, so no session id can alias it
type Scope = Option<String>;

fn scope(session_id: Option<&str>) -> Scope {
    session_id.map(String::from)
}

/// Per-process permission authority, shared by handle (`Arc<PermissionGate>`).
pub struct PermissionGate {
    config: GateConfig,
    sensitive: Vec<PathPattern>,
    rules: RuleStore,
    sessions: Mutex<HashMap<Scope, SessionState>>,
    next_id: AtomicU64,
}

impl PermissionGate {
    pub fn new(config: GateConfig, backend: impl StorageBackend + 'static) -> Result<Self> {
        let sensitive = compile_all(&config.sensitive_patterns)
            .map_err(|e| e.with_operation("gate::new"))?;
        Ok(Self {
            config,
            sensitive,
            rules: RuleStore::new(backend),
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<Scope, SessionState>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_sensitive(&self, path: &str) -> bool {
        self.sensitive.iter().any(|p| p.matches(path))
    }

    /// Resolve the effective level for a call, reporting which tier decided
    pub fn resolve(&self, tool: &str, session_id: Option<&str>, path: Option<&str>) -> Resolution {
        self.resolve_inner(tool, session_id, path, false)
    }

    /// Resolve for a call about to run. An `allow_once` grant that decides
    /// is spent under the same lock, so concurrent calls cannot share it.
    pub fn claim(&self, tool: &str, session_id: Option<&str>, path: Option<&str>) -> Resolution {
        self.resolve_inner(tool, session_id, path, true)
    }

    fn resolve_inner(
        &self,
        tool: &str,
        session_id: Option<&str>,
        path: Option<&str>,
        claim: bool,
    ) -> Resolution {
        let resolution = self.lookup(tool, session_id, path, claim);
        tracing::debug!(
            tool,
            session = session_id.unwrap_or_default(),
            path = path.unwrap_or(""),
            level = %resolution.level,
            source = ?resolution.source,
            "permission resolved"
        );
        resolution
    }

    fn lookup(
        &self,
        tool: &str,
        session_id: Option<&str>,
        path: Option<&str>,
        claim: bool,
    ) -> Resolution {
        let found = |level, source| Resolution { level, source };

        if path.is_some_and(|p| self.is_sensitive(p)) {
            return found(PermissionLevel::Ask, PermissionSource::SensitivePath);
        }

        {
            let mut sessions = self.sessions();
            if let Some(state) = sessions.get_mut(&scope(session_id)) {
                if let Some(idx) = path.and_then(|p| state.path_grant(tool, p)) {
                    let level = state.path_grants[idx].level;
                    if claim && level == PermissionLevel::AllowOnce {
                        state.path_grants.remove(idx);
                    }
                    return found(level, PermissionSource::SessionPath);
                }
                if let Some(level) = state.tool_grants.get(tool).copied() {
                    if claim && level == PermissionLevel::AllowOnce {
                        state.tool_grants.remove(tool);
                    }
                    return found(level, PermissionSource::SessionTool);
                }
            }
        }

        if let Some(rule) = self.persisted_rule(tool, session_id, path) {
            return found(rule.level, PermissionSource::Persisted);
        }

        let level = if self.config.is_read_only(tool) {
            PermissionLevel::AllowSession
        } else {
            PermissionLevel::Ask
        };
        found(level, PermissionSource::Default)
    }

    /// Best persisted rule: session before global, then patterned before
    /// tool-wide. A patterned rule only applies to a matching path.
    fn persisted_rule(
        &self,
        tool: &str,
        session_id: Option<&str>,
        path: Option<&str>,
    ) -> Option<PermissionRule> {
        self.rules
            .for_tool(tool, session_id)
            .into_iter()
            .filter(|rule| match (&rule.path_pattern, path) {
                (None, _) => true,
                (Some(_), None) => false,
                (Some(pattern), Some(path)) => match PathPattern::new(pattern) {
                    Ok(p) => p.matches(path),
                    Err(e) => {
                        tracing::warn!(tool, pattern = %pattern, error = %e, "ignoring rule with bad pattern");
                        false
                    }
                },
            })
            .min_by_key(|rule| (rule.session_id.is_none(), rule.path_pattern.is_none()))
    }

    pub fn get_permission(
        &self,
        tool: &str,
        session_id: Option<&str>,
        path: Option<&str>,
    ) -> PermissionLevel {
        self.resolve(tool, session_id, path).level
    }

    /// Record a decision.
    ///
    /// `allow_once` lives only in the session cache and is consumed by the
    /// next allowed call. `allow_session` and `deny` are cached and
    /// persisted. `ask` drops the cached override and persists.
    pub fn set_permission(
        &self,
        tool: &str,
        level: PermissionLevel,
        session_id: Option<&str>,
        path: Option<&str>,
    ) -> Result<()> {
        let pattern = path
            .map(PathPattern::new)
            .transpose()
            .map_err(|e| e.with_operation("gate::set_permission"))?;

        {
            let mut sessions = self.sessions();
            let state = sessions.entry(scope(session_id)).or_default();
            match &pattern {
                Some(pattern) => {
                    state
                        .path_grants
                        .retain(|g| !(g.tool == tool && g.pattern.as_str() == pattern.as_str()));
                    if level != PermissionLevel::Ask {
                        state.path_grants.push(PathGrant {
                            tool: tool.to_string(),
                            pattern: pattern.clone(),
                            level,
                        });
                    }
                }
                None => {
                    if level == PermissionLevel::Ask {
                        state.tool_grants.remove(tool);
                    } else {
                        state.tool_grants.insert(tool.to_string(), level);
                    }
                }
            }
        }

        tracing::info!(
            tool,
            level = %level,
            session = session_id.unwrap_or_default(),
            path = path.unwrap_or(""),
            "permission set"
        );

        if level == PermissionLevel::AllowOnce {
            return Ok(());
        }
        self.rules
            .upsert(tool, level, session_id, path)
            .map(|_| ())
            .map_err(|e| e.with_operation("gate::set_permission"))
    }

    /// Remove every cached and persisted decision for `tool` in a scope
    pub fn revoke(&self, tool: &str, session_id: Option<&str>) -> Result<()> {
        if let Some(state) = self.sessions().get_mut(&scope(session_id)) {
            state.tool_grants.remove(tool);
            state.path_grants.retain(|g| g.tool != tool);
        }
        self.rules
            .delete_tool(tool, session_id)
            .map(|_| ())
            .map_err(|e| e.with_operation("gate::revoke"))
    }

    pub fn list_rules(&self, session_id: Option<&str>) -> Vec<PermissionRule> {
        self.rules.list(session_id)
    }

    /// Forget a session: cache, queue, and persisted rows
    pub fn clear_session(&self, session_id: &str) -> Result<()> {
        self.sessions().remove(&scope(Some(session_id)));
        let removed = self
            .rules
            .delete_session(session_id)
            .map_err(|e| e.with_operation("gate::clear_session"))?;
        tracing::info!(session = session_id, removed, "session cleared");
        Ok(())
    }

    /// Partition calls by outcome without changing any state
    pub fn check_batch(&self, entries: &[BatchEntry], session_id: Option<&str>) -> BatchDecision {
        let mut decision = BatchDecision::default();
        for entry in entries {
            let level = self.get_permission(&entry.tool, session_id, entry.path.as_deref());
            let bucket = match level {
                PermissionLevel::AllowOnce | PermissionLevel::AllowSession => &mut decision.allowed,
                PermissionLevel::Deny => &mut decision.denied,
                PermissionLevel::Ask => &mut decision.needs_approval,
            };
            bucket.push(entry.clone());
        }
        decision
    }

    pub fn classify_risk(&self, tool: &str, path: Option<&str>) -> RiskLevel {
        if self.config.is_shell(tool) || path.is_some_and(|p| self.is_sensitive(p)) {
            RiskLevel::High
        } else if self.config.is_read_only(tool) {
            RiskLevel::Low
        } else {
            RiskLevel::Medium
        }
    }

    fn generate_id(&self) -> String {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("approval_{millis:x}_{n}")
    }

    // ------------------------------------------------------------------
    // Approval queue
    // ------------------------------------------------------------------

    pub fn queue_for_approval(
        &self,
        session_id: Option<&str>,
        tool: &str,
        path: Option<&str>,
        args: serde_json::Value,
        description: impl Into<String>,
    ) -> PendingApproval {
        let pending = PendingApproval {
            id: self.generate_id(),
            tool: tool.to_string(),
            path: path.map(String::from),
            args,
            description: description.into(),
            risk_level: self.classify_risk(tool, path),
        };
        self.sessions()
            .entry(scope(session_id))
            .or_default()
            .queue
            .push(pending.clone());
        pending
    }

    pub fn pending(&self, session_id: Option<&str>) -> Vec<PendingApproval> {
        self.sessions()
            .get(&scope(session_id))
            .map(|state| state.queue.clone())
            .unwrap_or_default()
    }

    fn take_pending(&self, session_id: Option<&str>, id: Option<&str>) -> Vec<PendingApproval> {
        let mut sessions = self.sessions();
        let Some(state) = sessions.get_mut(&scope(session_id)) else {
            return Vec::new();
        };
        match id {
            Some(id) => match state.queue.iter().position(|p| p.id == id) {
                Some(idx) => vec![state.queue.remove(idx)],
                None => Vec::new(),
            },
            None => std::mem::take(&mut state.queue),
        }
    }

    fn grant(&self, session_id: Option<&str>, op: &PendingApproval, remember: bool) -> Result<()> {
        let level = if remember {
            PermissionLevel::AllowSession
        } else {
            PermissionLevel::AllowOnce
        };
        self.set_permission(&op.tool, level, session_id, op.path.as_deref())
    }

    /// Approve one queued operation. `remember` promotes it to a session
    /// grant (path-scoped when the operation has a path); otherwise it is
    /// allowed once.
    pub fn approve_operation(
        &self,
        session_id: Option<&str>,
        id: &str,
        remember: bool,
    ) -> Result<Option<PendingApproval>> {
        let Some(op) = self.take_pending(session_id, Some(id)).pop() else {
            return Ok(None);
        };
        self.grant(session_id, &op, remember)?;
        Ok(Some(op))
    }

    pub fn approve_all(
        &self,
        session_id: Option<&str>,
        remember: bool,
    ) -> Result<Vec<PendingApproval>> {
        let ops = self.take_pending(session_id, None);
        for op in &ops {
            self.grant(session_id, op, remember)?;
        }
        Ok(ops)
    }

    pub fn deny_operation(&self, session_id: Option<&str>, id: &str) -> Option<PendingApproval> {
        let op = self.take_pending(session_id, Some(id)).pop()?;
        tracing::warn!(tool = %op.tool, id, "operation denied");
        Some(op)
    }

    /// Take an operation off the queue without granting or denying it,
    /// for callers that ran (or abandoned) it under their own decision
    pub fn withdraw_operation(
        &self,
        session_id: Option<&str>,
        id: &str,
    ) -> Option<PendingApproval> {
        self.take_pending(session_id, Some(id)).pop()
    }

    pub fn deny_all(&self, session_id: Option<&str>) -> Vec<PendingApproval> {
        let ops = self.take_pending(session_id, None);
        if !ops.is_empty() {
            tracing::warn!(count = ops.len(), "all pending operations denied");
        }
        ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileStorage, MemoryStorage};
    use serde_json::json;
    use std::sync::Arc;

    fn gate() -> PermissionGate {
        PermissionGate::new(GateConfig::default(), MemoryStorage::new()).unwrap()
    }

    #[test]
    fn test_builtin_defaults() {
        let gate = gate();
        assert_eq!(
            gate.get_permission("read_file", None, Some("src/main.rs")),
            PermissionLevel::AllowSession
        );
        assert_eq!(gate.get_permission("write_file", None, None), PermissionLevel::Ask);
        assert_eq!(gate.get_permission("bash", Some("s1"), None), PermissionLevel::Ask);
    }

    #[test]
    fn test_sensitive_path_overrides_session_grant() {
        let gate = gate();
        gate.set_permission("read_file", PermissionLevel::AllowSession, Some("s1"), None)
            .unwrap();

        let resolution = gate.resolve("read_file", Some("s1"), Some("app/.env"));
        assert_eq!(resolution.level, PermissionLevel::Ask);
        assert_eq!(resolution.source, PermissionSource::SensitivePath);

        assert_eq!(
            gate.get_permission("read_file", Some("s1"), Some("app/main.rs")),
            PermissionLevel::AllowSession
        );
    }

    #[test]
    fn test_session_grant_then_clear() {
        let gate = gate();
        gate.set_permission("write_file", PermissionLevel::AllowSession, Some("s1"), None)
            .unwrap();

        assert_eq!(
            gate.get_permission("write_file", Some("s1"), None),
            PermissionLevel::AllowSession
        );
        assert_eq!(gate.get_permission("write_file", Some("s2"), None), PermissionLevel::Ask);
        assert_eq!(gate.list_rules(Some("s1")).len(), 1);

        gate.clear_session("s1").unwrap();
        assert_eq!(gate.get_permission("write_file", Some("s1"), None), PermissionLevel::Ask);
        assert!(gate.list_rules(Some("s1")).is_empty());
    }

    #[test]
    fn test_path_override_beats_tool_override() {
        let gate = gate();
        gate.set_permission("write_file", PermissionLevel::Deny, Some("s1"), None)
            .unwrap();
        gate.set_permission("write_file", PermissionLevel::AllowSession, Some("s1"), Some("tmp/**"))
            .unwrap();

        let r = gate.resolve("write_file", Some("s1"), Some("tmp/out.txt"));
        assert_eq!(r.level, PermissionLevel::AllowSession);
        assert_eq!(r.source, PermissionSource::SessionPath);
        assert_eq!(
            gate.get_permission("write_file", Some("s1"), Some("src/lib.rs")),
            PermissionLevel::Deny
        );
    }

    #[test]
    fn test_allow_once_is_not_persisted_and_is_consumed() {
        let gate = gate();
        gate.set_permission("bash", PermissionLevel::AllowOnce, Some("s1"), None)
            .unwrap();
        assert!(gate.list_rules(Some("s1")).is_empty());
        assert_eq!(gate.get_permission("bash", Some("s1"), None), PermissionLevel::AllowOnce);

        let claimed = gate.claim("bash", Some("s1"), None);
        assert_eq!(claimed.level, PermissionLevel::AllowOnce);
        assert_eq!(gate.get_permission("bash", Some("s1"), None), PermissionLevel::Ask);
        assert_eq!(gate.claim("bash", Some("s1"), None).level, PermissionLevel::Ask);
    }

    #[test]
    fn test_claim_spends_path_grant_only_for_matching_path() {
        let gate = gate();
        gate.set_permission("write_file", PermissionLevel::AllowOnce, Some("s1"), Some("tmp/a.txt"))
            .unwrap();

        assert_eq!(
            gate.claim("write_file", Some("s1"), Some("tmp/b.txt")).level,
            PermissionLevel::Ask
        );
        assert_eq!(
            gate.claim("write_file", Some("s1"), Some("tmp/a.txt")).level,
            PermissionLevel::AllowOnce
        );
        assert_eq!(
            gate.claim("write_file", Some("s1"), Some("tmp/a.txt")).level,
            PermissionLevel::Ask
        );
    }

    #[test]
    fn test_concurrent_claims_share_one_grant() {
        let gate = Arc::new(gate());
        gate.set_permission("bash", PermissionLevel::AllowOnce, Some("s1"), None)
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = gate.clone();
                std::thread::spawn(move || gate.claim("bash", Some("s1"), None).level)
            })
            .collect();
        let allowed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|level| *level == PermissionLevel::AllowOnce)
            .count();
        assert_eq!(allowed, 1);
    }

    #[test]
    fn test_session_named_global_is_its_own_scope() {
        let gate = gate();
        gate.set_permission("write_file", PermissionLevel::AllowSession, None, None)
            .unwrap();
        gate.set_permission("bash", PermissionLevel::AllowOnce, Some("global"), None)
            .unwrap();

        assert_eq!(gate.get_permission("bash", None, None), PermissionLevel::Ask);
        assert_eq!(gate.get_permission("bash", Some("global"), None), PermissionLevel::AllowOnce);

        gate.clear_session("global").unwrap();
        assert_eq!(
            gate.resolve("write_file", None, None).source,
            PermissionSource::SessionTool
        );
        assert_eq!(gate.list_rules(None).len(), 1);
    }

    #[test]
    fn test_persisted_rules_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let gate =
                PermissionGate::new(GateConfig::default(), FileStorage::new(dir.path()).unwrap())
                    .unwrap();
            gate.set_permission("write_file", PermissionLevel::Deny, None, None)
                .unwrap();
            gate.set_permission("write_file", PermissionLevel::AllowSession, Some("s1"), None)
                .unwrap();
        }

        let gate =
            PermissionGate::new(GateConfig::default(), FileStorage::new(dir.path()).unwrap())
                .unwrap();
        let r = gate.resolve("write_file", Some("s1"), None);
        assert_eq!(r.level, PermissionLevel::AllowSession);
        assert_eq!(r.source, PermissionSource::Persisted);
        assert_eq!(gate.get_permission("write_file", Some("s9"), None), PermissionLevel::Deny);
    }

    #[test]
    fn test_patterned_rule_needs_matching_path() {
        let gate = gate();
        gate.set_permission("edit_file", PermissionLevel::AllowSession, None, Some("docs/**"))
            .unwrap();
        // Drop the cache so resolution falls through to the persisted row.
        gate.sessions().clear();

        assert_eq!(
            gate.get_permission("edit_file", None, Some("docs/guide.md")),
            PermissionLevel::AllowSession
        );
        assert_eq!(gate.get_permission("edit_file", None, Some("src/a.rs")), PermissionLevel::Ask);
        assert_eq!(gate.get_permission("edit_file", None, None), PermissionLevel::Ask);
    }

    #[test]
    fn test_revoke_removes_cache_and_rows() {
        let gate = gate();
        gate.set_permission("bash", PermissionLevel::Deny, Some("s1"), None)
            .unwrap();
        gate.revoke("bash", Some("s1")).unwrap();
        assert!(gate.list_rules(Some("s1")).is_empty());
        assert_eq!(gate.get_permission("bash", Some("s1"), None), PermissionLevel::Ask);
    }

    #[test]
    fn test_check_batch_partitions_without_side_effects() {
        let gate = gate();
        gate.set_permission("bash", PermissionLevel::Deny, Some("s1"), None)
            .unwrap();

        let entries = vec![
            BatchEntry::new("read_file", Some("README.md")),
            BatchEntry::new("bash", None),
            BatchEntry::new("write_file", Some("out.txt")),
            BatchEntry::new("read_file", Some("id_rsa")),
        ];
        let decision = gate.check_batch(&entries, Some("s1"));

        assert_eq!(decision.allowed, vec![entries[0].clone()]);
        assert_eq!(decision.denied, vec![entries[1].clone()]);
        assert_eq!(decision.needs_approval, vec![entries[2].clone(), entries[3].clone()]);
        assert!(!decision.all_allowed());
        assert_eq!(gate.list_rules(Some("s1")).len(), 1);
    }

    #[test]
    fn test_risk_classification() {
        let gate = gate();
        assert_eq!(gate.classify_risk("read_file", Some("a.txt")), RiskLevel::Low);
        assert_eq!(gate.classify_risk("write_file", Some("a.txt")), RiskLevel::Medium);
        assert_eq!(gate.classify_risk("bash", None), RiskLevel::High);
        assert_eq!(gate.classify_risk("read_file", Some("deploy/server.pem")), RiskLevel::High);
    }

    #[test]
    fn test_approve_with_remember_grants_path_scoped_session() {
        let gate = gate();
        let op = gate.queue_for_approval(
            Some("s1"),
            "write_file",
            Some("notes/todo.md"),
            json!({"path": "notes/todo.md"}),
            "write notes",
        );
        assert!(op.id.starts_with("approval_"));
        assert_eq!(op.risk_level, RiskLevel::Medium);
        assert_eq!(gate.pending(Some("s1")).len(), 1);

        let approved = gate.approve_operation(Some("s1"), &op.id, true).unwrap();
        assert_eq!(approved.map(|a| a.id), Some(op.id));
        assert!(gate.pending(Some("s1")).is_empty());

        assert_eq!(
            gate.get_permission("write_file", Some("s1"), Some("notes/todo.md")),
            PermissionLevel::AllowSession
        );
        assert_eq!(
            gate.get_permission("write_file", Some("s1"), Some("notes/other.md")),
            PermissionLevel::Ask
        );
    }

    #[test]
    fn test_approve_all_and_deny_all() {
        let gate = gate();
        gate.queue_for_approval(Some("s1"), "bash", None, json!({"cmd": "ls"}), "list");
        gate.queue_for_approval(Some("s1"), "write_file", None, json!({}), "write");

        let approved = gate.approve_all(Some("s1"), false).unwrap();
        assert_eq!(approved.len(), 2);
        assert_eq!(gate.get_permission("bash", Some("s1"), None), PermissionLevel::AllowOnce);
        assert!(gate.list_rules(Some("s1")).is_empty());

        gate.queue_for_approval(Some("s1"), "bash", None, json!({}), "again");
        let denied = gate.deny_all(Some("s1"));
        assert_eq!(denied.len(), 1);
        assert!(gate.pending(Some("s1")).is_empty());
        assert!(gate.deny_operation(Some("s1"), "missing").is_none());
    }

    #[test]
    fn test_withdraw_leaves_no_grant() {
        let gate = gate();
        let op = gate.queue_for_approval(Some("s1"), "write_file", None, json!({}), "write");

        let withdrawn = gate.withdraw_operation(Some("s1"), &op.id);
        assert_eq!(withdrawn.map(|w| w.id), Some(op.id.clone()));
        assert!(gate.pending(Some("s1")).is_empty());
        assert_eq!(gate.get_permission("write_file", Some("s1"), None), PermissionLevel::Ask);
        assert!(gate.withdraw_operation(Some("s1"), &op.id).is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        let gate = gate();
        let a = gate.queue_for_approval(None, "bash", None, json!({}), "a");
        let b = gate.queue_for_approval(None, "bash", None, json!({}), "b");
        assert_ne!(a.id, b.id);
    }
}
