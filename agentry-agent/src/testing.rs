//! Scripted fakes for the chat provider and tool executor

use crate::agent::{AgentLoop, LoopConfig};
use crate::definition::AgentRegistry;
use agentry_core::{
    ChatProvider, CompletionRequest, CompletionResponse, Error, GateConfig, MemoryStorage,
    PermissionGate, Result, ToolExecutor, ToolInfo, ToolInvoker,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Responder = Box<dyn Fn(&CompletionRequest, usize) -> Result<CompletionResponse> + Send + Sync>;

pub(crate) struct ScriptedProvider {
    responder: Responder,
    delay: Duration,
    calls: AtomicUsize,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    /// Replies in order; the last reply repeats once the script runs out
    pub fn new(script: Vec<CompletionResponse>) -> Self {
        Self::from_fn(move |_, n| {
            let idx = n.min(script.len().saturating_sub(1));
            Ok(script.get(idx).cloned().unwrap_or_default())
        })
    }

    pub fn from_fn(
        f: impl Fn(&CompletionRequest, usize) -> Result<CompletionResponse> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Box::new(f),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl ChatProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted-model"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.responder)(&request, n)
    }
}

pub(crate) struct FakeTools {
    tools: Vec<ToolInfo>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl FakeTools {
    pub fn new() -> Self {
        Self {
            tools: vec![
                ToolInfo::new("read_file", "Read a file"),
                ToolInfo::new("write_file", "Write a file"),
                ToolInfo::new("explode", "Always fails"),
            ],
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

impl ToolExecutor for FakeTools {
    fn tool(&self, name: &str) -> Option<ToolInfo> {
        self.tools.iter().find(|t| t.name == name).cloned()
    }

    fn tools(&self) -> Vec<ToolInfo> {
        self.tools.clone()
    }

    async fn execute_tool(&self, name: &str, args: Value) -> Result<Value> {
        self.calls.lock().unwrap().push((name.to_string(), args.clone()));
        if name == "explode" {
            return Err(Error::external_failure("kaboom"));
        }
        Ok(json!({"tool": name, "ok": true}))
    }
}

pub(crate) fn complete(result: Value) -> CompletionResponse {
    CompletionResponse::text(
        json!({"thought": "done", "action": "complete", "params": {"result": result}}).to_string(),
    )
}

pub(crate) fn act(action: &str, params: Value) -> CompletionResponse {
    CompletionResponse::text(
        json!({"thought": format!("use {action}"), "action": action, "params": params}).to_string(),
    )
}

pub(crate) fn delegate(agent: &str, input: &str) -> CompletionResponse {
    act("delegate", json!({"agent": agent, "input": input}))
}

/// System prompt of the agent a request was made for
pub(crate) fn system_of(request: &CompletionRequest) -> &str {
    request
        .messages
        .first()
        .map(|m| m.content_str())
        .unwrap_or("")
}

pub(crate) fn gate() -> Arc<PermissionGate> {
    Arc::new(PermissionGate::new(GateConfig::default(), MemoryStorage::new()).unwrap())
}

pub(crate) fn agent_loop(
    provider: Arc<ScriptedProvider>,
    tools: Arc<FakeTools>,
    registry: impl AgentRegistry + 'static,
    config: LoopConfig,
) -> AgentLoop<Arc<ScriptedProvider>, Arc<FakeTools>> {
    AgentLoop::new(provider, ToolInvoker::new(tools, gate()), Arc::new(registry)).with_config(config)
}
