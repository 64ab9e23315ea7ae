//! Shared fakes for the integration tests

#![allow(dead_code)]

use agentry_agent::{AgentDefinition, AgentLoop, LoopConfig, StaticAgentRegistry};
use agentry_core::{
    ChatProvider, CompletionRequest, CompletionResponse, GateConfig, MemoryStorage,
    PermissionGate, Result, RetryPolicy, ToolExecutor, ToolInfo, ToolInvoker,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Reply = Box<dyn Fn(&str) -> CompletionResponse + Send + Sync>;

/// Answers per agent. Each agent's system prompt starts with `agent:<name>`.
#[derive(Default)]
pub struct RoutedProvider {
    replies: HashMap<String, Reply>,
    delays: HashMap<String, Duration>,
    calls: AtomicUsize,
    inputs: Mutex<Vec<(String, String)>>,
}

impl RoutedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(
        mut self,
        agent: &str,
        reply: impl Fn(&str) -> CompletionResponse + Send + Sync + 'static,
    ) -> Self {
        self.replies.insert(agent.to_string(), Box::new(reply));
        self
    }

    pub fn slow(mut self, agent: &str, delay: Duration) -> Self {
        self.delays.insert(agent.to_string(), delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// `(agent, user input)` for every chat call, in call order
    pub fn inputs(&self) -> Vec<(String, String)> {
        self.inputs.lock().unwrap().clone()
    }
}

impl ChatProvider for RoutedProvider {
    fn name(&self) -> &str {
        "routed"
    }

    fn default_model(&self) -> &str {
        "routed-model"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let agent = request
            .messages
            .first()
            .and_then(|m| m.content_str().lines().next())
            .and_then(|l| l.strip_prefix("agent:"))
            .unwrap_or_default()
            .to_string();
        let input = request
            .messages
            .get(1)
            .map(|m| m.content_str().to_string())
            .unwrap_or_default();
        self.inputs.lock().unwrap().push((agent.clone(), input.clone()));

        if let Some(delay) = self.delays.get(&agent) {
            tokio::time::sleep(*delay).await;
        }
        Ok(match self.replies.get(&agent) {
            Some(reply) => reply(&input),
            None => act("read_file", json!({"path": "README.md"})),
        })
    }
}

/// One read-only tool that always succeeds
pub struct EchoTools;

impl ToolExecutor for EchoTools {
    fn tool(&self, name: &str) -> Option<ToolInfo> {
        (name == "read_file").then(|| ToolInfo::new("read_file", "Read a file"))
    }

    fn tools(&self) -> Vec<ToolInfo> {
        vec![ToolInfo::new("read_file", "Read a file")]
    }

    async fn execute_tool(&self, _name: &str, args: Value) -> Result<Value> {
        Ok(json!({"content": format!("contents of {}", args["path"])}))
    }
}

/// `write_file` that takes `delay` to finish and counts executions
pub struct SlowWriter {
    delay: Duration,
    writes: AtomicUsize,
}

impl SlowWriter {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            writes: AtomicUsize::new(0),
        }
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl ToolExecutor for SlowWriter {
    fn tool(&self, name: &str) -> Option<ToolInfo> {
        (name == "write_file").then(|| ToolInfo::new("write_file", "Write a file").confirmed())
    }

    fn tools(&self) -> Vec<ToolInfo> {
        vec![ToolInfo::new("write_file", "Write a file").confirmed()]
    }

    async fn execute_tool(&self, _name: &str, args: Value) -> Result<Value> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(json!({"written": args["path"]}))
    }
}

pub fn complete(result: Value) -> CompletionResponse {
    CompletionResponse::text(
        json!({"thought": "done", "action": "complete", "params": {"result": result}}).to_string(),
    )
}

pub fn act(action: &str, params: Value) -> CompletionResponse {
    CompletionResponse::text(
        json!({"thought": format!("use {action}"), "action": action, "params": params}).to_string(),
    )
}

pub fn registry(names: &[&str]) -> StaticAgentRegistry {
    names
        .iter()
        .map(|name| AgentDefinition::new(*name, format!("agent:{name}")).with_tools(["read_file"]))
        .collect()
}

pub fn agent_loop(
    provider: Arc<RoutedProvider>,
    registry: StaticAgentRegistry,
    max_steps: usize,
) -> AgentLoop<Arc<RoutedProvider>, EchoTools> {
    let gate = PermissionGate::new(GateConfig::default(), MemoryStorage::new()).unwrap();
    let config = LoopConfig::default()
        .with_max_steps(max_steps)
        .with_chat_policy(RetryPolicy::default().with_retries(0));
    AgentLoop::new(
        provider,
        ToolInvoker::new(EchoTools, Arc::new(gate)),
        Arc::new(registry),
    )
    .with_config(config)
}
