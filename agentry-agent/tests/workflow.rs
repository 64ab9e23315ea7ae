mod common;

use agentry_agent::{
    parse_workflow, parse_workflow_yaml, AgentDefinition, AgentLoop, ApprovalCallback, LoopConfig,
    StaticAgentRegistry, StepStatus, WorkflowRunner,
};
use agentry_core::{
    GateConfig, MemoryStorage, PermissionGate, PermissionLevel, RetryPolicy, ToolInvoker,
};
use common::{act, agent_loop, complete, registry, RoutedProvider, SlowWriter};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_output_of_one_step_feeds_the_next() {
    let provider = Arc::new(
        RoutedProvider::new()
            .on("a", |_| complete(json!("42")))
            .on("b", |input| complete(json!(format!("got {input}")))),
    );
    let registry = registry(&["a", "b"]);
    let wf = parse_workflow(
        &json!({
            "name": "scenario",
            "steps": [{"agent": "a", "output": "x"}, {"agent": "b", "input": "use ${x}"}]
        }),
        &registry,
    )
    .unwrap();

    let runner = WorkflowRunner::new(agent_loop(provider.clone(), registry, 5));
    let result = runner.run(&wf, HashMap::new()).await;

    assert!(result.success);
    let resolved = result.steps[1].resolved_input.as_deref().unwrap();
    assert!(resolved.contains("42"));
    assert_eq!(provider.inputs()[1], ("b".to_string(), "use 42".to_string()));
}

#[tokio::test]
async fn test_false_condition_skips_without_output() {
    let provider = Arc::new(
        RoutedProvider::new()
            .on("a", |_| complete(json!("draft")))
            .on("b", |_| complete(json!("reviewed"))),
    );
    let registry = registry(&["a", "b"]);
    let wf = parse_workflow(
        &json!({
            "name": "conditional",
            "inputs": {"review": {"type": "boolean", "default": false}},
            "steps": [
                {"agent": "a", "output": "draft"},
                {"agent": "b", "output": "review", "condition": "$review"},
            ]
        }),
        &registry,
    )
    .unwrap();

    let runner = WorkflowRunner::new(agent_loop(provider.clone(), registry, 5));
    let result = runner.run(&wf, HashMap::new()).await;

    assert!(result.success);
    assert_eq!(result.steps[1].status, StepStatus::Skipped);
    assert!(!result.outputs.contains_key("review"));
    assert_eq!(provider.calls(), 1);

    // Command-line strings are coerced to the declared type.
    let inputs = HashMap::from([("review".to_string(), json!("true"))]);
    let result = runner.run(&wf, inputs).await;
    assert_eq!(result.steps[1].status, StepStatus::Completed);
    assert_eq!(result.outputs["review"], "reviewed");
}

#[tokio::test(start_paused = true)]
async fn test_parallel_group_runs_in_chunks() {
    let provider = Arc::new(
        RoutedProvider::new()
            .on("worker", |input| complete(json!(format!("done {input}"))))
            .slow("worker", Duration::from_secs(10)),
    );
    let registry = registry(&["worker"]);
    let members: Vec<_> = (1..=5)
        .map(|n| json!({"id": format!("w{n}"), "agent": "worker", "input": n.to_string()}))
        .collect();
    let wf = parse_workflow(
        &json!({
            "name": "fanout",
            "settings": {"maxParallel": 2},
            "steps": [{"parallel": members}]
        }),
        &registry,
    )
    .unwrap();

    let runner = WorkflowRunner::new(agent_loop(provider.clone(), registry, 5));
    let result = runner.run(&wf, HashMap::new()).await;

    assert!(result.success);
    let group = &result.steps[0];
    assert_eq!(group.parallel.len(), 5);
    assert!(group.parallel.iter().all(|m| m.status == StepStatus::Completed));

    // Three chunks (2, 2, 1) of 10 s each.
    assert!(group.duration_ms >= 30_000, "took {}ms", group.duration_ms);
    assert!(group.duration_ms < 40_000, "took {}ms", group.duration_ms);

    let order: Vec<String> = provider.inputs().into_iter().map(|(_, input)| input).collect();
    assert_eq!(order, ["1", "2", "3", "4", "5"]);
    assert_eq!(group.output.as_ref().unwrap()["w5"], "done 5");
}

#[tokio::test]
async fn test_stop_after_exhausted_retries_halts_run() {
    // `stubborn` only ever reads files and runs out of steps.
    let provider = Arc::new(RoutedProvider::new().on("a", |_| complete(json!("ok"))));
    let registry = registry(&["a", "stubborn"]);
    let wf = parse_workflow(
        &json!({
            "name": "halting",
            "steps": [
                {"id": "first", "agent": "a"},
                {"id": "stuck", "agent": "stubborn", "onError": "stop", "maxRetries": 2},
                {"id": "never", "agent": "a"},
            ]
        }),
        &registry,
    )
    .unwrap();

    let runner = WorkflowRunner::new(agent_loop(provider, registry, 2));
    let result = runner.run(&wf, HashMap::new()).await;

    assert!(!result.success);
    assert_eq!(result.steps.len(), 2);
    assert!(result.step("never").is_none());

    let stuck = result.step("stuck").unwrap();
    assert_eq!(stuck.status, StepStatus::Failed);
    assert_eq!(stuck.attempts, 3);
    assert!(stuck.error.as_deref().unwrap().contains("did not complete"));
    assert_eq!(result.errors.len(), 1);
}

#[tokio::test]
async fn test_yaml_workflow_end_to_end() {
    let provider = Arc::new(
        RoutedProvider::new()
            .on("researcher", |input| {
                complete(json!({"facts": [format!("fact about {input}")], "count": 1}))
            })
            .on("writer", |input| complete(json!(format!("article: {input}")))),
    );
    let registry = registry(&["researcher", "writer"]);
    let wf = parse_workflow_yaml(
        r#"
name: article
inputs:
  - name: topic
    type: string
    required: true
outputs: [article]
steps:
  - id: research
    agent: researcher
    input: "${topic}"
    output: research
  - id: write
    agent: writer
    input: "$prev.facts.0 (${research.count})"
    output: article
    condition: "$research.count != 0"
"#,
        &registry,
    )
    .unwrap();

    let runner = WorkflowRunner::new(agent_loop(provider, registry, 5));
    let inputs = HashMap::from([("topic".to_string(), json!("rust"))]);
    let result = runner.run(&wf, inputs).await;

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.outputs.len(), 1);
    assert_eq!(result.outputs["article"], "article: fact about rust (1)");
}

/// First tool call writes, every later call completes
fn write_once(
    path: &'static str,
) -> impl Fn(&str) -> agentry_core::CompletionResponse + Send + Sync + 'static {
    let cycles = AtomicUsize::new(0);
    move |_| {
        if cycles.fetch_add(1, Ordering::SeqCst) == 0 {
            act("write_file", json!({"path": path}))
        } else {
            complete(json!(path))
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_parallel_members_each_need_their_own_approval() {
    let provider = Arc::new(
        RoutedProvider::new()
            .on("w1", write_once("one.txt"))
            .on("w2", write_once("two.txt")),
    );
    let registry: StaticAgentRegistry = ["w1", "w2"]
        .into_iter()
        .map(|name| AgentDefinition::new(name, format!("agent:{name}")).with_tools(["write_file"]))
        .collect();
    let wf = parse_workflow(
        &json!({"name": "fanout", "steps": [{"parallel": [{"agent": "w1"}, {"agent": "w2"}]}]}),
        &registry,
    )
    .unwrap();

    // Only the first question gets a yes.
    let asked = Arc::new(AtomicUsize::new(0));
    let counter = asked.clone();
    let callback: ApprovalCallback = Arc::new(move |_, _| {
        let first = counter.fetch_add(1, Ordering::SeqCst) == 0;
        Box::pin(async move { first })
    });

    let writer = Arc::new(SlowWriter::new(Duration::from_millis(50)));
    let gate = Arc::new(PermissionGate::new(GateConfig::default(), MemoryStorage::new()).unwrap());
    let config = LoopConfig::default()
        .with_max_steps(3)
        .with_session("s1")
        .with_chat_policy(RetryPolicy::default().with_retries(0));
    let agent_loop = AgentLoop::new(
        provider,
        ToolInvoker::new(writer.clone(), gate.clone()),
        Arc::new(registry),
    )
    .with_config(config)
    .with_approval(callback);

    let result = WorkflowRunner::new(agent_loop).run(&wf, HashMap::new()).await;

    assert_eq!(result.steps.len(), 1);
    assert_eq!(asked.load(Ordering::SeqCst), 2);
    assert_eq!(writer.writes(), 1);
    assert!(gate.pending(Some("s1")).is_empty());
    assert_eq!(gate.get_permission("write_file", Some("s1"), None), PermissionLevel::Ask);
}

#[tokio::test(start_paused = true)]
async fn test_step_timeout_does_not_wedge_the_chat_breaker() {
    let provider = Arc::new(
        RoutedProvider::new()
            .on("a", |_| complete(json!("done")))
            .slow("a", Duration::from_secs(10)),
    );
    let registry = registry(&["a"]);
    let wf = parse_workflow(
        &json!({"name": "slow", "steps": [{"agent": "a", "timeoutSecs": 1}]}),
        &registry,
    )
    .unwrap();
    let runner = WorkflowRunner::new(agent_loop(provider, registry, 3));

    // Trip the breaker, wait out its cooldown, then cancel the half-open
    // trial with the step timeout.
    let breaker = runner.agent_loop().breakers().get("chat:a");
    for _ in 0..breaker.config().failure_threshold {
        breaker.record_failure();
    }
    tokio::time::advance(breaker.config().reset_timeout).await;

    let result = runner.run(&wf, HashMap::new()).await;
    assert_eq!(result.steps[0].status, StepStatus::Failed);

    tokio::time::advance(breaker.config().reset_timeout).await;
    let permit = breaker.try_acquire().expect("breaker admits a new trial");
    assert!(permit.is_trial());
}
