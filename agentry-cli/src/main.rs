//! # Agentry CLI
//!
//! Run and validate agent workflows from the command line.
//!
//! Usage:
//!   agentry run <workflow.yaml> --agents <agents.yaml> [--input k=v]...
//!   agentry validate <workflow.yaml> --agents <agents.yaml>
//!   agentry permissions list [--session <id>]
//!   agentry permissions clear --session <id>
//!
//! Examples:
//!   agentry run blog.yaml --agents agents.yaml --input topic=rust
//!   agentry -s demo run blog.yaml --agents agents.yaml --auto-approve
//!   RUST_LOG=agentry_agent=debug agentry run blog.yaml --agents agents.yaml

mod config;
mod logging;
mod prompt;
mod tools;

use agentry_agent::{
    parse_workflow_yaml, AgentLoop, LoopConfig, RunnerOptions, StaticAgentRegistry,
    WorkflowDefinition, WorkflowRunner,
};
use agentry_core::{
    FileStorage, GateConfig, OpenAiProvider, PermissionGate, ProviderConfig, ToolInvoker,
};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use config::{load_config, Config, DEFAULT_CONFIG_FILE};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tools::BuiltinTools;

#[derive(Parser)]
#[command(name = "agentry")]
#[command(author, version, about = "Agentry - bounded agent workflows")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults apply when it does not exist)
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Session ID scoping permission grants
    #[arg(short, long, global = true)]
    session: Option<String>,

    /// Log progress to stderr (`RUST_LOG` takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow and print its result as JSON
    Run {
        /// Workflow definition (YAML)
        workflow: PathBuf,

        /// Agent definitions (YAML)
        #[arg(short, long)]
        agents: PathBuf,

        /// Workflow input as key=value (repeatable)
        #[arg(short, long = "input", value_parser = parse_input)]
        inputs: Vec<(String, String)>,

        /// Approve tool calls and checkpoints without asking
        #[arg(long)]
        auto_approve: bool,

        /// Override the configured model
        #[arg(short, long)]
        model: Option<String>,
    },
    /// Check a workflow against its agents without running it
    Validate {
        workflow: PathBuf,

        #[arg(short, long)]
        agents: PathBuf,
    },
    /// Inspect or reset persisted permission rules
    Permissions {
        #[command(subcommand)]
        action: PermissionsAction,
    },
}

#[derive(Subcommand)]
enum PermissionsAction {
    /// List rules for a session (global rules without --session)
    List,
    /// Drop every rule and grant of a session
    Clear,
}

fn parse_input(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected key=value, got `{raw}`")),
    }
}

fn load_agents(path: &Path) -> Result<StaticAgentRegistry> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let registry = StaticAgentRegistry::from_yaml(&text)
        .with_context(|| format!("load agents from {}", path.display()))?;
    tracing::info!(agents = registry.len(), path = %path.display(), "agents loaded");
    Ok(registry)
}

fn load_workflow(path: &Path, registry: &StaticAgentRegistry) -> Result<WorkflowDefinition> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    parse_workflow_yaml(&text, registry)
        .with_context(|| format!("invalid workflow {}", path.display()))
}

fn open_gate(cfg: &Config) -> Result<Arc<PermissionGate>> {
    let storage = FileStorage::new(&cfg.permissions.store).with_context(|| {
        format!("open permission store {}", cfg.permissions.store.display())
    })?;
    let gate_config =
        GateConfig::default().with_sensitive_patterns(cfg.permissions.sensitive_patterns.clone());
    let gate = PermissionGate::new(gate_config, storage).context("build permission gate")?;
    Ok(Arc::new(gate))
}

async fn run(
    cfg: &Config,
    session: Option<String>,
    workflow: &Path,
    agents: &Path,
    inputs: Vec<(String, String)>,
    auto_approve: bool,
    model: Option<String>,
) -> Result<bool> {
    let registry = load_agents(agents)?;
    let definition = load_workflow(workflow, &registry)?;

    let provider_config = ProviderConfig {
        api_key: std::env::var(&cfg.provider.api_key_env).ok(),
        base_url: cfg.provider.base_url.clone(),
        default_model: model.unwrap_or_else(|| cfg.provider.model.clone()),
        timeout_secs: cfg.provider.timeout_secs,
        ..Default::default()
    };
    if provider_config.api_key.is_none() {
        tracing::warn!(env = %cfg.provider.api_key_env, "no API key set");
    }
    let provider = OpenAiProvider::new(provider_config).context("build chat provider")?;

    let gate = open_gate(cfg)?;
    let invoker = ToolInvoker::new(BuiltinTools::new("."), gate);

    let auto_approve = auto_approve || cfg.agent.auto_approve;
    let mut loop_config = LoopConfig::default()
        .with_max_steps(cfg.agent.max_steps)
        .with_max_duration(Duration::from_secs(cfg.agent.max_duration_secs))
        .with_max_depth(cfg.agent.max_depth)
        .with_auto_approve(auto_approve);
    if let Some(session) = session {
        loop_config = loop_config.with_session(session);
    }

    let agent_loop = AgentLoop::new(provider, invoker, Arc::new(registry))
        .with_config(loop_config)
        .with_approval(prompt::approval_callback());

    let mut options = RunnerOptions::default().with_checkpoint(prompt::checkpoint_callback());
    if auto_approve {
        options = options.with_auto_approve(true);
    }
    let runner = WorkflowRunner::new(agent_loop).with_options(options);

    let inputs: HashMap<String, Value> = inputs
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect();
    let result = runner.run(&definition, inputs).await;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(result.success)
}

fn validate(workflow: &Path, agents: &Path) -> Result<()> {
    let registry = load_agents(agents)?;
    let definition = load_workflow(workflow, &registry)?;

    let parallel = definition.steps.iter().filter(|s| s.is_parallel()).count();
    println!(
        "{}: {} steps ({} parallel groups), {} inputs, max_parallel {}",
        definition.name,
        definition.steps.len(),
        parallel,
        definition.inputs.len(),
        definition.settings.max_parallel
    );
    Ok(())
}

fn permissions(cfg: &Config, session: Option<&str>, action: PermissionsAction) -> Result<()> {
    let gate = open_gate(cfg)?;
    match action {
        PermissionsAction::List => {
            let rules = gate.list_rules(session);
            println!("{}", serde_json::to_string_pretty(&rules)?);
        }
        PermissionsAction::Clear => {
            let session = session.ok_or_else(|| anyhow!("`permissions clear` needs --session"))?;
            gate.clear_session(session)?;
            eprintln!("Cleared session {session}");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let outcome = async move {
        let cfg = load_config(&cli.config)?;
        match cli.command {
            Commands::Run {
                workflow,
                agents,
                inputs,
                auto_approve,
                model,
            } => {
                run(
                    &cfg,
                    cli.session,
                    &workflow,
                    &agents,
                    inputs,
                    auto_approve,
                    model,
                )
                .await
            }
            Commands::Validate { workflow, agents } => validate(&workflow, &agents).map(|_| true),
            Commands::Permissions { action } => {
                permissions(&cfg, cli.session.as_deref(), action).map(|_| true)
            }
        }
    }
    .await;

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_pairs() {
        assert_eq!(
            parse_input("topic=rust = fun").unwrap(),
            ("topic".to_string(), "rust = fun".to_string())
        );
        assert_eq!(parse_input("empty=").unwrap().1, "");
        assert!(parse_input("novalue").is_err());
        assert!(parse_input("=x").is_err());
    }

    #[test]
    fn validate_reports_bad_agent_reference() {
        let temp = tempfile::tempdir().expect("tempdir");
        let agents = temp.path().join("agents.yaml");
        let workflow = temp.path().join("wf.yaml");
        std::fs::write(&agents, "- name: writer\n  systemPrompt: Write.\n").expect("write");

        std::fs::write(&workflow, "name: wf\nsteps:\n  - agent: writer\n").expect("write");
        validate(&workflow, &agents).expect("valid");

        std::fs::write(&workflow, "name: wf\nsteps:\n  - agent: editor\n").expect("write");
        let err = validate(&workflow, &agents).unwrap_err();
        assert!(format!("{err:#}").contains("editor"));
    }

    #[test]
    fn cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "agentry", "-s", "demo", "run", "wf.yaml", "--agents", "a.yaml", "-i", "x=1",
            "--input", "y=2", "--auto-approve",
        ])
        .expect("parse");
        assert_eq!(cli.session.as_deref(), Some("demo"));
        match cli.command {
            Commands::Run {
                inputs,
                auto_approve,
                ..
            } => {
                assert_eq!(inputs.len(), 2);
                assert!(auto_approve);
            }
            _ => panic!("expected run"),
        }
    }
}
