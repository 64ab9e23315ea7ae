//! Agent definitions and the registry they are looked up in

use agentry_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What an agent is: its prompt, the tools it may call, and the agents it
/// may hand work to. Loaded once, never mutated during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefinition {
    pub name: String,
    #[serde(default, alias = "system_prompt")]
    pub system_prompt: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default, alias = "can_delegate")]
    pub can_delegate: Vec<String>,
    #[serde(default, alias = "output_formats")]
    pub output_formats: Vec<String>,
    /// Narrows the loop's wall-clock budget for this agent
    #[serde(default, alias = "timeout_secs", skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Overrides the loop's model for this agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl AgentDefinition {
    pub fn new(name: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
            tools: Vec::new(),
            can_delegate: Vec::new(),
            output_formats: Vec::new(),
            timeout_secs: None,
            model: None,
        }
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_delegates<I, S>(mut self, agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.can_delegate = agents.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn allows_tool(&self, tool: &str) -> bool {
        self.tools.iter().any(|t| t == tool)
    }

    pub fn can_delegate_to(&self, agent: &str) -> bool {
        self.can_delegate.iter().any(|a| a == agent)
    }
}

pub trait AgentRegistry: Send + Sync {
    fn get(&self, name: &str) -> Option<&AgentDefinition>;

    fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticAgentRegistry {
    agents: HashMap<String, AgentDefinition>,
}

impl StaticAgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, agent: AgentDefinition) -> Self {
        self.insert(agent);
        self
    }

    /// Add or replace an agent, returning the one it replaced
    pub fn insert(&mut self, agent: AgentDefinition) -> Option<AgentDefinition> {
        self.agents.insert(agent.name.clone(), agent)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Sorted agent names
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.agents.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Load from YAML: either a list of agents or `{ agents: [...] }`
    pub fn from_yaml(text: &str) -> Result<Self> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Document {
            List(Vec<AgentDefinition>),
            Wrapped { agents: Vec<AgentDefinition> },
        }

        let doc: Document = serde_yaml::from_str(text).map_err(|e| {
            Error::parse_failed("invalid agent definitions")
                .with_operation("registry::from_yaml")
                .set_source(e)
        })?;
        let agents = match doc {
            Document::List(agents) | Document::Wrapped { agents } => agents,
        };

        let mut registry = Self::new();
        for agent in agents {
            if agent.name.trim().is_empty() {
                return Err(Error::invalid_argument("agent definition without a name")
                    .with_operation("registry::from_yaml"));
            }
            let name = agent.name.clone();
            if registry.insert(agent).is_some() {
                return Err(Error::invalid_argument(format!("duplicate agent `{name}`"))
                    .with_operation("registry::from_yaml"));
            }
        }
        Ok(registry)
    }
}

impl FromIterator<AgentDefinition> for StaticAgentRegistry {
    fn from_iter<I: IntoIterator<Item = AgentDefinition>>(iter: I) -> Self {
        let mut registry = Self::new();
        for agent in iter {
            registry.insert(agent);
        }
        registry
    }
}

impl AgentRegistry for StaticAgentRegistry {
    fn get(&self, name: &str) -> Option<&AgentDefinition> {
        self.agents.get(name)
    }
}
