//! `agentry.toml`: provider, loop and permission settings.
//!
//! Every field is optional; a missing file means all defaults.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "agentry.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderSection,
    pub agent: AgentSection,
    pub permissions: PermissionsSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSection {
    /// OpenAI-compatible endpoint
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub max_steps: usize,
    pub max_duration_secs: u64,
    pub max_depth: usize,
    pub auto_approve: bool,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_steps: 20,
            max_duration_secs: 300,
            max_depth: 5,
            auto_approve: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionsSection {
    /// Directory of persisted permission rules
    pub store: PathBuf,
    /// Added to the built-in sensitive path patterns
    pub sensitive_patterns: Vec<String>,
}

impl Default for PermissionsSection {
    fn default() -> Self {
        Self {
            store: PathBuf::from(".agentry/permissions"),
            sensitive_patterns: Vec::new(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.provider.base_url.trim().is_empty() {
            return Err(anyhow!("provider.base_url must not be empty"));
        }
        if self.provider.model.trim().is_empty() {
            return Err(anyhow!("provider.model must not be empty"));
        }
        if self.provider.timeout_secs == 0 {
            return Err(anyhow!("provider.timeout_secs must be > 0"));
        }
        if self.agent.max_steps == 0 {
            return Err(anyhow!("agent.max_steps must be > 0"));
        }
        if self.agent.max_duration_secs == 0 {
            return Err(anyhow!("agent.max_duration_secs must be > 0"));
        }
        if self
            .permissions
            .sensitive_patterns
            .iter()
            .any(|p| p.trim().is_empty())
        {
            return Err(anyhow!("permissions.sensitive_patterns must not contain empty patterns"));
        }
        Ok(())
    }
}

/// Load `path`, or defaults when it does not exist
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        let cfg = Config::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("agentry.toml");
        std::fs::write(
            &path,
            "[provider]\nmodel = \"llama3\"\nbase_url = \"http://localhost:11434/v1\"\n\n[permissions]\nsensitive_patterns = [\"*.sqlite\"]\n",
        )
        .expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.provider.model, "llama3");
        assert_eq!(cfg.provider.api_key_env, "OPENAI_API_KEY");
        assert_eq!(cfg.agent, AgentSection::default());
        assert_eq!(cfg.permissions.sensitive_patterns, vec!["*.sqlite"]);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("agentry.toml");
        std::fs::write(&path, "[agent]\nmax_steps = 0\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("max_steps"));
    }
}
