//! Run configuration: concurrency cap, retry budget and the explicit
//! policies for ambiguous test outcomes.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use storyforge_sdk::AgentKind;
use thiserror::Error;

/// What a test run with no passing and no failing tests means
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum EmptyTestPolicy {
    /// Treat as success; the story is `done`
    #[default]
    Pass,
    /// Treat as a failed attempt
    Fail,
}

/// Terminal status of a story that used its whole retry budget without passing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    /// Status `error`, outcome `failed`
    #[default]
    Error,
    /// Status `done`, outcome `passed_with_known_failures`
    Done,
}

/// External program backing one agent kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCommand {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    /// Per-call timeout; unset means wait indefinitely
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Commands for the three agent kinds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCommands {
    pub coder: Option<AgentCommand>,
    pub tester: Option<AgentCommand>,
    pub security: Option<AgentCommand>,
}

impl AgentCommands {
    pub fn get(&self, kind: AgentKind) -> Option<&AgentCommand> {
        match kind {
            AgentKind::Coder => self.coder.as_ref(),
            AgentKind::Tester => self.tester.as_ref(),
            AgentKind::Security => self.security.as_ref(),
        }
    }

    /// Every agent kind has a command
    pub fn require_all(&self) -> Result<(), ConfigError> {
        [AgentKind::Coder, AgentKind::Tester, AgentKind::Security]
            .into_iter()
            .find(|kind| self.get(*kind).is_none())
            .map_or(Ok(()), |kind| Err(ConfigError::MissingAgent(kind)))
    }
}

/// Retry behaviour of the story lifecycle runner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub empty_tests: EmptyTestPolicy,
    pub on_exhausted: ExhaustionPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_retries(),
            empty_tests: EmptyTestPolicy::default(),
            on_exhausted: ExhaustionPolicy::default(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("concurrency must be at least 1")]
    ZeroConcurrency,
    #[error("max_retries must be at least 1")]
    ZeroRetries,
    #[error("no command configured for the {0} agent (set agents.{0} or use --dry-run)")]
    MissingAgent(AgentKind),
}

/// Configuration for a development run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Maximum number of stories running at once within an epic
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Maximum code/test cycles per story
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub empty_tests: EmptyTestPolicy,
    #[serde(default)]
    pub on_exhausted: ExhaustionPolicy,
    #[serde(default)]
    pub agents: AgentCommands,
}

fn default_concurrency() -> usize {
    3
}

fn default_max_retries() -> u32 {
    3
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            empty_tests: EmptyTestPolicy::default(),
            on_exhausted: ExhaustionPolicy::default(),
            agents: AgentCommands::default(),
        }
    }
}

impl RunConfig {
    /// Load a YAML config file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: RunConfig = serde_yaml::from_str(&text)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.max_retries == 0 {
            return Err(ConfigError::ZeroRetries);
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            empty_tests: self.empty_tests,
            on_exhausted: self.on_exhausted,
        }
    }
}
