//! CLI argument definitions for the `storyforge` binary.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

use crate::config::{EmptyTestPolicy, ExhaustionPolicy, RunConfig};

/// Epic/story development orchestrator
///
/// Runs a backlog of epics through coder, tester and security agents:
///
/// - Epics are processed one at a time, in declaration order
/// - Stories within an epic run concurrently, gated by their dependencies
/// - Each story gets a bounded number of code/test attempts
#[derive(Parser, Debug, Clone)]
#[command(name = "storyforge")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the development loop over a backlog
    Run(RunArgs),
    /// Show the epic groups and dependency warnings without running agents
    Plan(PlanArgs),
}

/// How events are shown while a run is in progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum EventsMode {
    /// One readable line per event on stdout
    #[default]
    Human,
    /// `__SF_EVENT__:<json>` lines on stderr
    Json,
    Quiet,
}

#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Backlog file (.yaml, .yml or .json)
    #[arg(long, value_name = "PATH")]
    pub backlog: PathBuf,

    /// Run configuration file (YAML)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Maximum stories running at once within an epic
    #[arg(long, value_name = "K")]
    pub concurrency: Option<usize>,

    /// Maximum code/test attempts per story
    #[arg(long, value_name = "N")]
    pub max_retries: Option<u32>,

    /// How a test run with no passing and no failing tests is judged
    #[arg(long, value_enum, value_name = "POLICY")]
    pub empty_tests: Option<EmptyTestPolicy>,

    /// Terminal status of a story that exhausts its attempts
    #[arg(long, value_enum, value_name = "POLICY")]
    pub on_exhausted: Option<ExhaustionPolicy>,

    /// Use the simulated gateway instead of the configured agent commands
    #[arg(long)]
    pub dry_run: bool,

    #[arg(long, value_enum, default_value_t = EventsMode::Human)]
    pub events: EventsMode,

    /// Where to save the resulting state
    ///
    /// Defaults to overwriting the backlog file.
    #[arg(long, value_name = "PATH")]
    pub output: Option<PathBuf>,
}

impl RunArgs {
    /// Apply command-line overrides on top of a loaded configuration
    pub fn apply_overrides(&self, mut config: RunConfig) -> RunConfig {
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(max_retries) = self.max_retries {
            config.max_retries = max_retries;
        }
        if let Some(policy) = self.empty_tests {
            config.empty_tests = policy;
        }
        if let Some(policy) = self.on_exhausted {
            config.on_exhausted = policy;
        }
        config
    }

    /// Load the config file (if any), apply overrides and validate
    pub fn resolve_config(&self) -> Result<RunConfig> {
        let base = match &self.config {
            Some(path) => RunConfig::load(path)?,
            None => RunConfig::default(),
        };
        let config = self.apply_overrides(base);
        config.validate()?;
        Ok(config)
    }

    pub fn output_path(&self) -> &Path {
        self.output.as_deref().unwrap_or(&self.backlog)
    }
}

#[derive(Parser, Debug, Clone)]
pub struct PlanArgs {
    /// Backlog file (.yaml, .yml or .json)
    #[arg(long, value_name = "PATH")]
    pub backlog: PathBuf,
}
