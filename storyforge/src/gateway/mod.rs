//! Agent gateway implementations.
//!
//! - [`CommandGateway`] runs one external program per agent kind
//! - [`SimulatedGateway`] answers in-process for dry runs

mod command;
mod simulated;

pub use command::CommandGateway;
pub use simulated::SimulatedGateway;

use std::sync::Arc;
use std::time::Duration;

use storyforge_sdk::AgentGateway;

use crate::config::{AgentCommands, ConfigError};

/// Latency of each simulated agent call
pub const DRY_RUN_LATENCY: Duration = Duration::from_millis(50);

/// Gateway for a run: simulated for a dry run, otherwise the configured
/// commands.
pub fn build(agents: &AgentCommands, dry_run: bool) -> Result<Arc<dyn AgentGateway>, ConfigError> {
    if dry_run {
        return Ok(Arc::new(SimulatedGateway::new(DRY_RUN_LATENCY)));
    }
    Ok(Arc::new(CommandGateway::new(agents.clone())?))
}
