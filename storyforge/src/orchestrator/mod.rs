//! Workflow orchestrator: decides which story may run, in what order, with
//! how much parallelism, and how failures and cancellation propagate.
//!
//! ## Module Structure
//!
//! - `grouper` - Partition the backlog into ordered (epic, stories) groups
//! - `gate` - Dependency eligibility and blocked-story diagnosis
//! - `lifecycle` - Bounded code/test retry loop for one story
//! - `scheduler` - Bounded-concurrency executor for one epic
//! - `finalizer` - One security scan per epic
//! - `dev_loop` - Top-level driver, strictly sequential over epics

pub mod dev_loop;
pub mod finalizer;
pub mod gate;
pub mod grouper;
pub mod lifecycle;
pub mod scheduler;

use serde::Serialize;
use storyforge_sdk::{BlockReason, ScanOutcome};
use thiserror::Error;

pub use dev_loop::DevelopmentLoop;
pub use finalizer::EpicFinalizer;
pub use gate::is_eligible;
pub use grouper::{group, EpicGroup};
pub use lifecycle::{StoryRun, StoryRunner};
pub use scheduler::{EpicScheduler, ScheduleResult};

/// Internal signal: the stop flag was observed before an agent call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Interrupted;

/// A story that could never start
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedStory {
    pub story_id: String,
    pub dependency: String,
    pub reason: BlockReason,
}

/// Result of processing one epic
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpicReport {
    pub epic_id: String,
    pub completed: Vec<String>,
    pub errored: Vec<String>,
    pub blocked: Vec<BlockedStory>,
    /// Stories skipped for reusing an id already present in the epic
    pub duplicates: Vec<String>,
    pub scan: ScanOutcome,
    /// Highest number of stories running at once
    pub peak_concurrency: usize,
}

impl EpicReport {
    pub fn has_failures(&self) -> bool {
        !self.errored.is_empty() || !self.blocked.is_empty() || !self.duplicates.is_empty()
    }
}

/// Result of a run that processed every epic
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: uuid::Uuid,
    pub epics: Vec<EpicReport>,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        self.epics.iter().any(EpicReport::has_failures)
    }
}

/// The run was stopped through the cooperative stop flag
#[derive(Debug, Clone, Error, PartialEq)]
#[error("workflow stop requested{}", during(.epic_id))]
pub struct StopRequested {
    /// Epic being processed when the stop was observed
    pub epic_id: Option<String>,
    /// Epics that finished before the stop
    pub finished: Vec<EpicReport>,
}

fn during(epic_id: &Option<String>) -> String {
    epic_id
        .as_ref()
        .map(|id| format!(" during epic {}", id))
        .unwrap_or_default()
}
