//! Dependency gate and blocked-story diagnosis.

use std::collections::{HashMap, HashSet};

use storyforge_sdk::BlockReason;

use crate::model::{Story, StoryStatus};
use crate::state::StoryLocation;

/// A story may start only when every dependency is in `completed`.
///
/// No dependencies means always eligible.
pub fn is_eligible(story: &Story, completed: &HashSet<String>) -> bool {
    story.dependencies.iter().all(|dep| completed.contains(dep))
}

/// Explains why stories left in the pending queue at a stall can never start
pub struct BlockDiagnosis<'a> {
    epic_id: &'a str,
    completed: &'a HashSet<String>,
    pending: HashMap<&'a str, &'a Story>,
    locations: &'a HashMap<String, StoryLocation>,
}

impl<'a> BlockDiagnosis<'a> {
    pub fn new(
        epic_id: &'a str,
        completed: &'a HashSet<String>,
        pending: &'a [Story],
        locations: &'a HashMap<String, StoryLocation>,
    ) -> Self {
        Self {
            epic_id,
            completed,
            pending: pending.iter().map(|s| (s.id.as_str(), s)).collect(),
            locations,
        }
    }

    /// The unmet dependency that best explains the block, with its reason.
    ///
    /// Root causes (failed, unknown, cross-epic) win over a cycle, and a
    /// cycle wins over a dependency that is merely blocked itself.
    pub fn diagnose(&self, story: &Story) -> Option<(String, BlockReason)> {
        story
            .dependencies
            .iter()
            .filter(|dep| !self.completed.contains(*dep))
            .map(|dep| (dep.clone(), self.classify(&story.id, dep)))
            .min_by_key(|(_, reason)| rank(reason))
    }

    fn classify(&self, story_id: &str, dep: &str) -> BlockReason {
        let Some(location) = self.locations.get(dep) else {
            return BlockReason::UnknownDependency;
        };
        if location.status == StoryStatus::Error {
            return BlockReason::DependencyFailed;
        }
        if location.epic_id != self.epic_id {
            return BlockReason::CrossEpic {
                epic_id: location.epic_id.clone(),
            };
        }
        if self.pending.contains_key(dep) && self.reaches(dep, story_id) {
            return BlockReason::Cycle;
        }
        BlockReason::DependencyBlocked
    }

    /// True when `target` is reachable from `from` along pending dependencies
    fn reaches(&self, from: &str, target: &str) -> bool {
        let mut stack = vec![from];
        let mut seen = HashSet::new();
        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            if !seen.insert(id) {
                continue;
            }
            if let Some(story) = self.pending.get(id) {
                stack.extend(story.dependencies.iter().map(String::as_str));
            }
        }
        false
    }
}

fn rank(reason: &BlockReason) -> u8 {
    match reason {
        BlockReason::DependencyFailed => 0,
        BlockReason::UnknownDependency => 1,
        BlockReason::CrossEpic { .. } => 2,
        BlockReason::Cycle => 3,
        BlockReason::DependencyBlocked => 4,
    }
}
