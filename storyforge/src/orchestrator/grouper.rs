//! Epic grouper: ordered (epic, eligible stories) groups.

use crate::model::{Epic, Story, StoryStatus, WorkflowState};

/// One epic and the stories the scheduler should consider for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpicGroup {
    pub epic: Epic,
    /// `backlog` stories of the epic, in declaration order
    pub stories: Vec<Story>,
}

/// Partition the backlog by epic.
///
/// Keeps epic declaration order and story declaration order within each
/// epic. Only `backlog` stories are included; epics left with none are
/// skipped.
pub fn group(state: &WorkflowState) -> Vec<EpicGroup> {
    state
        .epics
        .iter()
        .filter_map(|epic| {
            let stories: Vec<Story> = state
                .stories_in(&epic.id)
                .filter(|s| s.status == StoryStatus::Backlog)
                .cloned()
                .collect();

            if stories.is_empty() {
                None
            } else {
                Some(EpicGroup {
                    epic: epic.clone(),
                    stories,
                })
            }
        })
        .collect()
}
