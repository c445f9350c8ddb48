//! Shared workflow state and the cooperative stop flag.
//!
//! Up to K story runners update the state concurrently, so every epic and
//! story mutation goes through the one mutex held by [`StateStore`]. The stop
//! flag lives outside the mutex so it can be checked without waiting.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::model::{EpicStatus, Story, StoryStatus, WorkflowState};

/// Handle to the run's single `stopping` flag.
///
/// Raising it is idempotent and can happen from any task or thread.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    token: CancellationToken,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.token.cancel();
    }

    pub fn is_raised(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Epic id and status for a story, used to explain blocked dependencies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryLocation {
    pub epic_id: String,
    pub status: StoryStatus,
}

/// Mutex-guarded store for the aggregate [`WorkflowState`]
#[derive(Debug, Clone)]
pub struct StateStore {
    state: Arc<Mutex<WorkflowState>>,
    stop: StopHandle,
}

impl StateStore {
    pub fn new(mut state: WorkflowState) -> Self {
        let stop = StopHandle::new();
        if state.stopping {
            // A persisted stop request is not carried into a new run
            state.stopping = false;
        }
        Self {
            state: Arc::new(Mutex::new(state)),
            stop,
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.is_raised()
    }

    /// Copy of the current state with `stopping` mirrored from the flag
    pub async fn snapshot(&self) -> WorkflowState {
        let mut state = self.state.lock().await.clone();
        state.stopping = self.stop.is_raised();
        state
    }

    pub async fn story(&self, id: &str) -> Option<Story> {
        self.state.lock().await.story(id).cloned()
    }

    /// Update a story's status and, optionally, its progress.
    ///
    /// Returns false when the story does not exist.
    pub async fn set_story_status(&self, id: &str, status: StoryStatus, progress: Option<u8>) -> bool {
        let mut state = self.state.lock().await;
        match state.story_mut(id) {
            Some(story) => {
                story.status = status;
                if let Some(progress) = progress {
                    story.progress = progress.min(100);
                }
                true
            }
            None => false,
        }
    }

    pub async fn set_epic_status(&self, id: &str, status: EpicStatus) -> bool {
        let mut state = self.state.lock().await;
        match state.epic_mut(id) {
            Some(epic) => {
                epic.status = status;
                true
            }
            None => false,
        }
    }

    pub async fn set_current_story(&self, id: Option<&str>) {
        self.state.lock().await.current_story = id.map(str::to_string);
    }

    /// Clear the current-story pointer if it still names `id`
    pub async fn clear_current_story(&self, id: &str) {
        let mut state = self.state.lock().await;
        if state.current_story.as_deref() == Some(id) {
            state.current_story = None;
        }
    }

    /// Ids of every story currently `done`
    pub async fn done_story_ids(&self) -> HashSet<String> {
        self.state
            .lock()
            .await
            .stories
            .iter()
            .filter(|s| s.status == StoryStatus::Done)
            .map(|s| s.id.clone())
            .collect()
    }

    pub async fn story_locations(&self) -> HashMap<String, StoryLocation> {
        self.state
            .lock()
            .await
            .stories
            .iter()
            .map(|s| {
                (
                    s.id.clone(),
                    StoryLocation {
                        epic_id: s.epic_id.clone(),
                        status: s.status,
                    },
                )
            })
            .collect()
    }

    /// Number of stories in `in_progress` or `testing`
    pub async fn active_story_count(&self) -> usize {
        self.state
            .lock()
            .await
            .stories
            .iter()
            .filter(|s| s.status.is_active())
            .count()
    }
}
