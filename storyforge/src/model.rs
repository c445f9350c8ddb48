//! Backlog data model: epics, stories and the aggregate workflow state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Status of an epic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpicStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

/// Status of a story
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryStatus {
    #[default]
    Backlog,
    InProgress,
    Testing,
    Done,
    Error,
}

impl StoryStatus {
    /// Counted against the concurrency cap
    pub fn is_active(&self) -> bool {
        matches!(self, StoryStatus::InProgress | StoryStatus::Testing)
    }
}

impl std::fmt::Display for StoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            StoryStatus::Backlog => "backlog",
            StoryStatus::InProgress => "in_progress",
            StoryStatus::Testing => "testing",
            StoryStatus::Done => "done",
            StoryStatus::Error => "error",
        };
        f.write_str(label)
    }
}

/// A named group of stories processed as one sequential unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Epic {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub status: EpicStatus,
}

impl Epic {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            status: EpicStatus::Pending,
        }
    }
}

/// The smallest schedulable unit of work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub id: String,
    pub epic_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: StoryStatus,
    /// Story ids that must be `done` before this story may start
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    /// Percent complete, 0..=100
    #[serde(default)]
    pub progress: u8,
}

impl Story {
    pub fn new(
        id: impl Into<String>,
        epic_id: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            epic_id: epic_id.into(),
            title: title.into(),
            description: String::new(),
            status: StoryStatus::Backlog,
            dependencies: BTreeSet::new(),
            progress: 0,
        }
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }
}

/// Aggregate root of one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    /// Epics in declaration (processing) order
    #[serde(default)]
    pub epics: Vec<Epic>,
    /// Stories in declaration order
    #[serde(default)]
    pub stories: Vec<Story>,
    /// Cooperative cancellation flag, mirrored from the live stop handle
    #[serde(default)]
    pub stopping: bool,
    /// Diagnostic only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_story: Option<String>,
}

impl WorkflowState {
    pub fn new(epics: Vec<Epic>, stories: Vec<Story>) -> Self {
        Self {
            epics,
            stories,
            stopping: false,
            current_story: None,
        }
    }

    pub fn epic(&self, id: &str) -> Option<&Epic> {
        self.epics.iter().find(|e| e.id == id)
    }

    pub fn story(&self, id: &str) -> Option<&Story> {
        self.stories.iter().find(|s| s.id == id)
    }

    pub fn story_mut(&mut self, id: &str) -> Option<&mut Story> {
        self.stories.iter_mut().find(|s| s.id == id)
    }

    pub fn epic_mut(&mut self, id: &str) -> Option<&mut Epic> {
        self.epics.iter_mut().find(|e| e.id == id)
    }

    /// Stories of one epic, in declaration order
    pub fn stories_in<'a>(&'a self, epic_id: &'a str) -> impl Iterator<Item = &'a Story> + 'a {
        self.stories.iter().filter(move |s| s.epic_id == epic_id)
    }
}
