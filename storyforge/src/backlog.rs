//! Backlog persistence and static validation.
//!
//! The orchestrator works on an in-memory [`WorkflowState`]; this module is
//! the collaborator that loads it before a run and saves it afterwards.
//! Files ending in `.json` are JSON, anything else is YAML.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use thiserror::Error;

use crate::model::{StoryStatus, WorkflowState};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BacklogError {
    #[error("duplicate epic id: {0}")]
    DuplicateEpic(String),
    #[error("duplicate story id: {0}")]
    DuplicateStory(String),
    #[error("story {story} references unknown epic {epic}")]
    UnknownEpic { story: String, epic: String },
}

/// Dependency that can never be satisfied within its epic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyWarning {
    Unknown { story: String, dependency: String },
    CrossEpic {
        story: String,
        dependency: String,
        epic_id: String,
    },
    SelfDependency { story: String },
}

impl fmt::Display for DependencyWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyWarning::Unknown { story, dependency } => {
                write!(f, "{} depends on unknown story {}", story, dependency)
            }
            DependencyWarning::CrossEpic {
                story,
                dependency,
                epic_id,
            } => write!(
                f,
                "{} depends on {} from epic {}; it must already be done",
                story, dependency, epic_id
            ),
            DependencyWarning::SelfDependency { story } => {
                write!(f, "{} depends on itself", story)
            }
        }
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

/// Load a backlog file
pub fn load(path: &Path) -> Result<WorkflowState> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read backlog: {}", path.display()))?;

    let state = if is_json(path) {
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse backlog JSON: {}", path.display()))?
    } else {
        serde_yaml::from_str(&text)
            .with_context(|| format!("Failed to parse backlog YAML: {}", path.display()))?
    };
    Ok(state)
}

/// Write the state back in the format implied by `path`
pub fn save(path: &Path, state: &WorkflowState) -> Result<()> {
    let text = if is_json(path) {
        serde_json::to_string_pretty(state).context("Failed to serialize backlog")?
    } else {
        serde_yaml::to_string(state).context("Failed to serialize backlog")?
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    std::fs::write(path, text)
        .with_context(|| format!("Failed to write backlog: {}", path.display()))?;
    Ok(())
}

/// Check id uniqueness and epic references; return dependency warnings
pub fn validate(state: &WorkflowState) -> Result<Vec<DependencyWarning>, BacklogError> {
    let mut epic_ids = HashSet::new();
    for epic in &state.epics {
        if !epic_ids.insert(epic.id.as_str()) {
            return Err(BacklogError::DuplicateEpic(epic.id.clone()));
        }
    }

    let mut story_epics: HashMap<&str, &str> = HashMap::new();
    for story in &state.stories {
        if !epic_ids.contains(story.epic_id.as_str()) {
            return Err(BacklogError::UnknownEpic {
                story: story.id.clone(),
                epic: story.epic_id.clone(),
            });
        }
        if story_epics
            .insert(story.id.as_str(), story.epic_id.as_str())
            .is_some()
        {
            return Err(BacklogError::DuplicateStory(story.id.clone()));
        }
    }

    let mut warnings = Vec::new();
    for story in &state.stories {
        for dep in &story.dependencies {
            match story_epics.get(dep.as_str()) {
                None => warnings.push(DependencyWarning::Unknown {
                    story: story.id.clone(),
                    dependency: dep.clone(),
                }),
                Some(_) if *dep == story.id => warnings.push(DependencyWarning::SelfDependency {
                    story: story.id.clone(),
                }),
                Some(epic_id) if *epic_id != story.epic_id => {
                    let done = state
                        .story(dep)
                        .is_some_and(|d| d.status == StoryStatus::Done);
                    if !done {
                        warnings.push(DependencyWarning::CrossEpic {
                            story: story.id.clone(),
                            dependency: dep.clone(),
                            epic_id: epic_id.to_string(),
                        });
                    }
                }
                Some(_) => {}
            }
        }
    }
    Ok(warnings)
}

/// Return stories left `in_progress` or `testing` by an aborted process to
/// `backlog`.
pub fn reset_interrupted(state: &mut WorkflowState) -> Vec<String> {
    let mut reset = Vec::new();
    for story in state.stories.iter_mut().filter(|s| s.status.is_active()) {
        story.status = StoryStatus::Backlog;
        story.progress = 0;
        reset.push(story.id.clone());
    }
    reset
}
