//! Display model built by folding the event stream, and one-line rendering
//! of events for terminal output.

use storyforge_sdk::{LoopPhase, ScanOutcome, StoryOutcome, WorkflowEvent};

/// Display status of a story on the board
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardStatus {
    Running,
    Passed,
    PassedWithKnownFailures,
    Failed,
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardStory {
    pub id: String,
    pub title: String,
    pub status: BoardStatus,
    pub attempt: u32,
    pub phase: Option<LoopPhase>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoardEpic {
    pub id: String,
    pub title: String,
    pub story_count: usize,
    pub finished: bool,
    pub scan: Option<ScanOutcome>,
    pub stories: Vec<BoardStory>,
}

impl BoardEpic {
    pub fn count(&self, status: BoardStatus) -> usize {
        self.stories.iter().filter(|s| s.status == status).count()
    }
}

/// Per-epic, per-story view of a run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressBoard {
    pub epics: Vec<BoardEpic>,
}

impl ProgressBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &WorkflowEvent) {
        match event {
            WorkflowEvent::EpicStarted {
                epic_id,
                title,
                story_count,
            } => {
                if let Some(epic) = self.epics.iter_mut().find(|e| &e.id == epic_id) {
                    epic.finished = false;
                    epic.story_count = *story_count;
                } else {
                    self.epics.push(BoardEpic {
                        id: epic_id.clone(),
                        title: title.clone(),
                        story_count: *story_count,
                        finished: false,
                        scan: None,
                        stories: Vec::new(),
                    });
                }
            }
            WorkflowEvent::StoryStarted {
                epic_id,
                story_id,
                title,
            } => {
                if let Some(epic) = self.epics.iter_mut().find(|e| &e.id == epic_id) {
                    if let Some(story) = epic.stories.iter_mut().find(|s| &s.id == story_id) {
                        story.status = BoardStatus::Running;
                    } else {
                        epic.stories.push(BoardStory {
                            id: story_id.clone(),
                            title: title.clone(),
                            status: BoardStatus::Running,
                            attempt: 0,
                            phase: None,
                        });
                    }
                }
            }
            WorkflowEvent::StoryLoopIteration {
                story_id,
                phase,
                attempt,
                ..
            } => {
                if let Some(story) = self.story_mut(story_id) {
                    story.attempt = *attempt;
                    story.phase = Some(*phase);
                }
            }
            WorkflowEvent::StoryCompleted {
                story_id, outcome, ..
            } => {
                if let Some(story) = self.story_mut(story_id) {
                    story.phase = None;
                    story.status = match outcome {
                        StoryOutcome::Passed => BoardStatus::Passed,
                        StoryOutcome::PassedWithKnownFailures => {
                            BoardStatus::PassedWithKnownFailures
                        }
                        StoryOutcome::Failed => BoardStatus::Failed,
                    };
                }
            }
            WorkflowEvent::StoryError { story_id, .. } => {
                if let Some(story) = self.story_mut(story_id) {
                    story.phase = None;
                    story.status = BoardStatus::Failed;
                } else if let Some(epic) = self.epics.iter_mut().rev().find(|e| !e.finished) {
                    // Never started: blocked behind a dependency
                    epic.stories.push(BoardStory {
                        id: story_id.clone(),
                        title: String::new(),
                        status: BoardStatus::Blocked,
                        attempt: 0,
                        phase: None,
                    });
                }
            }
            WorkflowEvent::EpicCompleted { epic_id, scan, .. } => {
                if let Some(epic) = self.epics.iter_mut().find(|e| &e.id == epic_id) {
                    epic.finished = true;
                    epic.scan = Some(scan.clone());
                }
            }
        }
    }

    fn story_mut(&mut self, story_id: &str) -> Option<&mut BoardStory> {
        self.epics
            .iter_mut()
            .flat_map(|e| e.stories.iter_mut())
            .find(|s| s.id == story_id)
    }

    /// Stories currently running across the board
    pub fn running(&self) -> usize {
        self.epics.iter().map(|e| e.count(BoardStatus::Running)).sum()
    }
}

/// Render an event as a single human-readable line
pub fn format_event(event: &WorkflowEvent) -> String {
    match event {
        WorkflowEvent::EpicStarted {
            epic_id,
            title,
            story_count,
        } => format!("▶ Epic {} ({}): {} stories", epic_id, title, story_count),
        WorkflowEvent::StoryStarted {
            story_id, title, ..
        } => format!("  ▶ {} {}", story_id, title),
        WorkflowEvent::StoryLoopIteration {
            story_id,
            phase,
            attempt,
            max_attempts,
        } => {
            let phase = match phase {
                LoopPhase::Coding => "coding",
                LoopPhase::Testing => "testing",
            };
            format!("    • [{}] {} (attempt {}/{})", story_id, phase, attempt, max_attempts)
        }
        WorkflowEvent::StoryCompleted {
            story_id,
            outcome,
            attempts,
        } => match outcome {
            StoryOutcome::Passed => format!("  ✓ {} passed after {} attempt(s)", story_id, attempts),
            StoryOutcome::PassedWithKnownFailures => format!(
                "  ⚠ {} marked done with failing tests after {} attempt(s)",
                story_id, attempts
            ),
            StoryOutcome::Failed => format!("  ✗ {} failed after {} attempt(s)", story_id, attempts),
        },
        WorkflowEvent::StoryError { story_id, cause } => {
            format!("  ✗ {}: {}", story_id, cause)
        }
        WorkflowEvent::EpicCompleted {
            epic_id,
            completed,
            errored,
            blocked,
            scan,
        } => {
            let scan = match scan {
                ScanOutcome::Completed { .. } => "scan completed".to_string(),
                ScanOutcome::Failed { error } => format!("scan failed: {}", error),
            };
            format!(
                "■ Epic {} finished: {} done, {} errored, {} blocked; {}",
                epic_id,
                completed.len(),
                errored.len(),
                blocked.len(),
                scan
            )
        }
    }
}
