//! Event emitter: the write-only output boundary of the orchestrator.
//!
//! Every event gets a sequence number and timestamp, is kept in an in-memory
//! history and is broadcast to live subscribers. Publishing never waits on a
//! consumer; a lagging or absent subscriber does not affect the run.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use storyforge_sdk::{EventRecord, StoryErrorCause, WorkflowEvent};
use tokio::sync::broadcast;

/// Capacity of the live broadcast channel
const CHANNEL_CAPACITY: usize = 1024;

/// Extra sink events are mirrored to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventEcho {
    #[default]
    None,
    /// `__SF_EVENT__:<json>` lines on stderr
    Json,
}

#[derive(Debug, Default)]
struct History {
    records: VecDeque<EventRecord>,
    next_seq: u64,
    limit: Option<usize>,
}

#[derive(Debug)]
struct Inner {
    tx: broadcast::Sender<EventRecord>,
    history: Mutex<History>,
    echo: EventEcho,
}

/// Cloneable handle used by every component that reports progress
#[derive(Debug, Clone)]
pub struct EventEmitter {
    inner: Arc<Inner>,
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(EventEcho::None)
    }
}

impl EventEmitter {
    /// Emitter with an unbounded history.
    ///
    /// The history grows with every story attempt of the run. That is fine
    /// for a single CLI run; long-lived callers should use
    /// [`EventEmitter::with_history_limit`].
    pub fn new(echo: EventEcho) -> Self {
        Self::build(echo, None)
    }

    /// Emitter that keeps only the newest `limit` records in its history.
    /// Sequence numbers keep counting past dropped records.
    pub fn with_history_limit(echo: EventEcho, limit: usize) -> Self {
        Self::build(echo, Some(limit))
    }

    fn build(echo: EventEcho, limit: Option<usize>) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                tx,
                history: Mutex::new(History {
                    limit,
                    ..History::default()
                }),
                echo,
            }),
        }
    }

    /// Record and publish an event
    pub fn emit(&self, event: WorkflowEvent) {
        trace_event(&event);

        // Sequence assignment, history append and send happen under one lock
        // so subscribers observe the same order as the history.
        let mut history = self
            .inner
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let record = EventRecord {
            seq: history.next_seq,
            at: Utc::now(),
            event,
        };
        history.next_seq += 1;
        if self.inner.echo == EventEcho::Json {
            record.emit();
        }
        // No receivers is not an error for a write-only stream
        let _ = self.inner.tx.send(record.clone());
        history.records.push_back(record);
        if let Some(limit) = history.limit {
            while history.records.len() > limit {
                history.records.pop_front();
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.inner.tx.subscribe()
    }

    /// Events emitted so far, oldest first
    pub fn history(&self) -> Vec<EventRecord> {
        self.inner
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .iter()
            .cloned()
            .collect()
    }
}

fn trace_event(event: &WorkflowEvent) {
    match event {
        WorkflowEvent::EpicStarted {
            epic_id,
            story_count,
            ..
        } => tracing::info!(epic = %epic_id, stories = story_count, "epic started"),
        WorkflowEvent::StoryStarted {
            epic_id, story_id, ..
        } => tracing::info!(epic = %epic_id, story = %story_id, "story started"),
        WorkflowEvent::StoryLoopIteration {
            story_id,
            phase,
            attempt,
            max_attempts,
        } => tracing::debug!(
            story = %story_id,
            phase = ?phase,
            attempt,
            max_attempts,
            "story loop iteration"
        ),
        WorkflowEvent::StoryCompleted {
            story_id,
            outcome,
            attempts,
        } => tracing::info!(story = %story_id, outcome = ?outcome, attempts, "story completed"),
        WorkflowEvent::StoryError { story_id, cause } => match cause {
            StoryErrorCause::RunnerPanicked { .. } => {
                tracing::error!(story = %story_id, cause = %cause, "story error")
            }
            _ => tracing::warn!(story = %story_id, cause = %cause, "story error"),
        },
        WorkflowEvent::EpicCompleted {
            epic_id,
            completed,
            errored,
            blocked,
            scan,
        } => tracing::info!(
            epic = %epic_id,
            completed = completed.len(),
            errored = errored.len(),
            blocked = blocked.len(),
            scan_completed = scan.is_completed(),
            "epic completed"
        ),
    }
}
