//! Epic story scheduler: bounded-concurrency executor for the stories of one
//! epic.
//!
//! Stories are launched in declaration order as soon as the dependency gate
//! allows and a permit is free. Each runner is a task in a [`JoinSet`] holding
//! an owned [`Semaphore`] permit, so at most `concurrency` runners exist at
//! any instant. The pending queue, the completed set and the results are
//! owned by the scheduler loop and only touched between joins.
//!
//! When nothing is running and nothing pending is eligible the epic has
//! stalled; each remaining story is reported as blocked and left in
//! `backlog`.
//!
//! A story id appears at most once per epic. Later stories reusing an id are
//! skipped and reported, so no two runners ever write the same story.

use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use storyforge_sdk::{StoryErrorCause, WorkflowEvent};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::gate::{is_eligible, BlockDiagnosis};
use super::lifecycle::{StoryRun, StoryRunner};
use super::{BlockedStory, Interrupted};
use crate::events::EventEmitter;
use crate::model::{Epic, Story, StoryStatus};
use crate::state::StateStore;

type RunnerOutput = (String, std::thread::Result<Result<StoryRun, Interrupted>>);

/// What happened to the stories of one epic
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleResult {
    /// Stories that ended `done`, in completion order
    pub completed: Vec<String>,
    /// Stories that ended `error`, in completion order
    pub errored: Vec<String>,
    /// Stories that could never start
    pub blocked: Vec<BlockedStory>,
    /// Ids skipped because an earlier story of the epic has the same id
    pub duplicates: Vec<String>,
    /// Most runners holding a permit at once
    pub peak_concurrency: usize,
}

/// Runs the stories of one epic with at most `concurrency` in flight
#[derive(Clone)]
pub struct EpicScheduler {
    runner: StoryRunner,
    store: StateStore,
    events: EventEmitter,
    concurrency: usize,
}

impl EpicScheduler {
    pub fn new(
        runner: StoryRunner,
        store: StateStore,
        events: EventEmitter,
        concurrency: usize,
    ) -> Self {
        Self {
            runner,
            store,
            events,
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run `stories` to a terminal status or until the stop flag drains the
    /// epic.
    pub(crate) async fn run_epic(
        &self,
        epic: &Epic,
        stories: Vec<Story>,
    ) -> Result<ScheduleResult, Interrupted> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut join_set: JoinSet<RunnerOutput> = JoinSet::new();
        let mut completed_ids = self.store.done_story_ids().await;
        let mut result = ScheduleResult::default();
        let mut interrupted = false;

        let mut seen = HashSet::new();
        let (mut pending, duplicates): (Vec<Story>, Vec<Story>) =
            stories.into_iter().partition(|s| seen.insert(s.id.clone()));
        for story in duplicates {
            tracing::warn!(epic = %epic.id, story = %story.id, "skipping story with duplicate id");
            result.duplicates.push(story.id);
        }

        tracing::debug!(
            epic = %epic.id,
            stories = pending.len(),
            concurrency = self.concurrency,
            "scheduling epic"
        );

        loop {
            if !self.store.is_stopping() {
                self.launch_eligible(&semaphore, &mut join_set, &mut pending, &completed_ids);
                // Finished but unjoined tasks have already released their permit
                let in_flight = self.concurrency - semaphore.available_permits();
                result.peak_concurrency = result.peak_concurrency.max(in_flight);
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };

            match joined {
                Ok((story_id, Ok(Ok(run)))) => {
                    if run.is_done() {
                        completed_ids.insert(story_id.clone());
                        result.completed.push(story_id);
                    } else {
                        result.errored.push(story_id);
                    }
                }
                Ok((_, Ok(Err(Interrupted)))) => interrupted = true,
                Ok((story_id, Err(panic))) => {
                    self.record_panic(&story_id, panic.as_ref()).await;
                    result.errored.push(story_id);
                }
                Err(e) => {
                    // Runner panics are caught inside the task; this is a cancelled task
                    tracing::error!(epic = %epic.id, error = %e, "story task did not complete");
                }
            }
        }

        if interrupted || self.store.is_stopping() {
            tracing::info!(
                epic = %epic.id,
                pending = pending.len(),
                "epic drained after stop request"
            );
            return Err(Interrupted);
        }

        if !pending.is_empty() {
            result.blocked = self.report_stall(epic, &pending, &completed_ids).await;
        }

        Ok(result)
    }

    /// Launch the first eligible pending story until capacity or eligible
    /// work runs out.
    fn launch_eligible(
        &self,
        semaphore: &Arc<Semaphore>,
        join_set: &mut JoinSet<RunnerOutput>,
        pending: &mut Vec<Story>,
        completed_ids: &HashSet<String>,
    ) {
        while let Some(index) = pending.iter().position(|s| is_eligible(s, completed_ids)) {
            let permit = match semaphore.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let story = pending.remove(index);
            tracing::debug!(
                story = %story.id,
                in_flight = self.concurrency - semaphore.available_permits(),
                "launching story"
            );

            let runner = self.runner.clone();
            join_set.spawn(async move {
                let _permit = permit;
                let outcome = AssertUnwindSafe(runner.run(&story)).catch_unwind().await;
                (story.id, outcome)
            });
        }
    }

    async fn record_panic(&self, story_id: &str, panic: &(dyn Any + Send)) {
        let message = panic_message(panic);
        tracing::error!(story = %story_id, %message, "story runner panicked");

        self.store
            .set_story_status(story_id, StoryStatus::Error, None)
            .await;
        self.store.clear_current_story(story_id).await;
        self.events.emit(WorkflowEvent::StoryError {
            story_id: story_id.to_string(),
            cause: StoryErrorCause::RunnerPanicked { message },
        });
    }

    async fn report_stall(
        &self,
        epic: &Epic,
        pending: &[Story],
        completed_ids: &HashSet<String>,
    ) -> Vec<BlockedStory> {
        let locations = self.store.story_locations().await;
        let diagnosis = BlockDiagnosis::new(&epic.id, completed_ids, pending, &locations);

        tracing::warn!(epic = %epic.id, blocked = pending.len(), "epic stalled on unsatisfiable dependencies");

        let mut blocked = Vec::with_capacity(pending.len());
        for story in pending {
            let Some((dependency, reason)) = diagnosis.diagnose(story) else {
                continue;
            };
            self.events.emit(WorkflowEvent::StoryError {
                story_id: story.id.clone(),
                cause: StoryErrorCause::DependencyUnsatisfiable {
                    dependency: dependency.clone(),
                    reason: reason.clone(),
                },
            });
            blocked.push(BlockedStory {
                story_id: story.id.clone(),
                dependency,
                reason,
            });
        }
        blocked
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
