//! Development loop: the top-level driver of a run.
//!
//! Epics are processed strictly one after another. The next epic starts only
//! after the previous one's scheduler drained and its finalizer returned. The
//! loop is the only component that ends a run early, and it does so only for
//! a stop request.

use std::sync::Arc;

use storyforge_sdk::{AgentGateway, WorkflowEvent};
use uuid::Uuid;

use super::finalizer::EpicFinalizer;
use super::grouper::{group, EpicGroup};
use super::lifecycle::StoryRunner;
use super::scheduler::EpicScheduler;
use super::{EpicReport, Interrupted, RunReport, StopRequested};
use crate::config::RunConfig;
use crate::events::EventEmitter;
use crate::model::EpicStatus;
use crate::state::StateStore;

pub struct DevelopmentLoop {
    store: StateStore,
    events: EventEmitter,
    scheduler: EpicScheduler,
    finalizer: EpicFinalizer,
}

impl DevelopmentLoop {
    pub fn new(
        gateway: Arc<dyn AgentGateway>,
        store: StateStore,
        events: EventEmitter,
        config: &RunConfig,
    ) -> Self {
        let runner = StoryRunner::new(
            gateway.clone(),
            store.clone(),
            events.clone(),
            config.retry_policy(),
        );
        let scheduler = EpicScheduler::new(runner, store.clone(), events.clone(), config.concurrency);
        let finalizer = EpicFinalizer::new(gateway, store.clone());

        Self {
            store,
            events,
            scheduler,
            finalizer,
        }
    }

    /// Process every epic that has backlog stories, in declaration order
    pub async fn run(&self) -> Result<RunReport, StopRequested> {
        let run_id = Uuid::new_v4();
        let groups = group(&self.store.snapshot().await);
        tracing::info!(%run_id, epics = groups.len(), "development run started");

        let mut finished = Vec::with_capacity(groups.len());
        for group in groups {
            if self.store.is_stopping() {
                tracing::info!(%run_id, "stop observed between epics");
                return Err(StopRequested {
                    epic_id: None,
                    finished,
                });
            }

            match self.run_epic(group).await {
                Ok(report) => finished.push(report),
                Err((epic_id, Interrupted)) => {
                    tracing::info!(%run_id, epic = %epic_id, "stop observed during epic");
                    return Err(StopRequested {
                        epic_id: Some(epic_id),
                        finished,
                    });
                }
            }
        }

        // A stop raised during the last scan still surfaces as a stop
        if self.store.is_stopping() {
            return Err(StopRequested {
                epic_id: None,
                finished,
            });
        }

        tracing::info!(%run_id, epics = finished.len(), "development run finished");
        Ok(RunReport {
            run_id,
            epics: finished,
        })
    }

    async fn run_epic(&self, group: EpicGroup) -> Result<EpicReport, (String, Interrupted)> {
        let EpicGroup { epic, stories } = group;

        self.events.emit(WorkflowEvent::EpicStarted {
            epic_id: epic.id.clone(),
            title: epic.title.clone(),
            story_count: stories.len(),
        });
        self.store
            .set_epic_status(&epic.id, EpicStatus::InProgress)
            .await;

        let schedule = self
            .scheduler
            .run_epic(&epic, stories)
            .await
            .map_err(|stop| (epic.id.clone(), stop))?;
        let scan = self
            .finalizer
            .finalize(&epic, &schedule)
            .await
            .map_err(|stop| (epic.id.clone(), stop))?;

        self.events.emit(WorkflowEvent::EpicCompleted {
            epic_id: epic.id.clone(),
            completed: schedule.completed.clone(),
            errored: schedule.errored.clone(),
            blocked: schedule.blocked.iter().map(|b| b.story_id.clone()).collect(),
            scan: scan.clone(),
        });

        Ok(EpicReport {
            epic_id: epic.id,
            completed: schedule.completed,
            errored: schedule.errored,
            blocked: schedule.blocked,
            duplicates: schedule.duplicates,
            scan,
            peak_concurrency: schedule.peak_concurrency,
        })
    }
}
