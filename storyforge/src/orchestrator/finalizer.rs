//! Epic finalizer: exactly one security scan per epic.

use std::sync::Arc;

use serde_json::json;
use storyforge_sdk::{actions, AgentGateway, AgentKind, ScanOutcome};

use super::{Interrupted, ScheduleResult};
use crate::model::{Epic, EpicStatus};
use crate::state::StateStore;

/// Issues the per-epic security scan and closes the epic
#[derive(Clone)]
pub struct EpicFinalizer {
    gateway: Arc<dyn AgentGateway>,
    store: StateStore,
}

impl EpicFinalizer {
    pub fn new(gateway: Arc<dyn AgentGateway>, store: StateStore) -> Self {
        Self { gateway, store }
    }

    /// Scan the epic and mark it `completed`.
    ///
    /// The scan runs whether or not stories errored, and only its completion
    /// gates the next epic: a failed scan is returned as
    /// [`ScanOutcome::Failed`]. Nothing is invoked once stop is raised.
    pub(crate) async fn finalize(
        &self,
        epic: &Epic,
        result: &ScheduleResult,
    ) -> Result<ScanOutcome, Interrupted> {
        if self.store.is_stopping() {
            return Err(Interrupted);
        }

        let blocked: Vec<&str> = result.blocked.iter().map(|b| b.story_id.as_str()).collect();
        let payload = json!({
            "epic": epic,
            "completedStories": result.completed,
            "erroredStories": result.errored,
            "blockedStories": blocked,
        });

        let scan = match self
            .gateway
            .invoke(AgentKind::Security, actions::SCAN_EPIC, payload)
            .await
        {
            Ok(report) => ScanOutcome::Completed { report },
            Err(e) => {
                tracing::warn!(epic = %epic.id, error = %e, "security scan failed");
                ScanOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };

        self.store
            .set_epic_status(&epic.id, EpicStatus::Completed)
            .await;
        Ok(scan)
    }
}
