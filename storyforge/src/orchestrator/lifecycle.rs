//! Story lifecycle runner: drives one story through a bounded code/test loop.
//!
//! ```text
//! backlog -> in_progress (coding) -> testing -> done | error
//!                 ^                     |
//!                 +---- failed tests ---+
//! ```
//!
//! The stop flag is checked before every agent call. Observing it resets the
//! story to `backlog` and returns [`Interrupted`] without spending an attempt.

use std::sync::Arc;

use serde_json::json;
use storyforge_sdk::{
    actions, AgentGateway, AgentKind, LoopPhase, StoryErrorCause, StoryOutcome, TestResult,
    WorkflowEvent,
};

use super::Interrupted;
use crate::config::{EmptyTestPolicy, ExhaustionPolicy, RetryPolicy};
use crate::events::EventEmitter;
use crate::model::{Story, StoryStatus};
use crate::state::StateStore;

/// Terminal result of one story run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoryRun {
    pub outcome: StoryOutcome,
    /// Code/test cycles started, including the successful one
    pub attempts: u32,
}

impl StoryRun {
    /// Whether the story ended `done`, and so satisfies dependents
    pub fn is_done(&self) -> bool {
        self.outcome != StoryOutcome::Failed
    }
}

/// How one test run is judged
#[derive(Debug, Clone, PartialEq, Eq)]
enum Verdict {
    Pass,
    Fail(String),
}

fn judge(result: &TestResult, empty_tests: EmptyTestPolicy) -> Verdict {
    if result.failed > 0 {
        return Verdict::Fail(format!("{} of {} tests failed", result.failed, result.total));
    }
    if result.passed > 0 {
        return Verdict::Pass;
    }
    match empty_tests {
        EmptyTestPolicy::Pass => Verdict::Pass,
        EmptyTestPolicy::Fail => Verdict::Fail("no tests were executed".to_string()),
    }
}

/// Share of the retry budget used, as a percentage below 100
fn progress_for(attempt: u32, max_attempts: u32, phase: LoopPhase) -> u8 {
    let steps = u64::from(max_attempts.max(1)) * 2;
    let done = u64::from(attempt.saturating_sub(1)) * 2
        + match phase {
            LoopPhase::Coding => 0,
            LoopPhase::Testing => 1,
        };
    ((done * 100) / steps).min(99) as u8
}

/// Runs stories against an agent gateway under a retry policy
#[derive(Clone)]
pub struct StoryRunner {
    gateway: Arc<dyn AgentGateway>,
    store: StateStore,
    events: EventEmitter,
    policy: RetryPolicy,
}

impl StoryRunner {
    pub fn new(
        gateway: Arc<dyn AgentGateway>,
        store: StateStore,
        events: EventEmitter,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            gateway,
            store,
            events,
            policy,
        }
    }

    pub(crate) async fn run(&self, story: &Story) -> Result<StoryRun, Interrupted> {
        let max_attempts = self.policy.max_attempts;

        // Stop raised between the scheduler's launch and this task starting
        if self.store.is_stopping() {
            tracing::debug!(story = %story.id, "stop observed before start");
            return Err(Interrupted);
        }

        self.store
            .set_story_status(&story.id, StoryStatus::InProgress, Some(0))
            .await;
        self.store.set_current_story(Some(&story.id)).await;
        self.events.emit(WorkflowEvent::StoryStarted {
            epic_id: story.epic_id.clone(),
            story_id: story.id.clone(),
            title: story.title.clone(),
        });

        let mut last_failure: Option<String> = None;
        let mut attempts = 0;

        for attempt in 1..=max_attempts {
            self.enter_phase(story, attempt, LoopPhase::Coding).await?;
            attempts = attempt;

            let payload = json!({
                "story": story,
                "attempt": attempt,
                "maxAttempts": max_attempts,
                "previousFailure": last_failure,
            });
            if let Err(e) = self
                .gateway
                .invoke(AgentKind::Coder, actions::IMPLEMENT_STORY, payload)
                .await
            {
                tracing::warn!(story = %story.id, attempt, error = %e, "coder invocation failed");
                last_failure = Some(e.to_string());
                continue;
            }

            self.enter_phase(story, attempt, LoopPhase::Testing).await?;

            let payload = json!({ "story": story, "attempt": attempt });
            let result = self
                .gateway
                .invoke(AgentKind::Tester, actions::TEST_STORY, payload)
                .await
                .and_then(TestResult::from_value);

            match result {
                Ok(result) => match judge(&result, self.policy.empty_tests) {
                    Verdict::Pass => {
                        return Ok(self.finish(story, StoryOutcome::Passed, attempt, None).await);
                    }
                    Verdict::Fail(reason) => {
                        tracing::debug!(story = %story.id, attempt, %reason, "tests did not pass");
                        last_failure = Some(reason);
                    }
                },
                Err(e) => {
                    tracing::warn!(story = %story.id, attempt, error = %e, "tester invocation failed");
                    last_failure = Some(e.to_string());
                }
            }
        }

        let outcome = match self.policy.on_exhausted {
            ExhaustionPolicy::Error => StoryOutcome::Failed,
            ExhaustionPolicy::Done => StoryOutcome::PassedWithKnownFailures,
        };
        Ok(self.finish(story, outcome, attempts, last_failure).await)
    }

    /// Stop check, status/progress update and iteration event for one phase
    async fn enter_phase(
        &self,
        story: &Story,
        attempt: u32,
        phase: LoopPhase,
    ) -> Result<(), Interrupted> {
        if self.store.is_stopping() {
            tracing::info!(story = %story.id, attempt, "stop observed, returning story to backlog");
            self.store
                .set_story_status(&story.id, StoryStatus::Backlog, Some(0))
                .await;
            self.store.clear_current_story(&story.id).await;
            return Err(Interrupted);
        }

        let status = match phase {
            LoopPhase::Coding => StoryStatus::InProgress,
            LoopPhase::Testing => StoryStatus::Testing,
        };
        let progress = progress_for(attempt, self.policy.max_attempts, phase);
        self.store
            .set_story_status(&story.id, status, Some(progress))
            .await;
        self.events.emit(WorkflowEvent::StoryLoopIteration {
            story_id: story.id.clone(),
            phase,
            attempt,
            max_attempts: self.policy.max_attempts,
        });
        Ok(())
    }

    async fn finish(
        &self,
        story: &Story,
        outcome: StoryOutcome,
        attempts: u32,
        last_failure: Option<String>,
    ) -> StoryRun {
        let run = StoryRun { outcome, attempts };
        if run.is_done() {
            self.store
                .set_story_status(&story.id, StoryStatus::Done, Some(100))
                .await;
            self.events.emit(WorkflowEvent::StoryCompleted {
                story_id: story.id.clone(),
                outcome,
                attempts,
            });
        } else {
            self.store
                .set_story_status(&story.id, StoryStatus::Error, None)
                .await;
            self.events.emit(WorkflowEvent::StoryError {
                story_id: story.id.clone(),
                cause: StoryErrorCause::RetriesExhausted {
                    attempts,
                    last_failure,
                },
            });
        }
        self.store.clear_current_story(&story.id).await;
        run
    }
}
