//! Tests for the explicit outcome policies: exhaustion, empty test runs,
//! unsatisfiable dependencies and failed scans

use super::common::*;
use std::sync::Arc;
use storyforge::config::{EmptyTestPolicy, ExhaustionPolicy, RunConfig};
use storyforge::events::EventEmitter;
use storyforge::model::{EpicStatus, StoryStatus};
use storyforge::state::StateStore;
use storyforge_sdk::{AgentKind, BlockReason, ScanOutcome, StoryErrorCause, StoryOutcome, WorkflowEvent};

fn blocked_cause(history: &[storyforge_sdk::EventRecord], id: &str) -> Option<(String, BlockReason)> {
    history.iter().find_map(|r| match &r.event {
        WorkflowEvent::StoryError {
            story_id,
            cause: StoryErrorCause::DependencyUnsatisfiable { dependency, reason },
        } if story_id == id => Some((dependency.clone(), reason.clone())),
        _ => None,
    })
}

// ============================================================================
// Retry exhaustion
// ============================================================================

#[tokio::test]
async fn test_exhaustion_marked_done_is_not_a_verified_pass() {
    let store = StateStore::new(state(
        &["e"],
        vec![story("a", "e", &[]), story("b", "e", &["a"])],
    ));
    let events = EventEmitter::default();
    let gateway = Arc::new(ScriptedGateway::new().script("a", vec![fail(), fail()]));
    let config = RunConfig {
        max_retries: 2,
        on_exhausted: ExhaustionPolicy::Done,
        ..RunConfig::default()
    };

    let report = run(&store, &events, gateway.clone(), &config).await.unwrap();

    assert_eq!(gateway.calls_for("a", AgentKind::Tester), 2);
    assert_eq!(store.story("a").await.unwrap().status, StoryStatus::Done);
    // a counts as done, so its dependent runs
    assert_eq!(report.epics[0].completed, vec!["a".to_string(), "b".to_string()]);
    assert!(!report.has_failures());

    let outcome = events.history().iter().find_map(|r| match &r.event {
        WorkflowEvent::StoryCompleted {
            story_id, outcome, ..
        } if story_id == "a" => Some(*outcome),
        _ => None,
    });
    assert_eq!(outcome, Some(StoryOutcome::PassedWithKnownFailures));
}

#[tokio::test]
async fn test_exhaustion_error_records_last_failure() {
    let store = StateStore::new(state(&["e"], vec![story("a", "e", &[])]));
    let events = EventEmitter::default();
    let gateway = Arc::new(ScriptedGateway::new().script_raw(
        "a",
        vec![Ok(fail()), Err("runner crashed".to_string())],
    ));
    let config = RunConfig {
        max_retries: 2,
        ..RunConfig::default()
    };

    run(&store, &events, gateway, &config).await.unwrap();

    let cause = events.history().iter().find_map(|r| match &r.event {
        WorkflowEvent::StoryError { cause, .. } => Some(cause.clone()),
        _ => None,
    });
    match cause {
        Some(StoryErrorCause::RetriesExhausted {
            attempts,
            last_failure: Some(failure),
        }) => {
            assert_eq!(attempts, 2);
            assert!(failure.contains("runner crashed"));
        }
        other => panic!("unexpected cause: {:?}", other),
    }
}

// ============================================================================
// Empty test runs
// ============================================================================

#[tokio::test]
async fn test_empty_test_run_passes_by_default() {
    let store = StateStore::new(state(&["e"], vec![story("a", "e", &[])]));
    let events = EventEmitter::default();
    let gateway = Arc::new(ScriptedGateway::new().script("a", vec![empty()]));

    run(&store, &events, gateway.clone(), &config(1)).await.unwrap();

    assert_eq!(gateway.calls_for("a", AgentKind::Tester), 1);
    assert_eq!(store.story("a").await.unwrap().status, StoryStatus::Done);
}

#[tokio::test]
async fn test_empty_test_run_can_count_as_failure() {
    let store = StateStore::new(state(&["e"], vec![story("a", "e", &[])]));
    let events = EventEmitter::default();
    let gateway = Arc::new(ScriptedGateway::new().script("a", vec![empty(), pass()]));
    let config = RunConfig {
        empty_tests: EmptyTestPolicy::Fail,
        ..RunConfig::default()
    };

    run(&store, &events, gateway.clone(), &config).await.unwrap();

    assert_eq!(gateway.calls_for("a", AgentKind::Tester), 2);
    assert_eq!(store.story("a").await.unwrap().status, StoryStatus::Done);
}

// ============================================================================
// Unsatisfiable dependencies
// ============================================================================

#[tokio::test]
async fn test_failed_dependency_blocks_dependents() {
    let store = StateStore::new(state(
        &["e"],
        vec![
            story("a", "e", &[]),
            story("b", "e", &["a"]),
            story("c", "e", &["b"]),
            story("d", "e", &[]),
        ],
    ));
    let events = EventEmitter::default();
    let gateway = Arc::new(ScriptedGateway::new().script("a", vec![fail(), fail(), fail()]));

    let report = run(&store, &events, gateway.clone(), &config(2)).await.unwrap();
    let epic = &report.epics[0];

    assert_eq!(epic.completed, vec!["d".to_string()]);
    assert_eq!(epic.errored, vec!["a".to_string()]);
    let blocked: Vec<&str> = epic.blocked.iter().map(|b| b.story_id.as_str()).collect();
    assert_eq!(blocked, vec!["b", "c"]);

    let history = events.history();
    assert_eq!(
        blocked_cause(&history, "b"),
        Some(("a".to_string(), BlockReason::DependencyFailed))
    );
    assert_eq!(
        blocked_cause(&history, "c"),
        Some(("b".to_string(), BlockReason::DependencyBlocked))
    );

    // Blocked stories never leave backlog and get no agent calls
    for id in ["b", "c"] {
        assert_eq!(store.story(id).await.unwrap().status, StoryStatus::Backlog);
        assert_eq!(gateway.calls_for(id, AgentKind::Coder), 0);
    }

    // The epic still completes, with its scan
    assert_eq!(gateway.scans(), vec!["e".to_string()]);
    assert_eq!(store.snapshot().await.epics[0].status, EpicStatus::Completed);
    assert!(history.iter().any(|r| matches!(
        &r.event,
        WorkflowEvent::EpicCompleted { blocked, errored, .. }
            if blocked.len() == 2 && errored.len() == 1
    )));
}

#[tokio::test]
async fn test_cycle_and_unknown_dependencies_stall_without_spinning() {
    let store = StateStore::new(state(
        &["e"],
        vec![
            story("x", "e", &["y"]),
            story("y", "e", &["x"]),
            story("z", "e", &["ghost"]),
            story("ok", "e", &[]),
        ],
    ));
    let events = EventEmitter::default();
    let gateway = Arc::new(ScriptedGateway::new());

    let report = run(&store, &events, gateway, &config(3)).await.unwrap();
    assert_eq!(report.epics[0].completed, vec!["ok".to_string()]);

    let history = events.history();
    assert_eq!(
        blocked_cause(&history, "x"),
        Some(("y".to_string(), BlockReason::Cycle))
    );
    assert_eq!(
        blocked_cause(&history, "z"),
        Some(("ghost".to_string(), BlockReason::UnknownDependency))
    );
}

#[tokio::test]
async fn test_cross_epic_dependencies() {
    let mut initial = state(
        &["first", "second", "third"],
        vec![
            story("f1", "first", &[]),
            story("s1", "second", &["f1"]),
            story("s2", "second", &["t1"]),
            story("t1", "third", &[]),
            story("old", "third", &[]),
            story("s3", "second", &["old"]),
        ],
    );
    // Done in an earlier run
    if let Some(old) = initial.story_mut("old") {
        old.status = StoryStatus::Done;
    }
    let store = StateStore::new(initial);
    let events = EventEmitter::default();
    let gateway = Arc::new(ScriptedGateway::new());

    let report = run(&store, &events, gateway, &config(2)).await.unwrap();

    // Earlier epic finished first, earlier run already done
    let second = &report.epics[1];
    let mut completed = second.completed.clone();
    completed.sort();
    assert_eq!(completed, vec!["s1".to_string(), "s3".to_string()]);
    assert_eq!(second.blocked.len(), 1);
    assert_eq!(
        second.blocked[0].reason,
        BlockReason::CrossEpic {
            epic_id: "third".to_string()
        }
    );
    assert_eq!(store.story("s2").await.unwrap().status, StoryStatus::Backlog);
    assert_eq!(store.story("t1").await.unwrap().status, StoryStatus::Done);
}

// ============================================================================
// Security scan
// ============================================================================

#[tokio::test]
async fn test_failed_scan_does_not_hold_back_next_epic() {
    let store = StateStore::new(state(
        &["e1", "e2"],
        vec![story("a", "e1", &[]), story("b", "e2", &[])],
    ));
    let events = EventEmitter::default();
    let gateway = Arc::new(ScriptedGateway::new().fail_scan("e1"));

    let report = run(&store, &events, gateway.clone(), &config(1)).await.unwrap();

    assert!(matches!(&report.epics[0].scan, ScanOutcome::Failed { error } if error.contains("scanner offline")));
    assert!(report.epics[1].scan.is_completed());
    assert_eq!(gateway.scans(), vec!["e1".to_string(), "e2".to_string()]);

    let snapshot = store.snapshot().await;
    assert!(snapshot.epics.iter().all(|e| e.status == EpicStatus::Completed));
}

#[tokio::test]
async fn test_epics_without_backlog_are_not_rescanned() {
    let mut initial = state(&["done", "open"], vec![story("d", "done", &[]), story("o", "open", &[])]);
    if let Some(d) = initial.story_mut("d") {
        d.status = StoryStatus::Done;
    }
    let store = StateStore::new(initial);
    let events = EventEmitter::default();
    let gateway = Arc::new(ScriptedGateway::new());

    let report = run(&store, &events, gateway.clone(), &config(1)).await.unwrap();

    assert_eq!(report.epics.len(), 1);
    assert_eq!(gateway.scans(), vec!["open".to_string()]);
}
