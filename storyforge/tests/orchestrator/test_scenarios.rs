//! End-to-end scheduling scenarios over the development loop

use super::common::*;
use std::sync::Arc;
use std::time::Duration;
use storyforge::events::EventEmitter;
use storyforge::model::{EpicStatus, StoryStatus};
use storyforge::state::StateStore;
use storyforge_sdk::{AgentKind, StoryOutcome, WorkflowEvent};

// ============================================================================
// Independent stories
// ============================================================================

#[tokio::test]
async fn test_independent_stories_launch_together_and_scan_once() {
    let store = StateStore::new(state(
        &["auth"],
        vec![
            story("a1", "auth", &[]),
            story("a2", "auth", &[]),
            story("a3", "auth", &[]),
        ],
    ));
    let events = EventEmitter::default();
    let gateway = Arc::new(
        ScriptedGateway::new()
            .latency(Duration::from_millis(20))
            .observe(store.clone()),
    );

    let report = run(&store, &events, gateway.clone(), &config(3)).await.unwrap();

    let epic = &report.epics[0];
    assert_eq!(epic.completed.len(), 3);
    assert!(epic.errored.is_empty());
    assert_eq!(epic.peak_concurrency, 3);
    assert!(epic.scan.is_completed());

    // All three coder calls precede any tester call
    let calls = gateway.calls();
    assert!(calls[..3].iter().all(|c| c.kind == AgentKind::Coder));

    // The single scan comes after every story call
    assert_eq!(gateway.scans(), vec!["auth".to_string()]);
    assert_eq!(calls.last().unwrap().kind, AgentKind::Security);

    let snapshot = store.snapshot().await;
    assert!(snapshot.stories.iter().all(|s| s.status == StoryStatus::Done && s.progress == 100));
    assert_eq!(snapshot.epics[0].status, EpicStatus::Completed);
}

// ============================================================================
// Dependencies
// ============================================================================

#[tokio::test]
async fn test_dependent_story_starts_after_dependency_is_done() {
    let store = StateStore::new(state(
        &["auth"],
        vec![story("b", "auth", &["a"]), story("a", "auth", &[])],
    ));
    let events = EventEmitter::default();
    let gateway = Arc::new(ScriptedGateway::new().script("a", vec![fail(), fail(), pass()]));

    let report = run(&store, &events, gateway.clone(), &config(3)).await.unwrap();
    assert_eq!(report.epics[0].completed, vec!["a".to_string(), "b".to_string()]);

    let history = events.history();
    let a_done = seq_of(&history, story_completed("a")).unwrap();
    let b_started = seq_of(&history, story_started("b")).unwrap();
    assert!(b_started > a_done);

    assert!(history.iter().any(|r| matches!(
        &r.event,
        WorkflowEvent::StoryCompleted { story_id, outcome: StoryOutcome::Passed, attempts: 3 }
            if story_id == "a"
    )));

    // No call for b until every call for a returned
    let calls = gateway.calls();
    let last_a = calls.iter().rposition(|c| c.story.as_deref() == Some("a")).unwrap();
    let first_b = calls.iter().position(|c| c.story.as_deref() == Some("b")).unwrap();
    assert!(first_b > last_a);
}

// ============================================================================
// Retry budget
// ============================================================================

#[tokio::test]
async fn test_failing_story_stops_after_retry_budget() {
    let store = StateStore::new(state(&["auth"], vec![story("a", "auth", &[])]));
    let events = EventEmitter::default();
    let gateway = Arc::new(ScriptedGateway::new().script("a", vec![fail(), fail(), fail(), pass()]));

    let report = run(&store, &events, gateway.clone(), &config(3)).await.unwrap();

    assert_eq!(gateway.calls_for("a", AgentKind::Coder), 3);
    assert_eq!(gateway.calls_for("a", AgentKind::Tester), 3);
    assert_eq!(report.epics[0].errored, vec!["a".to_string()]);
    assert!(report.has_failures());
    assert_eq!(store.story("a").await.unwrap().status, StoryStatus::Error);

    let iterations = events
        .history()
        .iter()
        .filter(|r| r.event.kind() == "story:loop-iteration")
        .count();
    assert_eq!(iterations, 6);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_stop_during_second_epic_skips_the_third() {
    let store = StateStore::new(state(
        &["e1", "e2", "e3"],
        vec![
            story("e1-a", "e1", &[]),
            story("e2-a", "e2", &[]),
            story("e2-b", "e2", &[]),
            story("e3-a", "e3", &[]),
        ],
    ));
    let events = EventEmitter::default();
    let gateway = Arc::new(
        ScriptedGateway::new()
            .latency(Duration::from_millis(20))
            .stop_on(AgentKind::Coder, "e2-b", store.stop_handle()),
    );

    let stop = run(&store, &events, gateway.clone(), &config(3)).await.unwrap_err();

    assert_eq!(stop.epic_id.as_deref(), Some("e2"));
    assert_eq!(stop.finished.len(), 1);
    assert_eq!(stop.finished[0].epic_id, "e1");

    // Epic 3 never started and epic 2 was never scanned
    let history = events.history();
    assert!(seq_of(&history, epic_started("e3")).is_none());
    assert!(seq_of(&history, epic_completed("e2")).is_none());
    assert_eq!(gateway.scans(), vec!["e1".to_string()]);
    assert!(gateway.calls().iter().all(|c| c.epic.as_deref() != Some("e3")));

    // In-flight coder calls finished, but no tester call followed
    assert_eq!(gateway.calls_for("e2-a", AgentKind::Tester), 0);
    assert_eq!(gateway.calls_for("e2-b", AgentKind::Tester), 0);

    let snapshot = store.snapshot().await;
    assert!(snapshot.stopping);
    for id in ["e2-a", "e2-b", "e3-a"] {
        let story = snapshot.story(id).unwrap();
        assert_eq!(story.status, StoryStatus::Backlog, "{}", id);
        assert_eq!(story.progress, 0);
    }
    assert_eq!(snapshot.epic("e3").unwrap().status, EpicStatus::Pending);
}

// ============================================================================
// Concurrency cap
// ============================================================================

#[tokio::test]
async fn test_concurrency_cap_is_never_exceeded() {
    let stories = (1..=5).map(|i| story(&format!("s{}", i), "bulk", &[])).collect();
    let store = StateStore::new(state(&["bulk"], stories));
    let events = EventEmitter::default();
    let gateway = Arc::new(
        ScriptedGateway::new()
            .latency(Duration::from_millis(15))
            .observe(store.clone()),
    );

    let report = run(&store, &events, gateway.clone(), &config(3)).await.unwrap();

    assert_eq!(report.epics[0].completed.len(), 5);
    assert_eq!(report.epics[0].peak_concurrency, 3);
    assert!(gateway.peak_in_flight() <= 3);
    assert!(gateway.peak_active() <= 3);
    assert!(gateway.peak_active() >= 2);
}

#[tokio::test]
async fn test_reported_peak_matches_observed_under_staggered_finishes() {
    let latencies = [5, 40, 12, 25, 8, 30, 18, 3];
    let stories = (0..latencies.len())
        .map(|i| story(&format!("s{}", i), "bulk", &[]))
        .collect();
    let store = StateStore::new(state(&["bulk"], stories));
    let events = EventEmitter::default();
    let gateway = latencies
        .iter()
        .enumerate()
        .fold(ScriptedGateway::new(), |gateway, (i, ms)| {
            gateway.latency_for(&format!("s{}", i), Duration::from_millis(*ms))
        })
        .observe(store.clone());
    let gateway = Arc::new(gateway);

    let report = run(&store, &events, gateway.clone(), &config(3)).await.unwrap();
    let epic = &report.epics[0];

    assert_eq!(epic.completed.len(), latencies.len());
    assert!(epic.peak_concurrency <= 3);
    assert_eq!(epic.peak_concurrency, gateway.peak_in_flight());
    assert!(gateway.peak_active() <= 3);
}

// ============================================================================
// Epic ordering
// ============================================================================

#[tokio::test]
async fn test_next_epic_waits_for_previous_scan() {
    let store = StateStore::new(state(
        &["e1", "e2"],
        vec![
            story("e1-a", "e1", &[]),
            story("e1-b", "e1", &[]),
            story("e2-a", "e2", &[]),
            story("e2-b", "e2", &[]),
        ],
    ));
    let events = EventEmitter::default();
    let gateway = Arc::new(
        ScriptedGateway::new()
            .script("e1-b", vec![fail(), pass()])
            .observe(store.clone()),
    );

    run(&store, &events, gateway.clone(), &config(2)).await.unwrap();

    let calls = gateway.calls();
    let e1_scan = calls
        .iter()
        .position(|c| c.kind == AgentKind::Security && c.epic.as_deref() == Some("e1"))
        .unwrap();
    let first_e2 = calls
        .iter()
        .position(|c| c.kind != AgentKind::Security && c.epic.as_deref() == Some("e2"))
        .unwrap();
    assert!(first_e2 > e1_scan);
    assert_eq!(gateway.mixed_epic_samples(), 0);

    let history = events.history();
    assert!(
        seq_of(&history, story_started("e2-a")).unwrap()
            > seq_of(&history, epic_completed("e1")).unwrap()
    );
}
