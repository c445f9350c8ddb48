use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Re-export async trait for convenience
pub use async_trait::async_trait;

/// Agent roles the orchestrator can call through the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Coder,
    Tester,
    Security,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Coder => "coder",
            AgentKind::Tester => "tester",
            AgentKind::Security => "security",
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action names understood by the agents
pub mod actions {
    pub const IMPLEMENT_STORY: &str = "implement_story";
    pub const TEST_STORY: &str = "test_story";
    pub const SCAN_EPIC: &str = "scan_epic";
}

/// Errors raised by a gateway invocation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("{kind} agent failed: {message}")]
    Failed { kind: AgentKind, message: String },

    #[error("{kind} agent timed out after {secs}s")]
    Timeout { kind: AgentKind, secs: u64 },

    #[error("failed to start {kind} agent: {message}")]
    Spawn { kind: AgentKind, message: String },

    #[error("{kind} agent returned a malformed result: {message}")]
    MalformedResult { kind: AgentKind, message: String },
}

impl GatewayError {
    pub fn failed(kind: AgentKind, message: impl Into<String>) -> Self {
        GatewayError::Failed {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> AgentKind {
        match self {
            GatewayError::Failed { kind, .. }
            | GatewayError::Timeout { kind, .. }
            | GatewayError::Spawn { kind, .. }
            | GatewayError::MalformedResult { kind, .. } => *kind,
        }
    }
}

/// The single call boundary used to run coder, tester and security work.
///
/// Implementations may be network or process bound. The orchestrator never
/// inspects how an agent works, only the JSON it returns.
#[async_trait]
pub trait AgentGateway: Send + Sync {
    async fn invoke(
        &self,
        kind: AgentKind,
        action: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, GatewayError>;
}

/// Result of one tester invocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub passed: u32,
    pub failed: u32,
    pub total: u32,
}

impl TestResult {
    pub fn new(passed: u32, failed: u32, total: u32) -> Self {
        Self {
            passed,
            failed,
            total,
        }
    }

    /// Decode the tester's JSON result
    pub fn from_value(value: serde_json::Value) -> Result<Self, GatewayError> {
        serde_json::from_value(value).map_err(|e| GatewayError::MalformedResult {
            kind: AgentKind::Tester,
            message: e.to_string(),
        })
    }
}

// ============================================================================
// Workflow events
// ============================================================================

/// Phase of a single code/test iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    Coding,
    Testing,
}

/// How a story left the code/test loop.
///
/// `PassedWithKnownFailures` only appears when the exhaustion policy marks
/// stories done after the retry budget ran out; it is never a verified pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryOutcome {
    Passed,
    PassedWithKnownFailures,
    Failed,
}

/// Why a story could not start at all
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    /// The dependency ended in `error` during this epic
    DependencyFailed,
    /// No story with that id exists
    UnknownDependency,
    /// The dependency belongs to another epic and is not done
    CrossEpic { epic_id: String },
    /// The dependency is itself waiting on this story (directly or transitively)
    Cycle,
    /// The dependency could never start either
    DependencyBlocked,
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockReason::DependencyFailed => write!(f, "dependency failed"),
            BlockReason::UnknownDependency => write!(f, "dependency does not exist"),
            BlockReason::CrossEpic { epic_id } => {
                write!(f, "dependency belongs to epic {} and is not done", epic_id)
            }
            BlockReason::Cycle => write!(f, "dependency cycle"),
            BlockReason::DependencyBlocked => write!(f, "dependency is blocked"),
        }
    }
}

/// Cause carried by a `story:error` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoryErrorCause {
    RetriesExhausted {
        attempts: u32,
        last_failure: Option<String>,
    },
    DependencyUnsatisfiable {
        dependency: String,
        reason: BlockReason,
    },
    RunnerPanicked {
        message: String,
    },
}

impl std::fmt::Display for StoryErrorCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoryErrorCause::RetriesExhausted {
                attempts,
                last_failure,
            } => match last_failure {
                Some(failure) => write!(f, "gave up after {} attempts: {}", attempts, failure),
                None => write!(f, "gave up after {} attempts", attempts),
            },
            StoryErrorCause::DependencyUnsatisfiable { dependency, reason } => {
                write!(f, "blocked on {}: {}", dependency, reason)
            }
            StoryErrorCause::RunnerPanicked { message } => {
                write!(f, "runner panicked: {}", message)
            }
        }
    }
}

/// Outcome of the per-epic security scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScanOutcome {
    Completed { report: serde_json::Value },
    Failed { error: String },
}

impl ScanOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, ScanOutcome::Completed { .. })
    }
}

/// Lifecycle events produced by the orchestrator.
///
/// The set is closed; observers can match exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    EpicStarted {
        epic_id: String,
        title: String,
        story_count: usize,
    },
    StoryStarted {
        epic_id: String,
        story_id: String,
        title: String,
    },
    StoryLoopIteration {
        story_id: String,
        phase: LoopPhase,
        attempt: u32,
        max_attempts: u32,
    },
    StoryCompleted {
        story_id: String,
        outcome: StoryOutcome,
        attempts: u32,
    },
    StoryError {
        story_id: String,
        cause: StoryErrorCause,
    },
    EpicCompleted {
        epic_id: String,
        completed: Vec<String>,
        errored: Vec<String>,
        blocked: Vec<String>,
        scan: ScanOutcome,
    },
}

impl WorkflowEvent {
    /// Wire name of the event kind
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowEvent::EpicStarted { .. } => "epic:started",
            WorkflowEvent::StoryStarted { .. } => "story:started",
            WorkflowEvent::StoryLoopIteration { .. } => "story:loop-iteration",
            WorkflowEvent::StoryCompleted { .. } => "story:completed",
            WorkflowEvent::StoryError { .. } => "story:error",
            WorkflowEvent::EpicCompleted { .. } => "epic:completed",
        }
    }

    /// Story the event refers to, if any
    pub fn story_id(&self) -> Option<&str> {
        match self {
            WorkflowEvent::StoryStarted { story_id, .. }
            | WorkflowEvent::StoryLoopIteration { story_id, .. }
            | WorkflowEvent::StoryCompleted { story_id, .. }
            | WorkflowEvent::StoryError { story_id, .. } => Some(story_id),
            WorkflowEvent::EpicStarted { .. } | WorkflowEvent::EpicCompleted { .. } => None,
        }
    }
}

/// An event stamped with its position in the stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub seq: u64,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: WorkflowEvent,
}

/// Prefix used when events cross a process boundary on stderr
pub const EVENT_LINE_PREFIX: &str = "__SF_EVENT__:";

impl EventRecord {
    /// Emit this record to stderr for machine parsing
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            use std::io::Write;
            eprintln!("{}{}", EVENT_LINE_PREFIX, json);
            // Force flush stderr in async/concurrent contexts
            let _ = std::io::stderr().flush();
        }
    }

    /// Parse a line previously written by [`EventRecord::emit`]
    pub fn parse_line(line: &str) -> Option<Self> {
        let json = line.strip_prefix(EVENT_LINE_PREFIX)?;
        serde_json::from_str(json).ok()
    }
}
