//! Session types
//!
//! The data model for tracked sessions: execution phases, message history,
//! tool invocations, pending approvals, and the state-change notifications
//! published to subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::Decision;

/// Unique identifier for a session (opaque, assigned by the event source)
pub type SessionId = String;

/// Session execution phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Processing,
    RunningTool,
    WaitingApproval,
    Completed,
    Error,
}

impl SessionPhase {
    /// Terminal phases accept no transitions except an explicit restart
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionPhase::Completed | SessionPhase::Error)
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Processing => "processing",
            SessionPhase::RunningTool => "running_tool",
            SessionPhase::WaitingApproval => "waiting_approval",
            SessionPhase::Completed => "completed",
            SessionPhase::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// The closed set of message kinds in a session history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    User,
    Assistant,
    ToolUse,
    ToolResult,
    Thinking,
}

/// One record in a session's append-only message history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub kind: MessageKind,
    /// Free-form payload as delivered by the transcript or event
    pub payload: serde_json::Value,
    /// Position in the session's history sequence
    pub seq: u64,
}

/// Execution status of a tool invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Running,
    Completed,
}

/// A tool invocation opened by a tool-about-to-run event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    pub parameters: serde_json::Value,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: ToolStatus,
    pub result: Option<serde_json::Value>,
}

impl ToolInvocation {
    /// Open a new running invocation
    pub fn open(name: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            parameters,
            started_at: Utc::now(),
            finished_at: None,
            status: ToolStatus::Running,
            result: None,
        }
    }

    /// Close the invocation with its result
    pub fn close(&mut self, result: serde_json::Value) {
        self.finished_at = Some(Utc::now());
        self.status = ToolStatus::Completed;
        self.result = Some(result);
    }
}

/// The pending half of an approval correlation, owned by its session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingApproval {
    pub correlation_id: Uuid,
    pub tool_name: String,
    pub parameters: serde_json::Value,
    pub requested_at: DateTime<Utc>,
    /// True when no open tool invocation matched the approval request
    pub unmatched: bool,
}

/// Terminal outcome of an approval correlation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApprovalResolution {
    /// A decision arrived before the timeout
    Decided { decision: Decision },
    /// The bounded wait elapsed; treated as a denial
    TimedOut,
}

/// A correlation that reached its terminal outcome, archived on the session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedApproval {
    pub correlation_id: Uuid,
    pub tool_name: String,
    pub resolution: ApprovalResolution,
    pub resolved_at: DateTime<Utc>,
}

/// A state-change notification published to subscribers.
///
/// For a single session these are delivered to every subscriber in the order
/// they were published.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateChange {
    PhaseChanged {
        phase: SessionPhase,
    },
    MessageAppended {
        message: MessageRecord,
    },
    HistoryCleared,
    ToolStarted {
        tool_name: String,
    },
    ToolFinished {
        tool_name: String,
    },
    ApprovalRequested {
        correlation_id: Uuid,
        tool_name: String,
        parameters: serde_json::Value,
        unmatched: bool,
    },
    ApprovalResolved {
        correlation_id: Uuid,
        resolution: ApprovalResolution,
    },
    Diagnostic {
        message: String,
    },
    SessionEvicted,
}

/// A published state update: which session changed, and how
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateUpdate {
    pub session_id: SessionId,
    pub change: StateChange,
}

/// Full view of a session, served on demand
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub phase: SessionPhase,
    pub active_tool: Option<ToolInvocation>,
    pub pending_approval: Option<PendingApproval>,
    pub messages: Vec<MessageRecord>,
    pub approvals: Vec<ResolvedApproval>,
    pub diagnostics: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Compact per-session listing entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub phase: SessionPhase,
    pub active_tool: Option<String>,
    pub has_pending_approval: bool,
    pub message_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_terminal() {
        assert!(SessionPhase::Completed.is_terminal());
        assert!(SessionPhase::Error.is_terminal());
        assert!(!SessionPhase::WaitingApproval.is_terminal());
    }

    #[test]
    fn test_phase_serialization() {
        let json = serde_json::to_string(&SessionPhase::WaitingApproval).unwrap();
        assert_eq!(json, "\"waiting_approval\"");
    }

    #[test]
    fn test_tool_invocation_lifecycle() {
        let mut tool = ToolInvocation::open("Bash", serde_json::json!({"cmd": "ls"}));
        assert_eq!(tool.status, ToolStatus::Running);
        assert!(tool.finished_at.is_none());

        tool.close(serde_json::json!({"exit_code": 0}));
        assert_eq!(tool.status, ToolStatus::Completed);
        assert!(tool.finished_at.is_some());
        assert_eq!(tool.result.as_ref().unwrap()["exit_code"], 0);
    }

    #[test]
    fn test_state_change_serialization() {
        let change = StateChange::ApprovalResolved {
            correlation_id: Uuid::nil(),
            resolution: ApprovalResolution::TimedOut,
        };
        let json = serde_json::to_string(&change).unwrap();
        assert!(json.contains("approval_resolved"));
        assert!(json.contains("timed_out"));
    }
}
