//! Inbound hook events
//!
//! These types define the wire protocol between the event source (a CLI tool
//! emitting lifecycle/tool-usage notifications) and the engine. The event set
//! is closed: an unrecognized `type` tag fails deserialization and is reported
//! as malformed input at the boundary, never dispatched dynamically.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An event as delivered by the source: a session identifier plus a
/// kind-specific payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub session_id: String,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// The closed set of event kinds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// Session came up (or restarted after a terminal phase)
    SessionStart,
    /// Session terminated
    SessionEnd,
    /// User submitted a prompt
    PromptSubmitted { prompt: String },
    /// A tool is about to execute
    ToolAboutToRun {
        tool_name: String,
        #[serde(default)]
        parameters: serde_json::Value,
    },
    /// A tool finished executing
    ToolCompleted {
        tool_name: String,
        #[serde(default)]
        result: serde_json::Value,
    },
    /// The tool needs user approval before it may run
    ApprovalNeeded {
        tool_name: String,
        #[serde(default)]
        parameters: serde_json::Value,
    },
    /// A decision for the pending approval arrived over the event stream
    DecisionReceived { decision: Decision },
    /// Generic informational notification
    Notification { message: String },
    /// The CLI is about to compact its context
    PreCompaction,
    /// The assistant turn ended
    TurnEnded,
}

impl EventEnvelope {
    /// Create an envelope for a session
    pub fn new(session_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            session_id: session_id.into(),
            kind,
        }
    }

    /// Parse an envelope from raw bytes, rejecting unknown event kinds
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::MalformedEvent(e.to_string()))
    }

    /// Create a prompt-submitted event
    pub fn prompt_submitted(session_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::new(
            session_id,
            EventKind::PromptSubmitted {
                prompt: prompt.into(),
            },
        )
    }

    /// Create a tool-about-to-run event
    pub fn tool_about_to_run(
        session_id: impl Into<String>,
        tool_name: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self::new(
            session_id,
            EventKind::ToolAboutToRun {
                tool_name: tool_name.into(),
                parameters,
            },
        )
    }

    /// Create a tool-completed event
    pub fn tool_completed(
        session_id: impl Into<String>,
        tool_name: impl Into<String>,
        result: serde_json::Value,
    ) -> Self {
        Self::new(
            session_id,
            EventKind::ToolCompleted {
                tool_name: tool_name.into(),
                result,
            },
        )
    }

    /// Create an approval-needed event
    pub fn approval_needed(
        session_id: impl Into<String>,
        tool_name: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self::new(
            session_id,
            EventKind::ApprovalNeeded {
                tool_name: tool_name.into(),
                parameters,
            },
        )
    }

    /// Create a decision-received event
    pub fn decision_received(session_id: impl Into<String>, decision: Decision) -> Self {
        Self::new(session_id, EventKind::DecisionReceived { decision })
    }
}

/// An approval decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Deny,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Allow => write!(f, "allow"),
            Decision::Deny => write!(f, "deny"),
        }
    }
}
