//! Island Core - Session event correlation and state engine
//!
//! This crate provides the core functionality for tracking interactive agent
//! sessions:
//! - Lifecycle event ingestion and per-session state machines
//! - Request/response correlation for human approvals with timeouts
//! - Incremental transcript reading with debounced file watching
//! - Ordered state-change publication to multiple subscribers

pub mod approval;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod publish;
pub mod session;
pub mod transcript;
pub mod watch;

pub use config::{defaults, EngineConfig};
pub use engine::Engine;
pub use error::{Error, Result};
pub use event::{Decision, EventEnvelope, EventKind};

// Session exports (state machine + registry types)
pub use session::{
    ApprovalResolution, MessageKind, MessageRecord, PendingApproval, RegistryCommand,
    ResolvedApproval, Session, SessionId, SessionPhase, SessionSnapshot, SessionSummary,
    StateChange, StateUpdate, ToolInvocation, ToolStatus,
};

pub use publish::{StatePublisher, Subscription};
pub use transcript::{ReadOutcome, TranscriptRecord, TRANSCRIPT_FILE_NAME};
pub use watch::TranscriptMonitor;
