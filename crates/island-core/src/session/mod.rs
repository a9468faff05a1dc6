//! Session tracking
//!
//! Key pieces:
//!
//! - `Session` (`machine`): one session's finite-state machine; applying an
//!   event yields the state changes it caused
//! - the registry worker (`registry`): the single writer owning all sessions,
//!   fed by one command channel
//! - the shared types (`types`): phases, message records, tool invocations,
//!   approvals, snapshots, and the published `StateChange`s
//!
//! # Architecture
//!
//! ```text
//!  events ──▶ ┌──────────────────────────────┐
//!  decisions ─▶  registry worker (1 task)    │──▶ StatePublisher ──▶ subscribers
//!  timeouts ─▶   HashMap<SessionId, Session> │
//!  transcript ▶ └──────────────────────────────┘
//! ```

pub mod machine;
pub mod registry;
mod types;

pub use machine::Session;
pub use registry::RegistryCommand;
pub use types::{
    ApprovalResolution, MessageKind, MessageRecord, PendingApproval, ResolvedApproval,
    SessionId, SessionPhase, SessionSnapshot, SessionSummary, StateChange, StateUpdate,
    ToolInvocation, ToolStatus,
};
