//! Engine façade
//!
//! Wires the registry worker, approval timers, transcript monitor, and the
//! state publisher into one handle exposing the boundary contracts: event
//! delivery, decision injection, state subscription, and on-demand snapshots.
//! Transports (socket listeners, signal buses, UIs) live outside this crate
//! and talk only to this handle.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::event::{Decision, EventEnvelope};
use crate::publish::{StatePublisher, Subscription};
use crate::session::registry::{self, RegistryCommand};
use crate::session::{SessionId, SessionSnapshot, SessionSummary};
use crate::watch::TranscriptMonitor;

/// The session correlation engine
#[derive(Debug)]
pub struct Engine {
    cmd_tx: mpsc::Sender<RegistryCommand>,
    publisher: StatePublisher,
    monitor: Option<TranscriptMonitor>,
    worker: JoinHandle<()>,
}

impl Engine {
    /// Start the engine.
    ///
    /// Transcript watching starts only when `config.transcript_root` is set.
    /// Must be called within a tokio runtime.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let publisher = StatePublisher::new(config.broadcast_capacity);
        let (cmd_tx, worker) = registry::spawn(config.clone(), publisher.clone());

        let monitor = match &config.transcript_root {
            Some(root) => Some(TranscriptMonitor::spawn(
                root,
                config.debounce_window(),
                cmd_tx.clone(),
            )?),
            None => None,
        };

        Ok(Self {
            cmd_tx,
            publisher,
            monitor,
            worker,
        })
    }

    /// Apply one inbound event
    pub async fn process_event(&self, envelope: EventEnvelope) -> Result<()> {
        self.send(RegistryCommand::Event(envelope)).await
    }

    /// Parse raw bytes and apply the event; unknown kinds are rejected here
    pub async fn process_raw(&self, bytes: &[u8]) -> Result<()> {
        let envelope = EventEnvelope::from_bytes(bytes)?;
        self.process_event(envelope).await
    }

    /// Inject an approval decision from a consumer.
    ///
    /// Legal at any time: a decision for an already-resolved or unknown
    /// correlation is discarded with a warning inside the registry.
    pub async fn send_decision(&self, session_id: impl Into<SessionId>, decision: Decision) -> Result<()> {
        self.send(RegistryCommand::Decision {
            session_id: session_id.into(),
            decision,
        })
        .await
    }

    /// Subscribe to ordered state-change notifications
    pub fn subscribe(&self) -> Subscription {
        self.publisher.subscribe()
    }

    /// Full view of one session, `None` if unknown
    pub async fn snapshot(&self, session_id: impl Into<SessionId>) -> Result<Option<SessionSnapshot>> {
        let (reply, rx) = oneshot::channel();
        self.send(RegistryCommand::Snapshot {
            session_id: session_id.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| Error::EngineShutdown)
    }

    /// Summaries of all live sessions
    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let (reply, rx) = oneshot::channel();
        self.send(RegistryCommand::ListSessions { reply }).await?;
        rx.await.map_err(|_| Error::EngineShutdown)
    }

    /// Stop the engine: the watch stops, pending debounce windows and
    /// approval timers are cancelled, and nothing further is published.
    pub async fn shutdown(self) {
        info!("Engine shutting down");
        drop(self.monitor);
        let _ = self.cmd_tx.send(RegistryCommand::Shutdown).await;
        let _ = self.worker.await;
    }

    async fn send(&self, cmd: RegistryCommand) -> Result<()> {
        self.cmd_tx.send(cmd).await.map_err(|_| Error::EngineShutdown)
    }
}
