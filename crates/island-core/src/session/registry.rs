//! Session registry actor
//!
//! The registry is the single mutable shared resource of the engine. One
//! worker task owns the session map and serializes every mutation: inbound
//! events, injected decisions, approval timeouts, transcript merges, and the
//! periodic eviction sweep all arrive as commands on one channel, so events
//! for a session apply in the order they were received.
//!
//! The worker never does file I/O itself. A transcript change spawns a
//! blocking read at the session's current offset; the parsed records come
//! back as another command. An in-flight flag per session keeps reads
//! serialized without ever stalling ingestion.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::sync::{mpsc, oneshot};
use tokio::task;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::machine::{self, Session};
use super::types::{
    ApprovalResolution, SessionId, SessionSnapshot, SessionSummary, StateChange,
};
use crate::approval::ApprovalCorrelator;
use crate::config::EngineConfig;
use crate::event::{Decision, EventEnvelope};
use crate::publish::StatePublisher;
use crate::transcript::{self, TranscriptRecord};

/// Commands accepted by the registry worker
#[derive(Debug)]
pub enum RegistryCommand {
    /// Apply one inbound event
    Event(EventEnvelope),
    /// Inject an approval decision from a consumer
    Decision {
        session_id: SessionId,
        decision: Decision,
    },
    /// A debounced change signal for a session's transcript file
    TranscriptChanged {
        session_id: SessionId,
        path: PathBuf,
    },
    /// Result of a background transcript read
    TranscriptRecords {
        session_id: SessionId,
        path: PathBuf,
        records: Vec<TranscriptRecord>,
        new_offset: u64,
        cleared: bool,
    },
    /// An approval wait elapsed without a decision
    ApprovalTimeout {
        session_id: SessionId,
        correlation_id: Uuid,
    },
    /// Full view of one session
    Snapshot {
        session_id: SessionId,
        reply: oneshot::Sender<Option<SessionSnapshot>>,
    },
    /// Summaries of all live sessions
    ListSessions {
        reply: oneshot::Sender<Vec<SessionSummary>>,
    },
    /// Stop the worker, cancelling all approval timers
    Shutdown,
}

/// Spawn the registry worker.
///
/// Returns the command sender; the worker exits (cancelling all approval
/// timers) when every sender is dropped.
pub fn spawn(
    config: EngineConfig,
    publisher: StatePublisher,
) -> (mpsc::Sender<RegistryCommand>, task::JoinHandle<()>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(config.command_buffer);
    let worker = RegistryWorker::new(config, publisher, cmd_tx.clone());
    let handle = tokio::spawn(worker.run(cmd_rx));
    (cmd_tx, handle)
}

struct RegistryWorker {
    sessions: HashMap<SessionId, Session>,
    correlator: ApprovalCorrelator,
    publisher: StatePublisher,
    /// Cloned into background read tasks so results route back here
    cmd_tx: mpsc::Sender<RegistryCommand>,
    config: EngineConfig,
}

impl RegistryWorker {
    fn new(
        config: EngineConfig,
        publisher: StatePublisher,
        cmd_tx: mpsc::Sender<RegistryCommand>,
    ) -> Self {
        Self {
            sessions: HashMap::new(),
            correlator: ApprovalCorrelator::new(config.approval_timeout(), cmd_tx.clone()),
            publisher,
            cmd_tx,
            config,
        }
    }

    async fn run(mut self, mut cmd_rx: mpsc::Receiver<RegistryCommand>) {
        info!("Session registry started");
        let mut sweep = tokio::time::interval(self.config.eviction_sweep());
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        sweep.reset(); // skip the immediate first tick

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(RegistryCommand::Shutdown) | None => break,
                        Some(cmd) => self.handle(cmd),
                    }
                }
                _ = sweep.tick() => self.evict_idle(),
            }
        }

        self.correlator.shutdown();
        info!("Session registry stopped");
    }

    fn handle(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Event(envelope) => self.apply_event(envelope),
            RegistryCommand::Decision { session_id, decision } => {
                self.resolve(&session_id, None, ApprovalResolution::Decided { decision });
            }
            RegistryCommand::ApprovalTimeout { session_id, correlation_id } => {
                self.resolve(&session_id, Some(correlation_id), ApprovalResolution::TimedOut);
            }
            RegistryCommand::TranscriptChanged { session_id, path } => {
                self.transcript_changed(session_id, path);
            }
            RegistryCommand::TranscriptRecords {
                session_id,
                path,
                records,
                new_offset,
                cleared,
            } => {
                self.merge_transcript(session_id, path, records, new_offset, cleared);
            }
            RegistryCommand::Snapshot { session_id, reply } => {
                let snapshot = self.sessions.get(&session_id).map(|s| s.snapshot());
                let _ = reply.send(snapshot);
            }
            RegistryCommand::ListSessions { reply } => {
                let summaries = self.sessions.values().map(|s| s.summary()).collect();
                let _ = reply.send(summaries);
            }
            // Handled by the run loop
            RegistryCommand::Shutdown => {}
        }
    }

    /// Sessions are created on first reference to an unknown identifier
    fn session_mut(&mut self, session_id: &SessionId) -> &mut Session {
        self.sessions.entry(session_id.clone()).or_insert_with(|| {
            info!(session = machine::id_prefix(session_id), "Created session");
            Session::new(session_id.clone())
        })
    }

    fn apply_event(&mut self, envelope: EventEnvelope) {
        if envelope.session_id.is_empty() {
            warn!("Event missing session id discarded");
            return;
        }
        let session = self.session_mut(&envelope.session_id);
        let changes = session.apply(&envelope.kind);
        self.react_and_publish(&envelope.session_id, changes);
    }

    fn resolve(
        &mut self,
        session_id: &SessionId,
        correlation_id: Option<Uuid>,
        resolution: ApprovalResolution,
    ) {
        let Some(session) = self.sessions.get_mut(session_id) else {
            warn!(session = %session_id, "Decision for unknown session discarded");
            return;
        };
        // A timeout only resolves the correlation it was armed for; a stale
        // firing after a decision-and-reopen must not touch the new one.
        if let Some(id) = correlation_id {
            if session.pending_correlation_id() != Some(id) {
                debug!(session = %session_id, "Stale approval timeout ignored");
                return;
            }
        }
        session.touch();
        let changes = session.resolve_approval(resolution);
        self.react_and_publish(session_id, changes);
    }

    /// Publish changes and drive approval timer bookkeeping off them
    fn react_and_publish(&mut self, session_id: &SessionId, changes: Vec<StateChange>) {
        for change in changes {
            match &change {
                StateChange::ApprovalRequested { correlation_id, .. } => {
                    self.correlator.open(session_id, *correlation_id);
                }
                StateChange::ApprovalResolved { correlation_id, .. } => {
                    self.correlator.resolve(*correlation_id);
                }
                _ => {}
            }
            self.publisher.publish(session_id, change);
        }
    }

    fn transcript_changed(&mut self, session_id: SessionId, path: PathBuf) {
        let session = self.session_mut(&session_id);
        if session.read_in_flight {
            // Coalesce: reads stay serialized per session
            session.queue_read(path);
            return;
        }
        session.read_in_flight = true;
        let offset = session.transcript_offset(&path);
        spawn_read(self.cmd_tx.clone(), session_id, path, offset);
    }

    fn merge_transcript(
        &mut self,
        session_id: SessionId,
        path: PathBuf,
        records: Vec<TranscriptRecord>,
        new_offset: u64,
        cleared: bool,
    ) {
        let session = self.session_mut(&session_id);
        session.read_in_flight = false;
        session.touch();

        let mut changes = Vec::new();
        if cleared {
            info!(session = %session_id, "Clear command detected; history truncated");
            session.clear_history(&mut changes);
        }
        for record in records {
            session.append_message(record.kind, record.payload, &mut changes);
        }
        session.set_transcript_offset(&path, new_offset);

        if let Some(next) = session.next_queued_read() {
            session.read_in_flight = true;
            let offset = session.transcript_offset(&next);
            spawn_read(self.cmd_tx.clone(), session_id.clone(), next, offset);
        }

        self.react_and_publish(&session_id, changes);
    }

    /// Bound registry memory: drop sessions idle past the configured period
    fn evict_idle(&mut self) {
        let period = self.config.idle_eviction();
        let expired: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.idle_longer_than(period) && !s.read_in_flight)
            .map(|(id, _)| id.clone())
            .collect();

        for session_id in expired {
            if let Some(session) = self.sessions.remove(&session_id) {
                info!(session = %session_id, phase = %session.phase, "Evicting idle session");
                if let Some(id) = session.pending_correlation_id() {
                    self.correlator.resolve(id);
                }
                self.publisher.publish(&session_id, StateChange::SessionEvicted);
            }
        }
    }
}

/// Read new transcript records off the worker thread pool and send them back
fn spawn_read(
    cmd_tx: mpsc::Sender<RegistryCommand>,
    session_id: SessionId,
    path: PathBuf,
    offset: u64,
) {
    tokio::spawn(async move {
        let read_path = path.clone();
        let result = task::spawn_blocking(move || transcript::read_new(&read_path, offset)).await;

        // The /clear command only lives in the main conversation; task
        // transcripts never truncate history
        let scan_for_clear = transcript::is_conversation_file(&path);
        let (records, new_offset, cleared) = match result {
            Ok(Ok(outcome)) if scan_for_clear => {
                let (records, cleared) = transcript::split_after_clear(outcome.records);
                (records, outcome.new_offset, cleared)
            }
            Ok(Ok(outcome)) => (outcome.records, outcome.new_offset, false),
            Ok(Err(e)) => {
                // Transient: retried on the next change signal
                warn!(session = %session_id, error = %e, "Transcript read failed");
                (Vec::new(), offset, false)
            }
            Err(e) => {
                warn!(session = %session_id, error = %e, "Transcript read task panicked");
                (Vec::new(), offset, false)
            }
        };

        let _ = cmd_tx
            .send(RegistryCommand::TranscriptRecords {
                session_id,
                path,
                records,
                new_offset,
                cleared,
            })
            .await;
    });
}
