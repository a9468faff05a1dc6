//! Approval timeout bookkeeping
//!
//! The pending correlation itself lives on its session; this component only
//! tracks the bounded wait. Opening a correlation arms exactly one timer task
//! which, if it fires, routes a synthetic timed-out resolution back through
//! the registry's command channel — the same path a real decision takes, so
//! first-resolution-wins falls out of the registry's serialization. Resolving
//! aborts the timer; aborting an already-fired timer is harmless.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use crate::session::registry::RegistryCommand;
use crate::session::SessionId;

/// Tracks one live timer per open approval correlation
pub struct ApprovalCorrelator {
    timeout: Duration,
    timers: HashMap<Uuid, JoinHandle<()>>,
    cmd_tx: mpsc::Sender<RegistryCommand>,
}

impl ApprovalCorrelator {
    /// Create a correlator routing timeouts into `cmd_tx`
    pub fn new(timeout: Duration, cmd_tx: mpsc::Sender<RegistryCommand>) -> Self {
        Self {
            timeout,
            timers: HashMap::new(),
            cmd_tx,
        }
    }

    /// Arm the timeout for a newly opened correlation
    pub fn open(&mut self, session_id: &SessionId, correlation_id: Uuid) {
        let timeout = self.timeout;
        let cmd_tx = self.cmd_tx.clone();
        let session_id = session_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            debug!(session = %session_id, %correlation_id, "Approval wait elapsed");
            let _ = cmd_tx
                .send(RegistryCommand::ApprovalTimeout {
                    session_id,
                    correlation_id,
                })
                .await;
        });
        if let Some(stale) = self.timers.insert(correlation_id, handle) {
            // Correlation ids are unique; a collision would leak a timer
            stale.abort();
        }
    }

    /// Cancel the timer for a resolved correlation.
    ///
    /// Idempotent: unknown ids (already resolved, or the timer itself fired)
    /// are a quiet no-op.
    pub fn resolve(&mut self, correlation_id: Uuid) -> bool {
        match self.timers.remove(&correlation_id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => {
                debug!(%correlation_id, "No timer for resolved correlation");
                false
            }
        }
    }

    /// Number of correlations currently waiting
    pub fn open_count(&self) -> usize {
        self.timers.len()
    }

    /// Abort every outstanding timer (engine shutdown)
    pub fn shutdown(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
    }
}

impl Drop for ApprovalCorrelator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
