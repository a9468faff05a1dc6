//! Trailing debounce for file-change notifications
//!
//! Editors and appending writers produce bursts of change events for the same
//! path. The debouncer coalesces each burst into a single downstream signal,
//! emitted one quiet window after the **last** change for that path. Distinct
//! paths debounce independently. Closing the input channel cancels pending
//! signals without emitting them.
//!
//! Timing is driven entirely by `tokio::time`, so tests run it under the
//! paused clock.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

/// Channel buffer for change inputs and emitted signals
const CHANNEL_BUFFER: usize = 256;

/// Spawn a debouncer task.
///
/// Returns the `on_change` sender and the `signal` receiver. The task exits
/// when the sender side is dropped, discarding any pending signals.
pub fn debouncer(window: Duration) -> (mpsc::Sender<PathBuf>, mpsc::Receiver<PathBuf>) {
    let (change_tx, change_rx) = mpsc::channel(CHANNEL_BUFFER);
    let (signal_tx, signal_rx) = mpsc::channel(CHANNEL_BUFFER);
    tokio::spawn(run(window, change_rx, signal_tx));
    (change_tx, signal_rx)
}

async fn run(
    window: Duration,
    mut change_rx: mpsc::Receiver<PathBuf>,
    signal_tx: mpsc::Sender<PathBuf>,
) {
    let mut deadlines: HashMap<PathBuf, Instant> = HashMap::new();

    loop {
        let next_deadline = deadlines.values().min().copied();

        tokio::select! {
            changed = change_rx.recv() => {
                match changed {
                    Some(path) => {
                        // Trailing debounce: every change pushes the deadline out
                        deadlines.insert(path, Instant::now() + window);
                    }
                    None => {
                        // Shutdown: pending signals are cancelled, not flushed
                        debug!(pending = deadlines.len(), "Debouncer shutting down");
                        return;
                    }
                }
            }
            _ = sleep_until_or_forever(next_deadline) => {
                let now = Instant::now();
                let due: Vec<PathBuf> = deadlines
                    .iter()
                    .filter(|(_, deadline)| **deadline <= now)
                    .map(|(path, _)| path.clone())
                    .collect();
                for path in due {
                    deadlines.remove(&path);
                    if signal_tx.send(path).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

async fn sleep_until_or_forever(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}
