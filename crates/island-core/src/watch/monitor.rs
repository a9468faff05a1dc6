//! Transcript file monitoring
//!
//! Watches the transcript root (one directory per session, each holding a
//! `conversation.jsonl`) and turns raw filesystem notifications into
//! debounced `TranscriptChanged` registry commands. The watch callback only
//! forwards paths into a channel; all timing lives in the debouncer and all
//! state in the registry. Existing transcripts found at startup are enqueued
//! as synthetic changes so state rebuilds after a restart.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{recommended_watcher, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::debounce::debouncer;
use crate::error::{Error, Result};
use crate::session::registry::RegistryCommand;
use crate::transcript;

/// Running monitor; dropping it stops the watch and cancels pending signals
#[derive(Debug)]
pub struct TranscriptMonitor {
    _watcher: RecommendedWatcher,
    _forwarder: JoinHandle<()>,
}

impl TranscriptMonitor {
    /// Start watching `root` and routing debounced changes into the registry
    pub fn spawn(
        root: &Path,
        window: Duration,
        cmd_tx: mpsc::Sender<RegistryCommand>,
    ) -> Result<Self> {
        if !root.exists() {
            info!(root = %root.display(), "Creating transcript root");
            std::fs::create_dir_all(root)?;
        }

        let (change_tx, mut signal_rx) = debouncer(window);

        // The notify callback runs on the watcher's own thread
        let watch_tx = change_tx.clone();
        let mut watcher = recommended_watcher(move |result: notify::Result<notify::Event>| {
            match result {
                Ok(event) => {
                    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                        return;
                    }
                    for path in event.paths {
                        if is_transcript(&path) && watch_tx.blocking_send(path).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => warn!(error = %e, "File watcher error"),
            }
        })
        .map_err(|e| Error::Watch(e.to_string()))?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| Error::Watch(e.to_string()))?;
        info!(root = %root.display(), "Transcript monitor started");

        // Debounced signals become registry commands
        let forwarder = tokio::spawn(async move {
            while let Some(path) = signal_rx.recv().await {
                let Some(session_id) = session_id_for(&path) else {
                    debug!(path = %path.display(), "Transcript path without session directory");
                    continue;
                };
                if cmd_tx
                    .send(RegistryCommand::TranscriptChanged { session_id, path })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            debug!("Transcript forwarder stopped");
        });

        scan_existing(root.to_path_buf(), change_tx);

        Ok(Self {
            _watcher: watcher,
            _forwarder: forwarder,
        })
    }
}

/// Whether a path is something the registry should read: the main
/// transcript or a subagent task transcript
fn is_transcript(path: &Path) -> bool {
    transcript::is_conversation_file(path) || transcript::is_task_file(path)
}

/// The session id is the name of the directory containing the transcript
fn session_id_for(path: &Path) -> Option<String> {
    path.parent()?
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
}

/// Enqueue synthetic changes for transcripts that already exist
fn scan_existing(root: PathBuf, change_tx: mpsc::Sender<PathBuf>) {
    tokio::spawn(async move {
        let found = tokio::task::spawn_blocking(move || {
            WalkDir::new(&root)
                .min_depth(2)
                .max_depth(2)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.into_path())
                .filter(|path| is_transcript(path))
                .collect::<Vec<_>>()
        })
        .await
        .unwrap_or_default();

        if !found.is_empty() {
            info!(count = found.len(), "Found existing session transcripts");
        }
        for path in found {
            if change_tx.send(path).await.is_err() {
                break;
            }
        }
    });
}
