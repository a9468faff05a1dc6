//! Engine configuration
//!
//! All tunables for the correlation engine live here: the debounce quiet
//! window, the approval timeout, publisher capacity, and the idle eviction
//! policy that bounds registry memory.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default values for engine configuration
pub mod defaults {
    /// Quiet window for transcript change debouncing, in milliseconds
    pub const DEBOUNCE_WINDOW_MS: u64 = 100;

    /// How long an approval correlation waits for a decision, in seconds
    pub const APPROVAL_TIMEOUT_SECS: u64 = 300;

    /// Ring capacity of the state-change broadcast channel
    pub const BROADCAST_CAPACITY: usize = 256;

    /// Buffer of the registry command channel
    pub const COMMAND_BUFFER: usize = 256;

    /// Sessions idle longer than this are evicted, in seconds
    pub const IDLE_EVICTION_SECS: u64 = 3600;

    /// Interval between eviction sweeps, in seconds
    pub const EVICTION_SWEEP_SECS: u64 = 60;
}

/// Configuration for the correlation engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Quiet window for transcript change debouncing (ms)
    pub debounce_window_ms: u64,
    /// Approval wait before a correlation resolves as denied-by-timeout (s)
    pub approval_timeout_secs: u64,
    /// Capacity of the broadcast ring shared by all subscribers
    pub broadcast_capacity: usize,
    /// Buffer of the registry command channel (the ingestion path)
    pub command_buffer: usize,
    /// Idle period after which a session is evicted (s)
    pub idle_eviction_secs: u64,
    /// Interval between eviction sweeps (s)
    pub eviction_sweep_secs: u64,
    /// Root directory containing one transcript directory per session.
    /// `None` disables file watching entirely (events only).
    pub transcript_root: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce_window_ms: defaults::DEBOUNCE_WINDOW_MS,
            approval_timeout_secs: defaults::APPROVAL_TIMEOUT_SECS,
            broadcast_capacity: defaults::BROADCAST_CAPACITY,
            command_buffer: defaults::COMMAND_BUFFER,
            idle_eviction_secs: defaults::IDLE_EVICTION_SECS,
            eviction_sweep_secs: defaults::EVICTION_SWEEP_SECS,
            transcript_root: None,
        }
    }
}

impl EngineConfig {
    /// Create a config with defaults and no transcript watching
    pub fn new() -> Self {
        Self::default()
    }

    /// The conventional transcript root: `~/.claude/sessions`
    pub fn default_transcript_root() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".claude").join("sessions"))
    }

    /// Set the transcript root directory to watch
    pub fn with_transcript_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.transcript_root = Some(root.into());
        self
    }

    /// Set the debounce quiet window
    pub fn with_debounce_window(mut self, window: Duration) -> Self {
        self.debounce_window_ms = window.as_millis() as u64;
        self
    }

    /// Set the approval timeout
    pub fn with_approval_timeout(mut self, timeout: Duration) -> Self {
        self.approval_timeout_secs = timeout.as_secs();
        self
    }

    /// Set the broadcast ring capacity
    pub fn with_broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity;
        self
    }

    /// Set the idle eviction period
    pub fn with_idle_eviction(mut self, period: Duration) -> Self {
        self.idle_eviction_secs = period.as_secs();
        self
    }

    /// Debounce window as a `Duration`
    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_window_ms)
    }

    /// Approval timeout as a `Duration`
    pub fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.approval_timeout_secs)
    }

    /// Idle eviction period as a `Duration`
    pub fn idle_eviction(&self) -> Duration {
        Duration::from_secs(self.idle_eviction_secs)
    }

    /// Eviction sweep interval as a `Duration`
    pub fn eviction_sweep(&self) -> Duration {
        Duration::from_secs(self.eviction_sweep_secs)
    }

    /// Reject values the channel and timer primitives cannot accept
    pub fn validate(&self) -> Result<()> {
        if self.broadcast_capacity == 0 {
            return Err(Error::Config("broadcast_capacity must be at least 1".into()));
        }
        if self.command_buffer == 0 {
            return Err(Error::Config("command_buffer must be at least 1".into()));
        }
        if self.eviction_sweep_secs == 0 {
            return Err(Error::Config("eviction_sweep_secs must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.debounce_window_ms, 100);
        assert_eq!(config.approval_timeout_secs, 300);
        assert_eq!(config.broadcast_capacity, 256);
        assert!(config.transcript_root.is_none());
    }

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::new()
            .with_transcript_root("/tmp/sessions")
            .with_debounce_window(Duration::from_millis(50))
            .with_approval_timeout(Duration::from_secs(10));

        assert_eq!(config.transcript_root, Some(PathBuf::from("/tmp/sessions")));
        assert_eq!(config.debounce_window(), Duration::from_millis(50));
        assert_eq!(config.approval_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_config_validate_rejects_zero_capacities() {
        assert!(EngineConfig::default().validate().is_ok());

        let config = EngineConfig::default().with_broadcast_capacity(0);
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = EngineConfig::default();
        config.command_buffer = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = EngineConfig::default();
        config.eviction_sweep_secs = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_config_deserialize_partial() {
        let config: EngineConfig = serde_json::from_str(r#"{"approval_timeout_secs": 30}"#).unwrap();
        assert_eq!(config.approval_timeout_secs, 30);
        // Everything else falls back to defaults
        assert_eq!(config.debounce_window_ms, defaults::DEBOUNCE_WINDOW_MS);
    }
}
