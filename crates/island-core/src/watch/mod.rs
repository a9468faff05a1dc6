//! Filesystem watching: raw change events, debounced per path, routed to the
//! session registry.

pub mod debounce;
pub mod monitor;

pub use debounce::debouncer;
pub use monitor::TranscriptMonitor;
