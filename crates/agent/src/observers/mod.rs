//! Platform event sources: file, process, network and login observers.
//!
//! Each observer runs on its own thread, emitting typed events into a
//! bounded drop-oldest ring buffer. Observer faults are logged and retried;
//! one observer failing never stops its peers.

pub mod buffer;
pub mod file;
pub mod login;
pub mod network;
pub mod process;

pub use buffer::RingBuffer;
pub use file::FileObserver;
pub use login::LoginObserver;
pub use network::NetworkObserver;
pub use process::ProcessObserver;

use chrono::{DateTime, Utc};
use sentinel_core::ActivityKind;
use serde_json::Value;

/// One raw observation before agent enrichment.
#[derive(Debug, Clone)]
pub struct ObservedEvent {
    pub kind: ActivityKind,
    pub timestamp: DateTime<Utc>,
    /// Kind-specific detail bag, enriched by the aggregator before upload.
    pub details: Value,
}

impl ObservedEvent {
    pub fn new(kind: ActivityKind, details: Value) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            details,
        }
    }
}

/// Contract shared by the four observers.
///
/// `drain` removes what it returns; callers must tolerate zero events.
pub trait Observer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Begin observing. Implementations may be OS-native or polling-based
    /// fallbacks; polling is always acceptable.
    fn start(&self) -> sentinel_core::Result<()>;

    /// Stop observing and join any worker thread.
    fn stop(&self);

    /// Remove and return up to `limit` buffered events.
    fn drain(&self, limit: usize) -> Vec<ObservedEvent>;

    /// Total events observed since start, for the shutdown summary.
    fn observed_total(&self) -> u64;
}
