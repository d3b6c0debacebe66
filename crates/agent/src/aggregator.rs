//! Agent aggregator: the sole consumer of observer output.
//!
//! Two independent cadences drive it. The activity poll drains every
//! observer into an in-memory send queue, enriching each event with stable
//! endpoint metadata (user id, device identity, local hour, off-hours
//! flag). The upload tick flushes the queue to the ingest endpoint one
//! event at a time with a short inter-send delay to smooth load.
//!
//! When transport fails, events land in a bounded offline queue (oldest
//! evicted at capacity) which is drained ahead of new events on the next
//! successful round.

use crate::config::AgentConfig;
use crate::observers::{ObservedEvent, Observer};
use crate::transport::{SendOutcome, Transport};
use chrono::{Local, Timelike};
use sentinel_core::utils::is_off_hours;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use sysinfo::System;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Offline queue bound; beyond it the oldest event is evicted.
const OFFLINE_QUEUE_CAP: usize = 1_000;
/// Pause between consecutive uploads in one flush round.
const INTER_SEND_DELAY: std::time::Duration = std::time::Duration::from_millis(50);

/// Counters reported in the shutdown summary.
#[derive(Debug, Default)]
pub struct AggregatorStats {
    pub collected: AtomicU64,
    pub sent: AtomicU64,
    pub rejected: AtomicU64,
    pub queued_offline: AtomicU64,
    pub alerts_received: AtomicU64,
}

/// Stable endpoint identity attached to every event.
#[derive(Debug, Clone)]
pub struct EndpointIdentity {
    pub host_name: String,
    pub system_name: String,
}

impl EndpointIdentity {
    pub fn detect() -> Self {
        let host_name = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown-host".to_string());
        let system_name = System::long_os_version().unwrap_or_else(|| {
            System::name().unwrap_or_else(|| std::env::consts::OS.to_string())
        });
        Self {
            host_name,
            system_name,
        }
    }

    pub fn device_id(&self) -> String {
        format!("{}::{}", self.host_name, self.system_name)
    }
}

pub struct Aggregator {
    config: AgentConfig,
    identity: EndpointIdentity,
    observers: Vec<Box<dyn Observer>>,
    transport: Transport,
    send_queue: Mutex<VecDeque<Value>>,
    offline_queue: Mutex<VecDeque<Value>>,
    pub stats: Arc<AggregatorStats>,
}

impl Aggregator {
    pub fn new(
        config: AgentConfig,
        observers: Vec<Box<dyn Observer>>,
        transport: Transport,
    ) -> Self {
        Self {
            identity: EndpointIdentity::detect(),
            config,
            observers,
            transport,
            send_queue: Mutex::new(VecDeque::new()),
            offline_queue: Mutex::new(VecDeque::new()),
            stats: Arc::new(AggregatorStats::default()),
        }
    }

    pub fn start_observers(&self) {
        for observer in &self.observers {
            match observer.start() {
                Ok(()) => info!("{} observer started", observer.name()),
                // An observer failure must not stop its peers.
                Err(e) => warn!("{} observer failed to start: {e}", observer.name()),
            }
        }
    }

    pub fn stop_observers(&self) {
        for observer in &self.observers {
            observer.stop();
        }
    }

    /// One activity-poll tick: drain every observer into the send queue.
    pub async fn poll_observers(&self) {
        let mut collected = 0u64;
        let mut queue = self.send_queue.lock().await;
        for observer in &self.observers {
            for event in observer.drain(self.config.send_batch_size) {
                queue.push_back(self.enrich(event));
                collected += 1;
            }
        }
        drop(queue);
        if collected > 0 {
            self.stats.collected.fetch_add(collected, Ordering::Relaxed);
            debug!("Collected {collected} events from observers");
        }
    }

    /// One upload tick: offline backlog first, then fresh events.
    pub async fn flush(&self) {
        let backlog: Vec<Value> = {
            let mut offline = self.offline_queue.lock().await;
            offline.drain(..).collect()
        };
        let fresh: Vec<Value> = {
            let mut queue = self.send_queue.lock().await;
            queue.drain(..).collect()
        };

        for payload in backlog.into_iter().chain(fresh) {
            match self.transport.send_activity(&payload).await {
                Ok(SendOutcome::Delivered(ack)) => {
                    self.stats.sent.fetch_add(1, Ordering::Relaxed);
                    if ack.get("alert").map(|a| !a.is_null()).unwrap_or(false) {
                        self.stats.alerts_received.fetch_add(1, Ordering::Relaxed);
                        info!(
                            "Server raised an alert: {}",
                            ack["alert"]["explanation"].as_str().unwrap_or("(no detail)")
                        );
                    }
                }
                Ok(SendOutcome::Rejected(status)) => {
                    // Fatal for this event only.
                    self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                    warn!("Event rejected with {status}, dropping it");
                }
                Err(e) => {
                    warn!("Transport failed, queueing event offline: {e}");
                    self.queue_offline(payload).await;
                }
            }
            tokio::time::sleep(INTER_SEND_DELAY).await;
        }
    }

    async fn queue_offline(&self, payload: Value) {
        let mut offline = self.offline_queue.lock().await;
        if offline.len() >= OFFLINE_QUEUE_CAP {
            offline.pop_front();
        }
        offline.push_back(payload);
        self.stats
            .queued_offline
            .store(offline.len() as u64, Ordering::Relaxed);
    }

    pub async fn offline_backlog(&self) -> usize {
        self.offline_queue.lock().await.len()
    }

    /// Wrap an observed event in the wire shape, attaching endpoint
    /// metadata. The local hour comes from the agent clock so the server
    /// never has to guess the endpoint's timezone.
    fn enrich(&self, event: ObservedEvent) -> Value {
        let hour = Local::now().hour();
        let mut details = event.details;
        if let Some(map) = details.as_object_mut() {
            map.insert("device_id".into(), json!(self.identity.device_id()));
            map.insert("host_name".into(), json!(self.identity.host_name));
            map.insert("activity_hour".into(), json!(hour));
            map.insert("off_hours".into(), json!(is_off_hours(hour)));
        }
        json!({
            "user_id": self.config.user_id,
            "timestamp": event.timestamp.to_rfc3339(),
            "activity_type": event.kind.as_str(),
            "details": details,
        })
    }

    /// Observer totals for the shutdown summary.
    pub fn observer_totals(&self) -> Vec<(&'static str, u64)> {
        self.observers
            .iter()
            .map(|o| (o.name(), o.observed_total()))
            .collect()
    }
}
