//! Login observer: a session heartbeat every five minutes, plus a
//! new-login event when system uptime is under an hour and no login has
//! been emitted in the prior hour.

use super::{buffer::RingBuffer, ObservedEvent, Observer};
use chrono::{Local, Timelike};
use sentinel_core::ActivityKind;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use sysinfo::System;
use tracing::debug;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(300);
const POLL_INTERVAL: Duration = Duration::from_secs(30);
const FRESH_BOOT_SECS: u64 = 3600;
const BUFFER_CAPACITY: usize = 64;

pub struct LoginObserver {
    buffer: Arc<RingBuffer>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl LoginObserver {
    pub fn new() -> Self {
        Self {
            buffer: Arc::new(RingBuffer::new(BUFFER_CAPACITY)),
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }
}

impl Default for LoginObserver {
    fn default() -> Self {
        Self::new()
    }
}

fn logon_event(new_login: bool, heartbeat: bool) -> ObservedEvent {
    let hour = Local::now().hour();
    ObservedEvent::new(
        ActivityKind::Logon,
        json!({
            "logon_hour": hour,
            "new_login": new_login,
            "session_heartbeat": heartbeat,
            "geo_anomaly": 0,
        }),
    )
}

impl Observer for LoginObserver {
    fn name(&self) -> &'static str {
        "login"
    }

    fn start(&self) -> sentinel_core::Result<()> {
        self.running.store(true, Ordering::Relaxed);
        let buffer = self.buffer.clone();
        let running = self.running.clone();

        let handle = std::thread::Builder::new()
            .name("login-observer".to_string())
            .spawn(move || {
                let mut last_heartbeat: Option<Instant> = None;
                let mut last_login: Option<Instant> = None;

                while running.load(Ordering::Relaxed) {
                    let now = Instant::now();

                    let fresh_boot = System::uptime() < FRESH_BOOT_SECS;
                    let login_cooldown_over = last_login
                        .map(|t| now.duration_since(t) >= Duration::from_secs(3600))
                        .unwrap_or(true);
                    if fresh_boot && login_cooldown_over {
                        buffer.push(logon_event(true, false));
                        last_login = Some(now);
                    }

                    let heartbeat_due = last_heartbeat
                        .map(|t| now.duration_since(t) >= HEARTBEAT_INTERVAL)
                        .unwrap_or(true);
                    if heartbeat_due {
                        buffer.push(logon_event(false, true));
                        last_heartbeat = Some(now);
                    }

                    std::thread::sleep(POLL_INTERVAL);
                }
                debug!("Login observer stopped");
            })
            .expect("spawning login observer thread");

        *self.worker.lock().expect("worker slot poisoned") = Some(handle);
        Ok(())
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.worker.lock().expect("worker slot poisoned").take() {
            let _ = handle.join();
        }
    }

    fn drain(&self, limit: usize) -> Vec<ObservedEvent> {
        self.buffer.drain(limit)
    }

    fn observed_total(&self) -> u64 {
        self.buffer.observed_total()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logon_event_carries_local_hour() {
        let event = logon_event(true, false);
        assert_eq!(event.kind, ActivityKind::Logon);
        let hour = event.details["logon_hour"].as_u64().unwrap();
        assert!(hour < 24);
        assert_eq!(event.details["new_login"], true);
        assert_eq!(event.details["session_heartbeat"], false);
    }
}
