//! Process observer: snapshots running processes on a fixed cadence and
//! emits events for newly-seen process ids and for names matching the
//! known-suspicious keyword set.

use super::{buffer::RingBuffer, ObservedEvent, Observer};
use sentinel_core::ActivityKind;
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use sysinfo::{ProcessesToUpdate, System};
use tracing::debug;

/// Keyword set flagging tooling commonly seen in insider incidents.
pub const SUSPICIOUS_KEYWORDS: [&str; 10] = [
    "tor", "vpn", "ssh", "ftp", "nmap", "wireshark", "metasploit", "burp", "sqlmap", "netcat",
];

const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(10);
const BUFFER_CAPACITY: usize = 1_024;

pub struct ProcessObserver {
    buffer: Arc<RingBuffer>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ProcessObserver {
    pub fn new() -> Self {
        Self {
            buffer: Arc::new(RingBuffer::new(BUFFER_CAPACITY)),
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }
}

impl Default for ProcessObserver {
    fn default() -> Self {
        Self::new()
    }
}

pub fn name_is_suspicious(name: &str) -> bool {
    let lowered = name.to_lowercase();
    SUSPICIOUS_KEYWORDS.iter().any(|kw| lowered.contains(kw))
}

impl Observer for ProcessObserver {
    fn name(&self) -> &'static str {
        "process"
    }

    fn start(&self) -> sentinel_core::Result<()> {
        self.running.store(true, Ordering::Relaxed);
        let buffer = self.buffer.clone();
        let running = self.running.clone();

        let handle = std::thread::Builder::new()
            .name("process-observer".to_string())
            .spawn(move || {
                let mut system = System::new();
                let mut known: HashSet<u32> = HashSet::new();
                let mut first_snapshot = true;

                while running.load(Ordering::Relaxed) {
                    system.refresh_processes(ProcessesToUpdate::All);

                    for (pid, process) in system.processes() {
                        let pid = pid.as_u32();
                        let name = process.name().to_string_lossy().to_string();
                        let is_new = known.insert(pid);
                        let suspicious = name_is_suspicious(&name);

                        // The initial snapshot only establishes the known
                        // set; suspicious names still fire immediately.
                        if (is_new && !first_snapshot) || (suspicious && is_new) {
                            buffer.push(ObservedEvent::new(
                                ActivityKind::Process,
                                json!({
                                    "process_name": name,
                                    "pid": pid,
                                    "suspicious": suspicious,
                                }),
                            ));
                        }
                    }
                    first_snapshot = false;

                    // Forget exited pids so reuse is seen as new.
                    let alive: HashSet<u32> =
                        system.processes().keys().map(|p| p.as_u32()).collect();
                    known.retain(|pid| alive.contains(pid));

                    std::thread::sleep(SNAPSHOT_INTERVAL);
                }
                debug!("Process observer stopped");
            })
            .expect("spawning process observer thread");

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
    fn keyword_matching_flags_known_tools() {
        assert!(name_is_suspicious("tor-browser"));
        assert!(name_is_suspicious("OpenVPN-gui"));
        assert!(name_is_suspicious("Wireshark"));
        assert!(name_is_suspicious("sqlmap.py"));
        assert!(!name_is_suspicious("firefox"));
        assert!(!name_is_suspicious("cargo"));
    }
}
