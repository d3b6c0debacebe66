//! File observer: native change notifications with a polling fallback.
//!
//! Native mode uses the platform watcher (inotify, FSEvents, ReadDirectory-
//! ChangesW via `notify`); when the watcher cannot be created the observer
//! falls back to a modification-time polling scan of the monitored paths.
//!
//! Source-side noise controls: repeated observations of the same
//! (path, action) within a two-second window collapse into one event, and
//! small non-sensitive files are dropped entirely.

use super::{buffer::RingBuffer, ObservedEvent, Observer};
use crate::config::MIN_FILE_EVENT_MB;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use sentinel_core::ActivityKind;
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Identical (path, action) observations inside this window collapse.
const DEDUP_WINDOW: Duration = Duration::from_secs(2);
/// Fallback scan cadence.
const POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Depth and entry limits keep the fallback scan cheap.
const POLL_MAX_DEPTH: usize = 4;
const POLL_MAX_ENTRIES: usize = 20_000;

const BUFFER_CAPACITY: usize = 2_048;

pub struct FileObserver {
    paths: Vec<PathBuf>,
    sensitive_patterns: Vec<String>,
    buffer: Arc<RingBuffer>,
    dedup: Arc<Mutex<HashMap<(PathBuf, &'static str), Instant>>>,
    running: Arc<AtomicBool>,
    watcher: Mutex<Option<RecommendedWatcher>>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl FileObserver {
    pub fn new(paths: Vec<PathBuf>, sensitive_patterns: Vec<String>) -> Self {
        Self {
            paths,
            sensitive_patterns,
            buffer: Arc::new(RingBuffer::new(BUFFER_CAPACITY)),
            dedup: Arc::new(Mutex::new(HashMap::new())),
            running: Arc::new(AtomicBool::new(false)),
            watcher: Mutex::new(None),
            poller: Mutex::new(None),
        }
    }

    fn record(
        buffer: &RingBuffer,
        dedup: &Mutex<HashMap<(PathBuf, &'static str), Instant>>,
        sensitive_patterns: &[String],
        path: &Path,
        action: &'static str,
    ) {
        let now = Instant::now();
        {
            let mut seen = dedup.lock().expect("dedup map poisoned");
            if let Some(last) = seen.get(&(path.to_path_buf(), action)) {
                if now.duration_since(*last) < DEDUP_WINDOW {
                    return;
                }
            }
            seen.insert((path.to_path_buf(), action), now);
            seen.retain(|_, last| now.duration_since(*last) < DEDUP_WINDOW * 10);
        }

        let size_mb = std::fs::metadata(path)
            .map(|m| m.len() as f64 / (1024.0 * 1024.0))
            .unwrap_or(0.0);
        let sensitive = is_sensitive(path, sensitive_patterns);
        if size_mb < MIN_FILE_EVENT_MB && !sensitive && action != "delete" {
            return;
        }

        buffer.push(ObservedEvent::new(
            ActivityKind::FileAccess,
            json!({
                "file_path": path.display().to_string(),
                "size_mb": size_mb,
                "sensitive": sensitive,
                "action": action,
            }),
        ));
    }

    fn start_native(&self) -> sentinel_core::Result<()> {
        let buffer = self.buffer.clone();
        let dedup = self.dedup.clone();
        let patterns = self.sensitive_patterns.clone();

        let mut watcher = notify::recommended_watcher(move |result: Result<Event, notify::Error>| {
            match result {
                Ok(event) => {
                    let action = match event.kind {
                        EventKind::Create(_) => "write",
                        EventKind::Modify(_) => "write",
                        EventKind::Remove(_) => "delete",
                        EventKind::Access(_) => "read",
                        _ => return,
                    };
                    for path in &event.paths {
                        Self::record(&buffer, &dedup, &patterns, path, action);
                    }
                }
                Err(e) => debug!("File watcher event error: {e}"),
            }
        })
        .map_err(|e| sentinel_core::Error::observer(format!("creating file watcher: {e}")))?;

        watcher
            .configure(NotifyConfig::default())
            .map_err(|e| sentinel_core::Error::observer(format!("configuring file watcher: {e}")))?;

        for path in &self.paths {
            if let Err(e) = watcher.watch(path, RecursiveMode::Recursive) {
                // Permission denied or a vanished directory must not stop
                // the remaining paths.
                debug!("Cannot watch {}: {e}", path.display());
            }
        }

        *self.watcher.lock().expect("watcher slot poisoned") = Some(watcher);
        Ok(())
    }

    fn start_polling(&self) {
        let buffer = self.buffer.clone();
        let dedup = self.dedup.clone();
        let patterns = self.sensitive_patterns.clone();
        let paths = self.paths.clone();
        let running = self.running.clone();

        let handle = std::thread::Builder::new()
            .name("file-observer".to_string())
            .spawn(move || {
                let mut last_scan = SystemTime::now();
                while running.load(Ordering::Relaxed) {
                    std::thread::sleep(POLL_INTERVAL);
                    let scan_started = SystemTime::now();
                    let mut entries = 0usize;
                    for root in &paths {
                        for entry in WalkDir::new(root)
                            .max_depth(POLL_MAX_DEPTH)
                            .into_iter()
                            .filter_map(|e| e.ok())
                            .filter(|e| e.file_type().is_file())
                        {
                            entries += 1;
                            if entries > POLL_MAX_ENTRIES {
                                break;
                            }
                            if let Ok(meta) = entry.metadata() {
                                if let Ok(modified) = meta.modified() {
                                    if modified > last_scan {
                                        Self::record(
                                            &buffer,
                                            &dedup,
                                            &patterns,
                                            entry.path(),
                                            "write",
                                        );
                                    }
                                }
                            }
                        }
                    }
                    last_scan = scan_started;
                }
            })
            .expect("spawning file observer thread");

        *self.poller.lock().expect("poller slot poisoned") = Some(handle);
    }
}

impl Observer for FileObserver {
    fn name(&self) -> &'static str {
        "file"
    }

    fn start(&self) -> sentinel_core::Result<()> {
        self.running.store(true, Ordering::Relaxed);
        match self.start_native() {
            Ok(()) => {
                debug!("File observer using native change notifications");
                Ok(())
            }
            Err(e) => {
                warn!("Native file watching unavailable ({e}), using polling fallback");
                self.start_polling();
                Ok(())
            }
        }
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        self.watcher.lock().expect("watcher slot poisoned").take();
        if let Some(handle) = self.poller.lock().expect("poller slot poisoned").take() {
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

fn is_sensitive(path: &Path, patterns: &[String]) -> bool {
    let lowered = path.display().to_string().to_lowercase();
    patterns.iter().any(|p| lowered.contains(p.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensitive_matching_is_case_insensitive() {
        let patterns = vec!["payroll".to_string(), "secret".to_string()];
        assert!(is_sensitive(Path::new("/data/Payroll/june.xlsx"), &patterns));
        assert!(is_sensitive(Path::new("/home/u/TOP-SECRET.txt"), &patterns));
        assert!(!is_sensitive(Path::new("/home/u/notes.txt"), &patterns));
    }

    #[test]
    fn duplicate_observations_collapse_within_window() {
        let buffer = RingBuffer::new(16);
        let dedup = Mutex::new(HashMap::new());
        let patterns = vec!["secret".to_string()];
        let path = Path::new("/tmp/secret-report.txt");

        FileObserver::record(&buffer, &dedup, &patterns, path, "write");
        FileObserver::record(&buffer, &dedup, &patterns, path, "write");
        assert_eq!(buffer.len(), 1, "second observation within 2s collapses");

        // A different action is a distinct observation.
        FileObserver::record(&buffer, &dedup, &patterns, path, "delete");
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn small_plain_files_are_dropped() {
        let buffer = RingBuffer::new(16);
        let dedup = Mutex::new(HashMap::new());
        // Nonexistent path resolves to 0 MB and is not sensitive.
        FileObserver::record(&buffer, &dedup, &[], Path::new("/nonexistent/tiny.txt"), "write");
        assert!(buffer.is_empty());

        // Deletes always pass.
        FileObserver::record(&buffer, &dedup, &[], Path::new("/nonexistent/tiny.txt"), "delete");
        assert_eq!(buffer.len(), 1);
    }
}
