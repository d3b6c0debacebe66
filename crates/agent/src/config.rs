//! Agent configuration: CLI arguments merged with defaults.

use std::path::PathBuf;
use std::time::Duration;

/// Default file-size floor in megabytes: smaller, non-sensitive file events
/// are dropped at the source to reduce volume.
pub const MIN_FILE_EVENT_MB: f64 = 0.01;

/// Substrings that mark a path as sensitive regardless of size.
pub const DEFAULT_SENSITIVE_PATTERNS: [&str; 8] = [
    "confidential",
    "secret",
    "password",
    "credential",
    "finance",
    "payroll",
    "salary",
    "contract",
];

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Monitored user, `U<digits>`.
    pub user_id: String,
    /// Base URL of the ingest service.
    pub server_url: String,
    /// How often observers are drained into the send queue.
    pub poll_interval: Duration,
    /// How often the send queue is flushed to the server.
    pub upload_interval: Duration,
    /// Transport retry budget per send.
    pub retry_budget: u32,
    /// Base delay for exponential backoff.
    pub retry_base_delay: Duration,
    /// Events drained per observer per poll.
    pub send_batch_size: usize,
    /// Per-request timeout.
    pub connect_timeout: Duration,
    /// Per-kind enable flags.
    pub enable_file: bool,
    pub enable_process: bool,
    pub enable_network: bool,
    pub enable_login: bool,
    /// Path substrings that mark file events sensitive.
    pub sensitive_patterns: Vec<String>,
    /// Directories watched by the file observer.
    pub monitored_paths: Vec<PathBuf>,
}

impl AgentConfig {
    pub fn new(user_id: String, server_url: String) -> Self {
        Self {
            user_id,
            server_url,
            poll_interval: Duration::from_secs(5),
            upload_interval: Duration::from_secs(20),
            retry_budget: 3,
            retry_base_delay: Duration::from_secs(2),
            send_batch_size: 50,
            connect_timeout: Duration::from_secs(10),
            enable_file: true,
            enable_process: true,
            enable_network: true,
            enable_login: true,
            sensitive_patterns: DEFAULT_SENSITIVE_PATTERNS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            monitored_paths: default_monitored_paths(),
        }
    }
}

/// Documents, Downloads and Desktop plus OS-specific additions, filtered to
/// paths that actually exist on this endpoint.
pub fn default_monitored_paths() -> Vec<PathBuf> {
    let mut candidates: Vec<Option<PathBuf>> = vec![
        dirs::document_dir(),
        dirs::download_dir(),
        dirs::desktop_dir(),
    ];

    if cfg!(target_os = "linux") {
        candidates.push(dirs::home_dir().map(|h| h.join(".ssh")));
        candidates.push(Some(PathBuf::from("/tmp")));
    }
    if cfg!(target_os = "windows") {
        candidates.push(dirs::public_dir());
    }
    if cfg!(target_os = "macos") {
        candidates.push(dirs::home_dir().map(|h| h.join("Library/Mobile Documents")));
    }

    candidates
        .into_iter()
        .flatten()
        .filter(|p| p.exists())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let config = AgentConfig::new("U001".to_string(), "http://localhost:8000".to_string());
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.upload_interval, Duration::from_secs(20));
        assert_eq!(config.retry_budget, 3);
        assert_eq!(config.retry_base_delay, Duration::from_secs(2));
        assert_eq!(config.send_batch_size, 50);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert!(config.enable_file && config.enable_process && config.enable_network && config.enable_login);
    }

    #[test]
    fn monitored_paths_only_contain_existing_directories() {
        for path in default_monitored_paths() {
            assert!(path.exists(), "{path:?} should exist");
        }
    }
}
