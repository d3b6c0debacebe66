use crate::model::Activity;
use sha2::{Digest, Sha256};

/// Maximum file-path prefix folded into the fingerprint, so path noise past
/// this length does not defeat deduplication.
const PATH_TRUNCATE: usize = 100;

/// Stable SHA-256 fingerprint for anomaly deduplication.
///
/// Hashes the tuple (user id, kind, truncated file path, process name, IP,
/// device id) plus the quaternary anomaly signature
/// {large_file, sensitive, external, off_hours}. Semantically identical
/// events produce the same hash across calls and restarts.
pub fn generate(activity: &Activity) -> String {
    let details = &activity.details;

    let file_path: String = details
        .file_path()
        .unwrap_or("")
        .chars()
        .take(PATH_TRUNCATE)
        .collect();
    let process_name = details.process_name().unwrap_or("");
    let ip_address = details.ip_address().unwrap_or("");
    let device_id = details.common().device_id.as_deref().unwrap_or("");

    let signature = format!(
        "large_file={}|sensitive={}|external={}|off_hours={}",
        details.file_size_mb() > 50.0,
        details.is_sensitive(),
        details.is_external(),
        activity.is_off_hours(),
    );

    let material = format!(
        "user={}|kind={}|path={}|process={}|ip={}|device={}|{}",
        activity.user_id,
        activity.kind,
        file_path,
        process_name,
        ip_address,
        device_id,
        signature,
    );

    let mut hasher = Sha256::new();
    hasher.update(material.as_bytes());
    format!("{:x}", hasher.finalize())
}
