//! Network observer: polls NIC counters and the connection table, emitting
//! an event only when a meaningful threshold fires — a non-trivial data
//! delta, three or more external connections, or a connection on a port
//! from the suspicious set.
//!
//! External means any remote address outside the private, loopback and
//! link-local ranges.

use super::{buffer::RingBuffer, ObservedEvent, Observer};
use sentinel_core::ActivityKind;
use serde_json::json;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use sysinfo::Networks;
use tracing::debug;

/// Ports commonly riding shotgun on exfiltration and remote-control paths.
pub const SUSPICIOUS_PORTS: [u16; 7] = [22, 23, 3389, 5900, 8080, 4444, 5555];

/// Send-side byte delta below this is considered trivial.
const MIN_DATA_DELTA_MB: f64 = 1.0;
/// External connection count that fires on its own.
const EXTERNAL_CONNECTION_THRESHOLD: usize = 3;

const POLL_INTERVAL: Duration = Duration::from_secs(15);
const BUFFER_CAPACITY: usize = 512;

#[derive(Debug, Clone, Default)]
pub struct ConnectionSnapshot {
    pub external: Vec<(IpAddr, u16)>,
    pub suspicious_ports: Vec<u16>,
}

pub struct NetworkObserver {
    buffer: Arc<RingBuffer>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl NetworkObserver {
    pub fn new() -> Self {
        Self {
            buffer: Arc::new(RingBuffer::new(BUFFER_CAPACITY)),
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }
}

impl Default for NetworkObserver {
    fn default() -> Self {
        Self::new()
    }
}

/// Private, loopback and link-local ranges do not count as external.
pub fn is_external(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            !(v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified())
        }
        IpAddr::V6(v6) => {
            !(v6.is_loopback()
                || v6.is_unspecified()
                // fe80::/10 link-local and fc00::/7 unique-local.
                || (v6.segments()[0] & 0xffc0) == 0xfe80
                || (v6.segments()[0] & 0xfe00) == 0xfc00)
        }
    }
}

/// Current established connections. Linux reads the kernel's table; other
/// platforms fall back to counters-only observation.
pub fn snapshot_connections() -> ConnectionSnapshot {
    #[cfg(target_os = "linux")]
    {
        let mut snapshot = ConnectionSnapshot::default();
        for table in ["/proc/net/tcp", "/proc/net/tcp6"] {
            let Ok(raw) = std::fs::read_to_string(table) else { continue };
            for line in raw.lines().skip(1) {
                let fields: Vec<&str> = line.split_whitespace().collect();
                // rem_address is field 2, state field 3; 01 = ESTABLISHED.
                if fields.len() < 4 || fields[3] != "01" {
                    continue;
                }
                if let Some((addr, port)) = parse_kernel_address(fields[2]) {
                    if SUSPICIOUS_PORTS.contains(&port) {
                        snapshot.suspicious_ports.push(port);
                    }
                    if is_external(addr) {
                        snapshot.external.push((addr, port));
                    }
                }
            }
        }
        snapshot
    }

    #[cfg(not(target_os = "linux"))]
    {
        ConnectionSnapshot::default()
    }
}

/// Parse the kernel's hex `ADDR:PORT` form, e.g. `0100007F:1F90`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_kernel_address(raw: &str) -> Option<(IpAddr, u16)> {
    let (addr_hex, port_hex) = raw.split_once(':')?;
    let port = u16::from_str_radix(port_hex, 16).ok()?;

    let addr = match addr_hex.len() {
        8 => {
            let bits = u32::from_str_radix(addr_hex, 16).ok()?;
            IpAddr::V4(std::net::Ipv4Addr::from(bits.swap_bytes()))
        }
        32 => {
            let mut octets = [0u8; 16];
            for (i, chunk) in octets.chunks_exact_mut(4).enumerate() {
                let word = u32::from_str_radix(&addr_hex[i * 8..(i + 1) * 8], 16).ok()?;
                chunk.copy_from_slice(&word.swap_bytes().to_be_bytes());
            }
            IpAddr::V6(std::net::Ipv6Addr::from(octets))
        }
        _ => return None,
    };
    Some((addr, port))
}

impl Observer for NetworkObserver {
    fn name(&self) -> &'static str {
        "network"
    }

    fn start(&self) -> sentinel_core::Result<()> {
        self.running.store(true, Ordering::Relaxed);
        let buffer = self.buffer.clone();
        let running = self.running.clone();

        let handle = std::thread::Builder::new()
            .name("network-observer".to_string())
            .spawn(move || {
                let mut networks = Networks::new_with_refreshed_list();
                let mut last_sent_total: u64 = networks.iter().map(|(_, n)| n.total_transmitted()).sum();

                while running.load(Ordering::Relaxed) {
                    std::thread::sleep(POLL_INTERVAL);
                    networks.refresh();

                    let sent_total: u64 = networks.iter().map(|(_, n)| n.total_transmitted()).sum();
                    let delta_mb =
                        sent_total.saturating_sub(last_sent_total) as f64 / (1024.0 * 1024.0);
                    last_sent_total = sent_total;

                    let connections = snapshot_connections();
                    let external_count = connections.external.len();
                    let suspicious_port = connections.suspicious_ports.first().copied();

                    let threshold_fired = delta_mb >= MIN_DATA_DELTA_MB
                        || external_count >= EXTERNAL_CONNECTION_THRESHOLD
                        || suspicious_port.is_some();
                    if !threshold_fired {
                        continue;
                    }

                    let remote = connections
                        .external
                        .first()
                        .map(|(addr, _)| addr.to_string())
                        .unwrap_or_default();
                    buffer.push(ObservedEvent::new(
                        ActivityKind::Network,
                        json!({
                            "data_sent_mb": delta_mb,
                            "external_connections": external_count,
                            "ip_address": remote,
                            "port": suspicious_port,
                        }),
                    ));
                }
                debug!("Network observer stopped");
            })
            .expect("spawning network observer thread");

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
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn private_and_loopback_ranges_are_internal() {
        assert!(!is_external(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))));
        assert!(!is_external(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20))));
        assert!(!is_external(IpAddr::V4(Ipv4Addr::new(172, 16, 0, 1))));
        assert!(!is_external(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))));
        assert!(!is_external(IpAddr::V4(Ipv4Addr::new(169, 254, 1, 1))));
        assert!(!is_external(IpAddr::V6(Ipv6Addr::LOCALHOST)));

        assert!(is_external(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8))));
        assert!(is_external(IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34))));
    }

    #[test]
    fn kernel_address_parsing_round_trips() {
        // 127.0.0.1:8080 in the kernel's little-endian hex form.
        let (addr, port) = parse_kernel_address("0100007F:1F90").unwrap();
        assert_eq!(addr, IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)));
        assert_eq!(port, 8080);

        assert!(parse_kernel_address("garbage").is_none());
        assert!(parse_kernel_address("0100007F").is_none());
    }

    #[test]
    fn suspicious_port_set_matches_contract() {
        for port in [22, 23, 3389, 5900, 8080, 4444, 5555] {
            assert!(SUSPICIOUS_PORTS.contains(&port));
        }
        assert!(!SUSPICIOUS_PORTS.contains(&443));
    }
}
