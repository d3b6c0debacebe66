//! Startup connectivity diagnostics.
//!
//! When the server is unreachable the agent does not exit: it prints a
//! report naming the probable causes, then enters degraded mode (log,
//! queue, continue monitoring).

use colored::*;
use sysinfo::Networks;

/// Print the probable-cause report for an unreachable server.
pub fn print_connectivity_report(server_url: &str, detail: &str) {
    eprintln!();
    eprintln!("{}", "⚠ Cannot reach the SentinelIQ server".yellow().bold());
    eprintln!("  server: {}", server_url.cyan());
    eprintln!("  error:  {detail}");
    eprintln!();
    eprintln!("{}", "Probable causes:".bold());
    eprintln!("  1. Wrong server IP or port in --server");
    eprintln!("  2. A firewall is blocking the connection");
    eprintln!("  3. The server is not running");
    if !has_active_interface() {
        eprintln!(
            "  4. {} — no active network interface detected on this machine",
            "Likely this one".red().bold()
        );
    } else {
        eprintln!("  4. No network interface (not the case here; interfaces look active)");
    }
    eprintln!();
    eprintln!(
        "{}",
        "Continuing in degraded mode: events will be queued locally and \
         delivered when the server becomes reachable."
            .italic()
    );
    eprintln!();
}

/// Whether any interface has moved traffic, a cheap proxy for "this
/// machine has networking at all".
fn has_active_interface() -> bool {
    let networks = Networks::new_with_refreshed_list();
    networks
        .iter()
        .any(|(_, data)| data.total_received() > 0 || data.total_transmitted() > 0)
}
