//! DHCP lease discovery for a freshly booted guest.
//!
//! Polls `virsh domifaddr --source lease` until an IPv4 token appears or the
//! time budget runs out. Command failures are tolerated and retried (the
//! lease table is often briefly unqueryable right after boot); only the
//! elapsed budget is fatal.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info};

use crate::error::{ForgeError, ForgeResult};
use crate::vm::executor::{CommandRunner, ExecOptions};

/// Fixed gap between lease queries. No backoff: the query is cheap and the
/// lease can appear at any moment once the guest's network stack is up.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

static IPV4_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"ipv4\s+([0-9]+\.[0-9]+\.[0-9]+\.[0-9]+)").expect("ipv4 regex is valid")
});

/// Extract the first IPv4 token from `virsh domifaddr` output.
///
/// The output lists one interface per line, e.g.
/// `vnet0  52:54:00:ab:cd:ef  ipv4  192.168.122.50/24`; the prefix length
/// after the address is not captured.
pub fn extract_ipv4(output: &str) -> Option<&str> {
    IPV4_RE
        .captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Poll the hypervisor until `guest` holds a DHCP lease or `timeout` elapses.
///
/// Stops immediately on the first well-formed IPv4 token. The deadline is
/// checked after every query, so the loop never overshoots the budget by
/// more than one [`POLL_INTERVAL`].
pub async fn wait_for_lease<R: CommandRunner>(
    runner: &R,
    guest: &str,
    timeout: Duration,
) -> ForgeResult<String> {
    let command = format!("sudo virsh domifaddr {guest} --source lease");
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        // A failed query is indistinguishable from "no lease yet" for our
        // purposes; both fall through to the deadline check.
        let output = match runner.exec(&command, &ExecOptions::default()).await {
            Ok(outcome) if outcome.success => outcome.stdout,
            Ok(outcome) => {
                debug!(stderr = %outcome.stderr, "lease query exited non-zero; retrying");
                String::new()
            }
            Err(e) => {
                debug!(error = %e, "lease query did not run; retrying");
                String::new()
            }
        };

        if let Some(ip) = extract_ipv4(&output) {
            info!(guest, ip, "guest obtained DHCP lease");
            return Ok(ip.to_string());
        }

        if tokio::time::Instant::now() >= deadline {
            return Err(ForgeError::LeaseTimeout {
                guest: guest.to_string(),
                timeout_secs: timeout.as_secs(),
            });
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
