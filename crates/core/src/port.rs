//! Port availability probing
//!
//! A port counts as available when a listener can be bound to it. The probe
//! listener is dropped before returning, so probing never holds the port.
//!
//! On Unix the standard library sets `SO_REUSEADDR` on every listener, the
//! same as the servers being supervised. Sockets lingering in `TIME_WAIT`
//! therefore count as free; only a live listener makes the port busy.

use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, TcpListener};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Default delay between probes
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Bind-and-release TCP port probe
#[derive(Debug, Clone, Copy)]
pub struct PortProbe {
    host: IpAddr,
    poll_interval: Duration,
}

impl PortProbe {
    /// Probe on `host` with the given poll cadence
    pub fn new(host: IpAddr, poll_interval: Duration) -> Self {
        Self {
            host,
            poll_interval,
        }
    }

    /// Parse `host` as an IP address, falling back to loopback
    pub fn for_host(host: &str, poll_interval: Duration) -> Self {
        let addr = host.parse().unwrap_or_else(|_| {
            debug!("Probe host {:?} is not an IP address, using 127.0.0.1", host);
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        });
        Self::new(addr, poll_interval)
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Check whether `port` can be bound right now
    ///
    /// Any bind failure counts as unavailable. Failures other than
    /// address-in-use are only logged.
    pub fn is_available(&self, port: u16) -> bool {
        match TcpListener::bind((self.host, port)) {
            Ok(listener) => {
                drop(listener);
                true
            }
            Err(e) if e.kind() == ErrorKind::AddrInUse => false,
            Err(e) => {
                debug!("Probe bind on {}:{} failed: {}", self.host, port, e);
                false
            }
        }
    }

    /// Poll until `port` is available or `timeout` elapses
    ///
    /// Returns true iff the port became available within the budget. The
    /// final probe happens at the deadline, so a full wait lasts about
    /// `timeout`.
    pub async fn wait_until_available(&self, port: u16, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;

        loop {
            if self.is_available(port) {
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }

            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

impl Default for PortProbe {
    fn default() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_POLL_INTERVAL)
    }
}
