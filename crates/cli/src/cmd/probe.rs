//! Check whether a port can be bound

use anyhow::Result;
use owo_colors::OwoColorize;
use respawn_core::port::DEFAULT_POLL_INTERVAL;
use respawn_core::PortProbe;
use std::process::ExitCode;
use std::time::Duration;

/// Exits with failure when the port is in use
pub async fn run(port: u16, wait_ms: u64, host: &str) -> Result<ExitCode> {
    let probe = PortProbe::for_host(host, DEFAULT_POLL_INTERVAL);

    let available = if wait_ms > 0 {
        probe
            .wait_until_available(port, Duration::from_millis(wait_ms))
            .await
    } else {
        probe.is_available(port)
    };

    if available {
        println!("Port {} is {}", port, "free".green());
        Ok(ExitCode::SUCCESS)
    } else {
        println!("Port {} is {}", port, "in use".red());
        Ok(ExitCode::FAILURE)
    }
}
