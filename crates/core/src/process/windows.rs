//! Windows process primitives
//!
//! Tree termination goes through `taskkill /T`, port ownership through
//! `netstat -ano`.

use super::{ProcessHandle, TerminationOutcome};
use crate::error::ProcessError;
use std::time::Duration;
use tokio::process::Command;
use tracing::{error, info, warn};

const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

/// Detach the child from our console control group
pub(super) fn isolate(command: &mut Command) {
    command.creation_flags(CREATE_NEW_PROCESS_GROUP);
}

pub(super) fn is_alive(pid: u32) -> bool {
    std::process::Command::new("tasklist")
        .args(["/FI", &format!("PID eq {}", pid), "/NH", "/FO", "CSV"])
        .output()
        .map(|out| String::from_utf8_lossy(&out.stdout).contains(&format!("\"{}\"", pid)))
        .unwrap_or(false)
}

pub(super) async fn terminate_tree(
    handle: &mut ProcessHandle,
    graceful_timeout: Duration,
) -> TerminationOutcome {
    let pid = handle.pid();

    if handle.has_exited() {
        return TerminationOutcome::AlreadyExited;
    }

    info!(pid, "Requesting process tree exit");
    // Console programs often refuse a non-forced taskkill; skip the wait then
    if taskkill(pid, false).await && handle.wait_exit(graceful_timeout).await {
        return TerminationOutcome::Graceful;
    }

    warn!(pid, "Process tree still running, forcing termination");
    taskkill(pid, true).await;

    if handle.wait_exit(graceful_timeout).await {
        TerminationOutcome::Forced
    } else {
        error!(pid, "Process tree survived forced termination");
        TerminationOutcome::Unconfirmed
    }
}

async fn taskkill(pid: u32, force: bool) -> bool {
    let mut command = Command::new("taskkill");
    command.arg("/T");
    if force {
        command.arg("/F");
    }
    command.args(["/PID", &pid.to_string()]);

    match command.output().await {
        Ok(output) => output.status.success(),
        Err(e) => {
            warn!(pid, "Failed to run taskkill: {}", e);
            false
        }
    }
}

pub(super) async fn kill_port_owner(port: u16) -> Result<Vec<u32>, ProcessError> {
    let output = Command::new("netstat")
        .args(["-ano", "-p", "TCP"])
        .output()
        .await
        .map_err(|source| ProcessError::PortLookup { port, source })?;

    let own_pid = std::process::id();
    let listing = String::from_utf8_lossy(&output.stdout);
    let mut killed = Vec::new();
    for pid in parse_netstat_listeners(&listing, port)
        .into_iter()
        .filter(|&pid| pid != own_pid && pid != 0)
    {
        if taskkill(pid, true).await {
            info!(port, pid, "Killed process holding the port");
            killed.push(pid);
        } else {
            warn!(port, pid, "Failed to kill process holding the port");
        }
    }
    Ok(killed)
}

/// Pids listening on `port` in `netstat -ano` output
fn parse_netstat_listeners(listing: &str, port: u16) -> Vec<u32> {
    let suffix = format!(":{}", port);
    listing
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            match fields.as_slice() {
                [proto, local, _, state, pid]
                    if proto.eq_ignore_ascii_case("TCP")
                        && local.ends_with(&suffix)
                        && *state == "LISTENING" =>
                {
                    pid.parse().ok()
                }
                _ => None,
            }
        })
        .collect()
}
