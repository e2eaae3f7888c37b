//! Unix process primitives
//!
//! Each child leads its own process group, so signalling the group reaches
//! every descendant that did not detach itself.

use super::{ProcessHandle, TerminationOutcome};
use crate::error::ProcessError;
use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::{getpgid, Pid};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// Put the child in a fresh process group led by itself
pub(super) fn isolate(command: &mut Command) {
    command.process_group(0);
}

/// Whether `pid` names a live (non-zombie) process
pub(super) fn is_alive(pid: u32) -> bool {
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => !is_zombie(pid),
        Err(Errno::ESRCH) => false,
        // EPERM: exists but belongs to someone else
        Err(_) => true,
    }
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    // Field 3 of /proc/<pid>/stat, after the parenthesised command name
    std::fs::read_to_string(format!("/proc/{}/stat", pid))
        .ok()
        .and_then(|stat| {
            let (_, rest) = stat.rsplit_once(')')?;
            rest.split_whitespace().next().map(|state| state == "Z")
        })
        .unwrap_or(false)
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(_pid: u32) -> bool {
    false
}

/// SIGTERM the group, then SIGKILL it if the leader outlives the grace period
pub(super) async fn terminate_tree(
    handle: &mut ProcessHandle,
    graceful_timeout: Duration,
) -> TerminationOutcome {
    let pid = handle.pid();

    if handle.has_exited() {
        sweep_group(pid);
        return TerminationOutcome::AlreadyExited;
    }

    info!(pid, "Sending SIGTERM to process tree");
    if !signal_tree(pid, Signal::SIGTERM) {
        return TerminationOutcome::AlreadyExited;
    }

    if handle.wait_exit(graceful_timeout).await {
        sweep_group(pid);
        return TerminationOutcome::Graceful;
    }

    warn!(
        pid,
        "Process tree still running after {:?}, sending SIGKILL", graceful_timeout
    );
    signal_tree(pid, Signal::SIGKILL);

    if handle.wait_exit(graceful_timeout).await {
        sweep_group(pid);
        TerminationOutcome::Forced
    } else {
        error!(pid, "Process tree survived SIGKILL");
        TerminationOutcome::Unconfirmed
    }
}

/// Signal the process group, or the bare pid if it leads no group
///
/// Returns false when the target no longer exists.
fn signal_tree(pid: u32, signal: Signal) -> bool {
    let target = Pid::from_raw(pid as i32);
    match killpg(target, signal) {
        Ok(()) => true,
        Err(Errno::ESRCH) => match kill(target, signal) {
            Ok(()) => true,
            Err(Errno::ESRCH) => false,
            Err(e) => {
                warn!(pid, "Failed to send {:?}: {}", signal, e);
                true
            }
        },
        Err(e) => {
            warn!(pid, "Failed to send {:?} to process group: {}", signal, e);
            true
        }
    }
}

/// Kill anything still left in the group after its leader exited
fn sweep_group(pid: u32) {
    let group = Pid::from_raw(pid as i32);
    if killpg(group, None).is_ok() {
        debug!(pid, "Killing leftover members of process group");
        let _ = killpg(group, Signal::SIGKILL);
    }
}

/// SIGKILL every process listening on `port`
///
/// Pre-forked workers share the listening socket, so each holder is killed,
/// with its group when it leads one.
pub(super) async fn kill_port_owner(port: u16) -> Result<Vec<u32>, ProcessError> {
    let pids = find_listener_pids(port)
        .await
        .map_err(|source| ProcessError::PortLookup { port, source })?;

    let own_pid = std::process::id();
    let own_group = getpgid(None).ok();
    let mut killed = Vec::new();

    for pid in pids.into_iter().filter(|&pid| pid != own_pid) {
        let target = Pid::from_raw(pid as i32);
        let result = match getpgid(Some(target)) {
            Ok(group) if group == target && Some(group) != own_group => {
                killpg(group, Signal::SIGKILL)
            }
            _ => kill(target, Signal::SIGKILL),
        };

        match result {
            Ok(()) | Err(Errno::ESRCH) => {
                info!(port, pid, "Killed process holding the port");
                killed.push(pid);
            }
            Err(e) => warn!(port, pid, "Failed to kill process holding the port: {}", e),
        }
    }

    if killed.is_empty() {
        debug!(port, "No foreign process listening could be killed");
    }
    Ok(killed)
}

#[cfg(target_os = "linux")]
async fn find_listener_pids(port: u16) -> std::io::Result<Vec<u32>> {
    use std::collections::HashSet;
    use std::io::ErrorKind;

    let mut inodes = HashSet::new();
    for table in ["/proc/net/tcp", "/proc/net/tcp6"] {
        match std::fs::read_to_string(table) {
            Ok(contents) => inodes.extend(parse_listening_inodes(&contents, port)),
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        }
    }

    if inodes.is_empty() {
        return Ok(Vec::new());
    }

    let mut pids = Vec::new();
    for entry in std::fs::read_dir("/proc")?.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        // Other users' fd tables are unreadable
        let Ok(fds) = std::fs::read_dir(entry.path().join("fd")) else {
            continue;
        };
        let owns_socket = fds.flatten().any(|fd| {
            std::fs::read_link(fd.path())
                .ok()
                .and_then(|link| socket_inode(&link.to_string_lossy()))
                .is_some_and(|inode| inodes.contains(&inode))
        });
        if owns_socket {
            pids.push(pid);
        }
    }

    Ok(pids)
}

#[cfg(not(target_os = "linux"))]
async fn find_listener_pids(port: u16) -> std::io::Result<Vec<u32>> {
    let output = Command::new("lsof")
        .args(["-nP", "-t", &format!("-iTCP:{}", port), "-sTCP:LISTEN"])
        .output()
        .await?;

    // lsof exits 1 when nothing matches
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect())
}

/// Socket inodes in LISTEN state bound to `port` from a `/proc/net/tcp` table
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_listening_inodes(table: &str, port: u16) -> Vec<u64> {
    const TCP_LISTEN: &str = "0A";

    table
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let (_, port_hex) = fields.get(1)?.rsplit_once(':')?;
            let local_port = u16::from_str_radix(port_hex, 16).ok()?;
            let state = *fields.get(3)?;
            let inode: u64 = fields.get(9)?.parse().ok()?;
            (local_port == port && state == TCP_LISTEN && inode != 0).then_some(inode)
        })
        .collect()
}

/// Parse `socket:[12345]` fd link targets
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn socket_inode(link: &str) -> Option<u64> {
    link.strip_prefix("socket:[")?.strip_suffix(']')?.parse().ok()
}
