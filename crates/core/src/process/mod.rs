//! Child process launch and process-tree termination
//!
//! The OS-specific primitives live in `platform` modules; callers depend only
//! on the [`ProcessControl`] trait so restart logic can be exercised against
//! fakes.

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as platform;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use windows as platform;

use crate::error::ProcessError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// How often exit is re-checked for handles without an OS child
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Everything needed to launch the supervised server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Prepended to each forwarded output line
    pub output_prefix: String,
}

impl LaunchSpec {
    /// Command line for log messages
    pub fn display_command(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A launched process
///
/// Holds the OS child when this supervisor spawned it; handles built from a
/// bare pid are tracked by polling.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    child: Option<Child>,
    started_at: DateTime<Utc>,
}

impl ProcessHandle {
    /// Wrap a spawned child, `None` if it already exited
    pub fn from_child(child: Child) -> Option<Self> {
        let pid = child.id()?;
        Some(Self {
            pid,
            child: Some(child),
            started_at: Utc::now(),
        })
    }

    /// Track a process by pid alone
    pub fn detached(pid: u32) -> Self {
        Self {
            pid,
            child: None,
            started_at: Utc::now(),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Non-blocking exit check
    pub fn has_exited(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => !matches!(child.try_wait(), Ok(None)),
            None => !platform::is_alive(self.pid),
        }
    }

    /// Wait up to `timeout` for the process to exit
    ///
    /// Returns true if it exited.
    pub async fn wait_exit(&mut self, timeout: Duration) -> bool {
        match self.child.as_mut() {
            Some(child) => match tokio::time::timeout(timeout, child.wait()).await {
                Ok(Ok(status)) => {
                    debug!("Process {} exited with {}", self.pid, status);
                    true
                }
                Ok(Err(e)) => {
                    warn!("Failed to wait for process {}: {}", self.pid, e);
                    !platform::is_alive(self.pid)
                }
                Err(_) => false,
            },
            None => {
                let deadline = tokio::time::Instant::now() + timeout;
                loop {
                    if !platform::is_alive(self.pid) {
                        return true;
                    }
                    if tokio::time::Instant::now() >= deadline {
                        return false;
                    }
                    tokio::time::sleep(EXIT_POLL_INTERVAL).await;
                }
            }
        }
    }
}

/// How a tree termination ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationOutcome {
    /// Nothing to do, the process was already gone
    AlreadyExited,
    /// Exited after the cooperative signal
    Graceful,
    /// Exited only after the forced kill
    Forced,
    /// Still running (or unknown) after both attempts
    Unconfirmed,
}

impl TerminationOutcome {
    pub fn is_confirmed(self) -> bool {
        !matches!(self, Self::Unconfirmed)
    }
}

/// OS process primitives used by the restart coordinator
#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Launch the server with its output forwarded to ours
    async fn spawn(&self, launch: &LaunchSpec) -> Result<ProcessHandle, ProcessError>;

    /// Stop the process and all its descendants
    ///
    /// Gracefully first, forcefully after `graceful_timeout`. Best effort:
    /// failures are logged and reported as [`TerminationOutcome::Unconfirmed`].
    async fn terminate_tree(
        &self,
        handle: &mut ProcessHandle,
        graceful_timeout: Duration,
    ) -> TerminationOutcome;

    /// Force-kill every process listening on `port`
    ///
    /// Returns the pids that were killed, empty when no owner was found.
    async fn kill_port_owner(&self, port: u16) -> Result<Vec<u32>, ProcessError>;
}

/// Real [`ProcessControl`] backed by the host OS
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessTree;

impl ProcessTree {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessControl for ProcessTree {
    async fn spawn(&self, launch: &LaunchSpec) -> Result<ProcessHandle, ProcessError> {
        let mut command = Command::new(&launch.command);
        command
            .args(&launch.args)
            .current_dir(&launch.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        platform::isolate(&mut command);

        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            command: launch.display_command(),
            working_dir: launch.working_dir.clone(),
            source,
        })?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(
                stdout,
                tokio::io::stdout(),
                OutputStream::Stdout,
                launch.output_prefix.clone(),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(
                stderr,
                tokio::io::stderr(),
                OutputStream::Stderr,
                launch.output_prefix.clone(),
            ));
        }

        let handle = ProcessHandle::from_child(child).ok_or_else(|| ProcessError::MissingPid {
            command: launch.display_command(),
        })?;

        info!(
            pid = handle.pid(),
            "Started `{}` in {}",
            launch.display_command(),
            launch.working_dir.display()
        );
        Ok(handle)
    }

    async fn terminate_tree(
        &self,
        handle: &mut ProcessHandle,
        graceful_timeout: Duration,
    ) -> TerminationOutcome {
        platform::terminate_tree(handle, graceful_timeout).await
    }

    async fn kill_port_owner(&self, port: u16) -> Result<Vec<u32>, ProcessError> {
        platform::kill_port_owner(port).await
    }
}

#[derive(Debug, Clone, Copy)]
enum OutputStream {
    Stdout,
    Stderr,
}

/// Copy child output to `writer` byte for byte, prefixing each line
///
/// Output need not be UTF-8. The pipe is drained until EOF even if `writer`
/// fails, so the child never sees a closed pipe.
async fn forward_output<R, W>(reader: R, mut writer: W, stream: OutputStream, prefix: String)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::with_capacity(256);
    let mut out = Vec::with_capacity(256);
    let mut writable = true;

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) if writable => {
                out.clear();
                out.extend_from_slice(prefix.as_bytes());
                out.extend_from_slice(&line);
                let written = match writer.write_all(&out).await {
                    Ok(()) => writer.flush().await,
                    Err(e) => Err(e),
                };
                if let Err(e) = written {
                    warn!("Discarding child {:?} from now on: {}", stream, e);
                    writable = false;
                }
            }
            Ok(_) => {}
            Err(e) => {
                debug!("Stopped forwarding {:?}: {}", stream, e);
                break;
            }
        }
    }
}
