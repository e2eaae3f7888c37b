//! The restart state machine
//!
//! One cycle at a time, under a single async mutex:
//! stop the tree, wait for the port, escalate once with kill-by-port,
//! then start. A cycle never starts a child while the port is bound.

use respawn_core::{
    LaunchSpec, PortProbe, ProcessControl, ProcessHandle, SupervisorConfig, Timings,
};
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};
use ulid::Ulid;

/// Where the coordinator is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartState {
    Idle,
    Stopping,
    WaitingForPort,
    Escalating,
    Starting,
}

impl fmt::Display for RestartState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RestartState::Idle => "idle",
            RestartState::Stopping => "stopping",
            RestartState::WaitingForPort => "waiting for port",
            RestartState::Escalating => "escalating",
            RestartState::Starting => "starting",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The port never became bindable, even after killing its owner
    PortStillBound,
    SpawnFailed,
}

/// Result of one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartOutcome {
    Started { pid: u32 },
    Aborted { reason: AbortReason },
    /// The coordinator was already shut down
    Skipped,
}

/// The one live child
#[derive(Debug)]
pub struct SupervisedProcess {
    pub handle: ProcessHandle,
    pub port: u16,
}

impl SupervisedProcess {
    pub fn pid(&self) -> u32 {
        self.handle.pid()
    }
}

/// Cycle counters
#[derive(Debug, Default)]
pub struct CoordinatorStats {
    completed: AtomicU64,
    aborted: AtomicU64,
    escalated: AtomicU64,
}

impl CoordinatorStats {
    /// Cycles (initial start included) that ended with a running child
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn aborted(&self) -> u64 {
        self.aborted.load(Ordering::Relaxed)
    }

    /// Cycles that had to kill the port owner
    pub fn escalated(&self) -> u64 {
        self.escalated.load(Ordering::Relaxed)
    }

    fn record(&self, outcome: RestartOutcome) {
        match outcome {
            RestartOutcome::Started { .. } => self.completed.fetch_add(1, Ordering::Relaxed),
            RestartOutcome::Aborted { .. } => self.aborted.fetch_add(1, Ordering::Relaxed),
            RestartOutcome::Skipped => return,
        };
    }
}

#[derive(Debug, Default)]
struct Slot {
    process: Option<SupervisedProcess>,
    shut_down: bool,
}

/// Sole owner of the supervised child
pub struct RestartCoordinator {
    control: Arc<dyn ProcessControl>,
    probe: PortProbe,
    launch: LaunchSpec,
    port: u16,
    port_wait_timeout: Duration,
    graceful_timeout: Duration,
    slot: Mutex<Slot>,
    state_tx: watch::Sender<RestartState>,
    /// Mirrors the slot's pid (0 = none) so readers never wait on a cycle
    current_pid: AtomicU32,
    stats: CoordinatorStats,
}

impl RestartCoordinator {
    pub fn new(
        control: Arc<dyn ProcessControl>,
        launch: LaunchSpec,
        port: u16,
        probe: PortProbe,
        timings: &Timings,
    ) -> Self {
        let (state_tx, _) = watch::channel(RestartState::Idle);
        Self {
            control,
            probe,
            launch,
            port,
            port_wait_timeout: timings.port_wait_timeout(),
            graceful_timeout: timings.graceful_timeout(),
            slot: Mutex::new(Slot::default()),
            state_tx,
            current_pid: AtomicU32::new(0),
            stats: CoordinatorStats::default(),
        }
    }

    pub fn from_config(config: &SupervisorConfig, control: Arc<dyn ProcessControl>) -> Self {
        let probe = PortProbe::for_host(&config.server.host, config.timing.poll_interval());
        Self::new(
            control,
            config.launch_spec(),
            config.server.port,
            probe,
            &config.timing,
        )
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> RestartState {
        *self.state_tx.borrow()
    }

    /// Follow state transitions
    pub fn subscribe(&self) -> watch::Receiver<RestartState> {
        self.state_tx.subscribe()
    }

    pub fn current_pid(&self) -> Option<u32> {
        match self.current_pid.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }

    pub fn stats(&self) -> &CoordinatorStats {
        &self.stats
    }

    /// Launch the first instance without any stop or port wait
    pub async fn start_initial(&self) -> RestartOutcome {
        let cycle = Ulid::new();
        let mut slot = self.slot.lock().await;
        if slot.shut_down {
            return RestartOutcome::Skipped;
        }
        if let Some(process) = &slot.process {
            debug!(cycle = %cycle, pid = process.pid(), "Server already running");
            return RestartOutcome::Started { pid: process.pid() };
        }

        let outcome = self.spawn(&mut slot, cycle).await;
        self.set_state(RestartState::Idle);
        self.stats.record(outcome);
        outcome
    }

    /// Run one full stop, port-wait, start cycle
    ///
    /// Concurrent callers queue on the coordinator lock and run back to back.
    /// Failures are logged and reported in the outcome.
    pub async fn restart(&self) -> RestartOutcome {
        let cycle = Ulid::new();
        let mut slot = self.slot.lock().await;
        if slot.shut_down {
            debug!(cycle = %cycle, "Coordinator shut down, skipping restart");
            return RestartOutcome::Skipped;
        }

        info!(cycle = %cycle, port = self.port, "Restart cycle started");
        let outcome = self.run_cycle(&mut slot, cycle).await;
        self.set_state(RestartState::Idle);
        self.stats.record(outcome);

        info!(cycle = %cycle, "Restart cycle finished: {:?}", outcome);
        outcome
    }

    /// Stop the current tree and refuse all later cycles
    pub async fn shutdown(&self) {
        let mut slot = self.slot.lock().await;
        if slot.shut_down {
            return;
        }
        slot.shut_down = true;

        if let Some(mut process) = slot.process.take() {
            self.set_state(RestartState::Stopping);
            self.current_pid.store(0, Ordering::SeqCst);
            info!(pid = process.pid(), "Stopping server");
            let outcome = self
                .control
                .terminate_tree(&mut process.handle, self.graceful_timeout)
                .await;
            if !outcome.is_confirmed() {
                warn!(pid = process.pid(), "Server may still be running after shutdown");
            }
        }

        self.set_state(RestartState::Idle);
        info!("Coordinator shut down");
    }

    async fn run_cycle(&self, slot: &mut Slot, cycle: Ulid) -> RestartOutcome {
        if let Some(mut process) = slot.process.take() {
            self.set_state(RestartState::Stopping);
            self.current_pid.store(0, Ordering::SeqCst);

            let pid = process.pid();
            let outcome = self
                .control
                .terminate_tree(&mut process.handle, self.graceful_timeout)
                .await;
            if outcome.is_confirmed() {
                info!(cycle = %cycle, pid, step = "stop", "Server stopped: {:?}", outcome);
            } else {
                warn!(cycle = %cycle, pid, step = "stop", "Could not confirm the server exited");
            }
        }

        self.set_state(RestartState::WaitingForPort);
        if !self
            .probe
            .wait_until_available(self.port, self.port_wait_timeout)
            .await
        {
            warn!(
                cycle = %cycle,
                port = self.port,
                step = "wait",
                "Port still bound after {:?}, killing its owner",
                self.port_wait_timeout
            );
            self.set_state(RestartState::Escalating);
            self.stats.escalated.fetch_add(1, Ordering::Relaxed);

            match self.control.kill_port_owner(self.port).await {
                Ok(pids) if pids.is_empty() => {
                    warn!(cycle = %cycle, step = "escalate", "No port owner could be killed")
                }
                Ok(pids) => info!(cycle = %cycle, step = "escalate", ?pids, "Killed port owners"),
                Err(e) => warn!(cycle = %cycle, step = "escalate", "Port owner lookup failed: {}", e),
            }

            if !self
                .probe
                .wait_until_available(self.port, self.port_wait_timeout)
                .await
            {
                error!(
                    cycle = %cycle,
                    port = self.port,
                    step = "escalate",
                    "Port is still bound, leaving the server stopped until the next change"
                );
                return RestartOutcome::Aborted {
                    reason: AbortReason::PortStillBound,
                };
            }
        }

        self.spawn(slot, cycle).await
    }

    async fn spawn(&self, slot: &mut Slot, cycle: Ulid) -> RestartOutcome {
        self.set_state(RestartState::Starting);

        match self.control.spawn(&self.launch).await {
            Ok(handle) => {
                let pid = handle.pid();
                self.current_pid.store(pid, Ordering::SeqCst);
                slot.process = Some(SupervisedProcess {
                    handle,
                    port: self.port,
                });
                info!(
                    cycle = %cycle,
                    pid,
                    port = self.port,
                    step = "start",
                    "Started {}",
                    self.launch.display_command()
                );
                RestartOutcome::Started { pid }
            }
            Err(e) => {
                error!(cycle = %cycle, step = "start", "{}", e);
                RestartOutcome::Aborted {
                    reason: AbortReason::SpawnFailed,
                }
            }
        }
    }

    fn set_state(&self, state: RestartState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!("Coordinator state: {} -> {}", previous, state);
        }
    }
}
