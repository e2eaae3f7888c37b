//! Shared fixtures: a fake server whose "processes" are real TCP listeners

#![allow(dead_code)]

use async_trait::async_trait;
use respawn_core::{
    LaunchSpec, PortProbe, ProcessControl, ProcessError, ProcessHandle, TerminationOutcome,
    Timings,
};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, TcpListener};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Fake pids start far above any real pid
const FIRST_FAKE_PID: u32 = 5_000_000;
const FOREIGN_PID: u32 = 4_999_999;

/// Process control that "runs" a server by binding its port
pub struct FakeServer {
    port: u16,
    /// Simulated time for a tree to exit after the stop request
    stop_delay: Duration,
    next_pid: AtomicU32,
    running: Mutex<HashMap<u32, TcpListener>>,
    /// Listener held by a process we never started
    occupant: Mutex<Option<TcpListener>>,
    occupant_killable: AtomicBool,
    fail_spawns: AtomicBool,
    spawns: AtomicUsize,
    max_live: AtomicUsize,
    /// Ordered "spawn N" / "stop N" records
    log: Mutex<Vec<String>>,
}

impl FakeServer {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            stop_delay: Duration::from_millis(0),
            next_pid: AtomicU32::new(FIRST_FAKE_PID),
            running: Mutex::new(HashMap::new()),
            occupant: Mutex::new(None),
            occupant_killable: AtomicBool::new(true),
            fail_spawns: AtomicBool::new(false),
            spawns: AtomicUsize::new(0),
            max_live: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn with_stop_delay(mut self, delay: Duration) -> Self {
        self.stop_delay = delay;
        self
    }

    /// Bind the port from "outside", as a stale server would
    pub fn occupy(&self, killable: bool) {
        let listener = TcpListener::bind(("127.0.0.1", self.port)).unwrap();
        *self.occupant.lock().unwrap() = Some(listener);
        self.occupant_killable.store(killable, Ordering::SeqCst);
    }

    pub fn release_occupant(&self) {
        self.occupant.lock().unwrap().take();
    }

    pub fn set_fail_spawns(&self, fail: bool) {
        self.fail_spawns.store(fail, Ordering::SeqCst);
    }

    pub fn spawns(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.running.lock().unwrap().len()
    }

    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessControl for FakeServer {
    async fn spawn(&self, launch: &LaunchSpec) -> Result<ProcessHandle, ProcessError> {
        let spawn_error = |source| ProcessError::Spawn {
            command: launch.display_command(),
            working_dir: launch.working_dir.clone(),
            source,
        };

        if self.fail_spawns.load(Ordering::SeqCst) {
            return Err(spawn_error(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no such interpreter",
            )));
        }

        // A bind failure here means a start overlapped a live instance
        let listener = TcpListener::bind(("127.0.0.1", self.port)).map_err(spawn_error)?;
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);

        let live = {
            let mut running = self.running.lock().unwrap();
            running.insert(pid, listener);
            running.len()
        };
        self.max_live.fetch_max(live, Ordering::SeqCst);
        self.spawns.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(format!("spawn {}", pid));

        Ok(ProcessHandle::detached(pid))
    }

    async fn terminate_tree(
        &self,
        handle: &mut ProcessHandle,
        _graceful_timeout: Duration,
    ) -> TerminationOutcome {
        let pid = handle.pid();
        self.log.lock().unwrap().push(format!("stop {}", pid));
        tokio::time::sleep(self.stop_delay).await;

        match self.running.lock().unwrap().remove(&pid) {
            Some(_) => TerminationOutcome::Graceful,
            None => TerminationOutcome::AlreadyExited,
        }
    }

    async fn kill_port_owner(&self, _port: u16) -> Result<Vec<u32>, ProcessError> {
        if !self.occupant_killable.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }
        Ok(self.occupant.lock().unwrap().take().map(|_| FOREIGN_PID).into_iter().collect())
    }
}

/// A port that was free a moment ago
pub fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

pub fn launch_spec() -> LaunchSpec {
    LaunchSpec {
        command: "python".into(),
        args: vec!["main.py".into()],
        working_dir: PathBuf::from("."),
        output_prefix: String::new(),
    }
}

pub fn fast_timings(port_wait_ms: u64) -> Timings {
    Timings {
        debounce_ms: 300,
        port_wait_timeout_ms: port_wait_ms,
        graceful_timeout_ms: 500,
        poll_interval_ms: 50,
        reconcile_interval_ms: 0,
    }
}

pub fn probe() -> PortProbe {
    PortProbe::new(IpAddr::V4(Ipv4Addr::LOCALHOST), Duration::from_millis(50))
}
