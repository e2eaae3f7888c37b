//! Reset-on-activity debouncing
//!
//! Every event replaces the pending timer, so a trigger fires only once the
//! directories have been quiet for the full quiet period. Timers are tokio
//! tasks; each carries a token and re-checks it under the lock before firing,
//! which keeps a timer that lost the race with a newer event from firing.

use crate::event::ChangeEvent;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// Fired once per quiet burst of changes
#[derive(Debug, Clone)]
pub struct RestartTrigger {
    /// Number of events collapsed into this trigger
    pub burst_len: usize,
    pub last_event: ChangeEvent,
    pub fired_at: Instant,
}

/// The single scheduled-but-not-fired timer
struct PendingRestart {
    token: u64,
    deadline: Instant,
    last_event: ChangeEvent,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct DebounceState {
    next_token: u64,
    burst_len: usize,
    pending: Option<PendingRestart>,
}

struct DebouncerInner {
    quiet_period: Duration,
    runtime: Handle,
    state: Mutex<DebounceState>,
    fire_tx: mpsc::UnboundedSender<RestartTrigger>,
}

/// Collapses bursts of change events into single restart triggers
///
/// Cheap to clone; all clones share one timer.
#[derive(Clone)]
pub struct ChangeDebouncer {
    inner: Arc<DebouncerInner>,
}

impl ChangeDebouncer {
    /// Create a debouncer spawning timers on the current tokio runtime
    ///
    /// Panics outside a runtime context, like `tokio::spawn`.
    pub fn new(quiet_period: Duration) -> (Self, mpsc::UnboundedReceiver<RestartTrigger>) {
        Self::with_handle(quiet_period, Handle::current())
    }

    /// Create a debouncer spawning timers on `runtime`
    ///
    /// The handle lets `on_event` be called from threads outside the runtime.
    pub fn with_handle(
        quiet_period: Duration,
        runtime: Handle,
    ) -> (Self, mpsc::UnboundedReceiver<RestartTrigger>) {
        let (fire_tx, fire_rx) = mpsc::unbounded_channel();
        let inner = DebouncerInner {
            quiet_period,
            runtime,
            state: Mutex::new(DebounceState::default()),
            fire_tx,
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            fire_rx,
        )
    }

    pub fn quiet_period(&self) -> Duration {
        self.inner.quiet_period
    }

    /// Record a change and restart the quiet period
    pub fn on_event(&self, event: ChangeEvent) {
        let mut state = self.inner.state.lock();

        if let Some(previous) = state.pending.take() {
            previous.task.abort();
        }

        state.next_token += 1;
        state.burst_len += 1;
        let token = state.next_token;
        let deadline = Instant::now() + self.inner.quiet_period;

        debug!(
            token,
            burst = state.burst_len,
            "Change detected: {}, restart in {:?}",
            event,
            self.inner.quiet_period
        );

        let weak = Arc::downgrade(&self.inner);
        let task = self.inner.runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            fire(weak, token);
        });

        state.pending = Some(PendingRestart {
            token,
            deadline,
            last_event: event,
            task,
        });
    }

    /// Drop the pending timer, if any
    ///
    /// Returns true when a restart was pending.
    pub fn cancel(&self) -> bool {
        let mut state = self.inner.state.lock();
        state.burst_len = 0;
        match state.pending.take() {
            Some(pending) => {
                pending.task.abort();
                debug!(token = pending.token, "Pending restart cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.inner.state.lock().pending.is_some()
    }

    /// When the pending timer is due to fire
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.state.lock().pending.as_ref().map(|p| p.deadline)
    }
}

fn fire(inner: Weak<DebouncerInner>, token: u64) {
    let Some(inner) = inner.upgrade() else {
        return;
    };

    let trigger = {
        let mut state = inner.state.lock();
        // A newer event (or cancel) superseded this timer
        if state.pending.as_ref().map(|p| p.token) != Some(token) {
            return;
        }
        let Some(pending) = state.pending.take() else {
            return;
        };
        RestartTrigger {
            burst_len: std::mem::take(&mut state.burst_len),
            last_event: pending.last_event,
            fired_at: Instant::now(),
        }
    };

    info!(
        token,
        burst = trigger.burst_len,
        "Changes settled after {}",
        trigger.last_event
    );
    // Receiver gone means the supervisor is shutting down
    let _ = inner.fire_tx.send(trigger);
}
