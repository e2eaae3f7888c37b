//! Wiring: watchers -> debouncer -> restart worker -> coordinator

use crate::coordinator::{RestartCoordinator, RestartOutcome};
use crate::error::SupervisorError;
use respawn_core::{ProcessControl, SupervisorConfig};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use watcher::{ChangeDebouncer, PeriodicReconciler, RestartTrigger, WatchError, WatchSet};

/// A running supervisor
///
/// Only [`Supervisor::shutdown`] stops the server. Dropping a supervisor stops
/// watching and restarting but leaves the current child running.
pub struct Supervisor {
    coordinator: Arc<RestartCoordinator>,
    debouncer: ChangeDebouncer,
    watch_set: Option<WatchSet>,
    reconciler: Option<JoinHandle<()>>,
    worker: Option<JoinHandle<()>>,
}

impl Supervisor {
    /// Start the server and begin watching
    ///
    /// Expects a validated configuration. A failed initial start is logged and
    /// left for the next change to retry.
    pub async fn start(
        config: &SupervisorConfig,
        control: Arc<dyn ProcessControl>,
    ) -> Result<Self, SupervisorError> {
        let coordinator = Arc::new(RestartCoordinator::from_config(config, control));

        match coordinator.start_initial().await {
            RestartOutcome::Started { pid } => info!(pid, "Server running"),
            outcome => warn!("Initial start failed ({:?}), waiting for changes", outcome),
        }

        let (debouncer, triggers) = ChangeDebouncer::new(config.timing.debounce());
        let (watch_set, reconciler) = match start_watching(config, &debouncer) {
            Ok(watching) => watching,
            Err(e) => {
                coordinator.shutdown().await;
                return Err(e.into());
            }
        };

        let worker = tokio::spawn(restart_worker(Arc::clone(&coordinator), triggers));

        info!(
            dirs = config.watch.dirs.len(),
            port = config.server.port,
            "Watching for changes (debounce {:?})",
            config.timing.debounce()
        );

        Ok(Self {
            coordinator,
            debouncer,
            watch_set: Some(watch_set),
            reconciler,
            worker: Some(worker),
        })
    }

    pub fn coordinator(&self) -> &Arc<RestartCoordinator> {
        &self.coordinator
    }

    pub fn debouncer(&self) -> &ChangeDebouncer {
        &self.debouncer
    }

    /// Stop watching and stop the server
    ///
    /// An in-flight restart cycle completes first; nothing restarts afterwards.
    pub async fn shutdown(mut self) {
        info!("Shutting down");

        if let Some(watch_set) = self.watch_set.take() {
            // Joins the pump thread
            if tokio::task::spawn_blocking(move || watch_set.stop())
                .await
                .is_err()
            {
                warn!("Watcher shutdown panicked");
            }
        }
        if let Some(reconciler) = self.reconciler.take() {
            reconciler.abort();
        }
        self.debouncer.cancel();

        // Waits for any running cycle, then refuses new ones
        self.coordinator.shutdown().await;

        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        // `shutdown` clears the worker, so this is a drop without it
        if self.worker.is_some() {
            if let Some(pid) = self.coordinator.current_pid() {
                warn!(pid, "Supervisor dropped without shutdown, server left running");
            }
        }
        if let Some(reconciler) = self.reconciler.take() {
            reconciler.abort();
        }
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

fn start_watching(
    config: &SupervisorConfig,
    debouncer: &ChangeDebouncer,
) -> Result<(WatchSet, Option<JoinHandle<()>>), WatchError> {
    let watch_set = WatchSet::start(&config.watch, debouncer.clone())?;

    let reconciler = match config.timing.reconcile_interval() {
        Some(interval) => {
            let reconciler = PeriodicReconciler::new(&config.watch, interval, debouncer.clone())?;
            Some(tokio::spawn(reconciler.run()))
        }
        None => None,
    };

    Ok((watch_set, reconciler))
}

async fn restart_worker(
    coordinator: Arc<RestartCoordinator>,
    mut triggers: mpsc::UnboundedReceiver<RestartTrigger>,
) {
    while let Some(trigger) = triggers.recv().await {
        // Triggers that queued during the last cycle are covered by this one
        let mut burst_len = trigger.burst_len;
        while let Ok(extra) = triggers.try_recv() {
            burst_len += extra.burst_len;
        }

        info!(
            burst = burst_len,
            "Restarting after {}", trigger.last_event
        );
        match coordinator.restart().await {
            RestartOutcome::Skipped => break,
            outcome => debug!("Restart outcome: {:?}", outcome),
        }
    }
    debug!("Restart worker stopped");
}
