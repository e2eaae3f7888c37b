//! Supervise the server until interrupted

use anyhow::{Context, Result};
use cli_lib::{load_config, ConfigOverrides, InstanceLock};
use respawn_core::ProcessTree;
use std::path::PathBuf;
use std::sync::Arc;
use supervisor::Supervisor;
use tracing::info;

pub async fn run(config_path: Option<PathBuf>, overrides: ConfigOverrides) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;

    let mut config = load_config(config_path.as_deref(), &cwd)?;
    overrides.apply(&mut config, &cwd);
    config.validate().context("Cannot start")?;

    // Before any child exists, so an early Ctrl-C still goes through shutdown
    let mut signals = ShutdownSignals::install()?;
    let lock = InstanceLock::acquire(&config.instance_name, config.server.port)?;

    info!(
        port = config.server.port,
        "Supervising {} in {}",
        config.launch_spec().display_command(),
        config.server.working_dir.display()
    );

    let supervisor = Supervisor::start(&config, Arc::new(ProcessTree::new()))
        .await
        .context("Failed to start supervisor")?;

    signals.recv().await;

    supervisor.shutdown().await;
    lock.release()?;
    info!("Stopped");
    Ok(())
}

/// SIGINT and SIGTERM, registered up front
#[cfg(unix)]
struct ShutdownSignals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl ShutdownSignals {
    fn install() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())
                .context("Failed to install SIGINT handler")?,
            terminate: signal(SignalKind::terminate())
                .context("Failed to install SIGTERM handler")?,
        })
    }

    async fn recv(&mut self) {
        tokio::select! {
            _ = self.interrupt.recv() => info!("Received SIGINT, shutting down"),
            _ = self.terminate.recv() => info!("Received SIGTERM, shutting down"),
        }
    }
}

#[cfg(windows)]
struct ShutdownSignals {
    ctrl_c: tokio::signal::windows::CtrlC,
}

#[cfg(windows)]
impl ShutdownSignals {
    fn install() -> Result<Self> {
        Ok(Self {
            ctrl_c: tokio::signal::windows::ctrl_c().context("Failed to listen for Ctrl-C")?,
        })
    }

    async fn recv(&mut self) {
        self.ctrl_c.recv().await;
        info!("Received Ctrl-C, shutting down");
    }
}
