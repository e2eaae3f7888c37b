//! Configuration loading plus command-line overrides

use anyhow::{Context, Result};
use respawn_core::{SupervisorConfig, CONFIG_FILE_NAME};
use std::path::{Path, PathBuf};

/// Values given on the command line, applied over the config file
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub port: Option<u16>,
    pub watch: Vec<PathBuf>,
    pub extensions: Vec<String>,
    pub debounce_ms: Option<u64>,
    pub working_dir: Option<PathBuf>,
    /// Command followed by its arguments
    pub command: Vec<String>,
}

impl ConfigOverrides {
    /// Apply to `config`, resolving relative paths against `base`
    pub fn apply(&self, config: &mut SupervisorConfig, base: &Path) {
        let absolute = |path: &PathBuf| {
            if path.is_relative() {
                base.join(path)
            } else {
                path.clone()
            }
        };

        if let Some(port) = self.port {
            config.server.port = port;
        }
        if !self.watch.is_empty() {
            config.watch.dirs = self.watch.iter().map(absolute).collect();
        }
        if !self.extensions.is_empty() {
            config.watch.extensions = self.extensions.clone();
        }
        if let Some(debounce_ms) = self.debounce_ms {
            config.timing.debounce_ms = debounce_ms;
        }
        if let Some(dir) = &self.working_dir {
            config.server.working_dir = absolute(dir);
        }
        if let Some((command, args)) = self.command.split_first() {
            config.server.command = command.clone();
            config.server.args = args.to_vec();
        }
    }
}

/// Load the configuration for a run rooted at `cwd`
///
/// An explicit `path` must exist; otherwise `respawn.toml` in `cwd` is used
/// when present, and the defaults when not.
pub fn load_config(path: Option<&Path>, cwd: &Path) -> Result<SupervisorConfig> {
    match path {
        Some(path) => {
            let path = if path.is_relative() {
                cwd.join(path)
            } else {
                path.to_path_buf()
            };
            SupervisorConfig::load(&path)
                .with_context(|| format!("Failed to load {}", path.display()))
        }
        None => SupervisorConfig::load_or_default(&cwd.join(CONFIG_FILE_NAME), cwd)
            .context("Failed to load configuration"),
    }
}
