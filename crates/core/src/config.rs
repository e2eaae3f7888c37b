//! Supervisor configuration
//!
//! Loaded from `respawn.toml`. Every field has a default, so an empty file
//! (or no file at all) describes the stock setup: `python main.py` run from
//! `backend/`, listening on port 8000, restarted on `*.py` changes under
//! `backend/` and `api/`.

use crate::error::ConfigError;
use crate::process::LaunchSpec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file name, looked up in the current directory
pub const CONFIG_FILE_NAME: &str = "respawn.toml";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Name of the system-wide single-instance lock
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub watch: WatchConfig,

    #[serde(default)]
    pub timing: Timings,
}

/// The supervised child server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interpreter or executable to launch
    #[serde(default = "default_command")]
    pub command: String,

    /// Fixed argument list
    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Directory the child runs in
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,

    /// Port the child listens on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Interface used when probing the port
    #[serde(default = "default_host")]
    pub host: String,

    /// Prepended to every forwarded output line (empty = verbatim)
    #[serde(default)]
    pub output_prefix: String,
}

/// Directories and files that trigger restarts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    #[serde(default = "default_watch_dirs")]
    pub dirs: Vec<PathBuf>,

    /// File extensions (without dot) that count as source changes; empty = all
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Honor `.gitignore` in each watched directory
    #[serde(default = "default_true")]
    pub use_gitignore: bool,

    /// Extra glob patterns to ignore
    #[serde(default)]
    pub additional_patterns: Vec<String>,
}

/// Timeouts and intervals, all in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timings {
    /// Quiet period before a burst of changes fires a restart
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// How long to wait for the port to free, per attempt
    #[serde(default = "default_port_wait_timeout_ms")]
    pub port_wait_timeout_ms: u64,

    /// How long to wait after a graceful (and again after a forced) kill
    #[serde(default = "default_graceful_timeout_ms")]
    pub graceful_timeout_ms: u64,

    /// Port probe cadence
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Periodic rescan for missed events (0 = off)
    #[serde(default)]
    pub reconcile_interval_ms: u64,
}

impl Timings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn port_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.port_wait_timeout_ms)
    }

    pub fn graceful_timeout(&self) -> Duration {
        Duration::from_millis(self.graceful_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// `None` when reconciliation is disabled
    pub fn reconcile_interval(&self) -> Option<Duration> {
        (self.reconcile_interval_ms > 0).then(|| Duration::from_millis(self.reconcile_interval_ms))
    }
}

impl SupervisorConfig {
    /// Load configuration from a TOML file
    ///
    /// Relative paths in the file are resolved against the file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let base = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        config.resolve_relative_to(base);
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults rooted at `base`
    pub fn load_or_default(path: &Path, base: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            let mut config = Self::default();
            config.resolve_relative_to(base);
            Ok(config)
        }
    }

    /// Make working and watch directories absolute
    pub fn resolve_relative_to(&mut self, base: &Path) {
        if self.server.working_dir.is_relative() {
            self.server.working_dir = base.join(&self.server.working_dir);
        }
        for dir in &mut self.watch.dirs {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
    }

    /// Check startup preconditions
    ///
    /// Fails when the working directory is missing, the command cannot be
    /// resolved to an executable, there is nothing to watch, or the port is 0.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        if !self.server.working_dir.is_dir() {
            return Err(ConfigError::MissingWorkingDir(self.server.working_dir.clone()));
        }

        self.resolve_command()?;

        if self.watch.dirs.is_empty() {
            return Err(ConfigError::NoWatchDirs);
        }
        if let Some(missing) = self.watch.dirs.iter().find(|d| !d.is_dir()) {
            return Err(ConfigError::MissingWatchDir(missing.clone()));
        }

        Ok(())
    }

    /// Resolve the configured command to an executable path
    ///
    /// Bare names are searched on PATH; relative paths are taken relative to
    /// the working directory.
    pub fn resolve_command(&self) -> Result<PathBuf, ConfigError> {
        which::which_in(
            &self.server.command,
            std::env::var_os("PATH"),
            &self.server.working_dir,
        )
        .map_err(|source| ConfigError::CommandNotFound {
            command: self.server.command.clone(),
            source,
        })
    }

    /// Describe how to launch the child
    pub fn launch_spec(&self) -> LaunchSpec {
        LaunchSpec {
            command: self.server.command.clone(),
            args: self.server.args.clone(),
            working_dir: self.server.working_dir.clone(),
            output_prefix: self.server.output_prefix.clone(),
        }
    }

    /// Serialize to TOML (used by `respawn init`)
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            instance_name: default_instance_name(),
            server: ServerConfig::default(),
            watch: WatchConfig::default(),
            timing: Timings::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: default_args(),
            working_dir: default_working_dir(),
            port: default_port(),
            host: default_host(),
            output_prefix: String::new(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            dirs: default_watch_dirs(),
            extensions: default_extensions(),
            use_gitignore: true,
            additional_patterns: vec![],
        }
    }
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            port_wait_timeout_ms: default_port_wait_timeout_ms(),
            graceful_timeout_ms: default_graceful_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            reconcile_interval_ms: 0,
        }
    }
}

fn default_instance_name() -> String {
    "respawn".to_string()
}

fn default_command() -> String {
    "python".to_string()
}

fn default_args() -> Vec<String> {
    vec!["main.py".to_string()]
}

fn default_working_dir() -> PathBuf {
    PathBuf::from("backend")
}

fn default_port() -> u16 {
    8000
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_watch_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("backend"), PathBuf::from("api")]
}

fn default_extensions() -> Vec<String> {
    vec!["py".to_string()]
}

fn default_debounce_ms() -> u64 {
    1000
}

fn default_port_wait_timeout_ms() -> u64 {
    10_000
}

fn default_graceful_timeout_ms() -> u64 {
    3000
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_true() -> bool {
    true
}
