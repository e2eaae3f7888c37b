//! Error types shared across respawn crates

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while launching or locating processes
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The OS refused to launch the command
    #[error("failed to spawn `{command}` in {}: {source}", working_dir.display())]
    Spawn {
        command: String,
        working_dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The child started but exposed no process id (it exited immediately)
    #[error("spawned `{command}` but it exited before its pid could be read")]
    MissingPid { command: String },

    /// Looking up the owner of a port failed
    #[error("failed to look up the owner of port {port}: {source}")]
    PortLookup {
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while loading or validating configuration
///
/// All of these are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("working directory does not exist: {}", .0.display())]
    MissingWorkingDir(PathBuf),

    #[error("command `{command}` is not an executable on PATH: {source}")]
    CommandNotFound {
        command: String,
        #[source]
        source: which::Error,
    },

    #[error("no directories configured to watch")]
    NoWatchDirs,

    #[error("watch directory does not exist: {}", .0.display())]
    MissingWatchDir(PathBuf),

    #[error("port must be between 1 and 65535")]
    InvalidPort,
}
