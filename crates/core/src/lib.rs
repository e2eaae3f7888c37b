//! Core building blocks for respawn
//!
//! This crate provides:
//! - Port availability probing (bind-and-release)
//! - Process tree launch and termination behind the `ProcessControl` interface
//! - Supervisor configuration with startup precondition checks
//! - Shared error types

pub mod config;
pub mod error;
pub mod port;
pub mod process;

// Re-exports
pub use config::{ServerConfig, SupervisorConfig, Timings, WatchConfig, CONFIG_FILE_NAME};
pub use error::{ConfigError, ProcessError};
pub use port::PortProbe;
pub use process::{
    LaunchSpec, ProcessControl, ProcessHandle, ProcessTree, TerminationOutcome,
};
