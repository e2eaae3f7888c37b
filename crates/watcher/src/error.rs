//! Watcher error types

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to watch {}: {source}", path.display())]
    Notify {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("invalid ignore rules for {}: {source}", path.display())]
    Ignore {
        path: PathBuf,
        #[source]
        source: ignore::Error,
    },

    #[error("cannot resolve watch directory {}: {source}", path.display())]
    Resolve {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start event pump: {0}")]
    Pump(#[source] std::io::Error),
}
