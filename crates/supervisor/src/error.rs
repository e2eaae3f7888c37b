use thiserror::Error;
use watcher::WatchError;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to start watching: {0}")]
    Watch(#[from] WatchError),
}
