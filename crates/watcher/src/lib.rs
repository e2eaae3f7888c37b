//! File system watching for respawn
//!
//! This crate turns raw file notifications into restart triggers:
//! - One recursive watcher per directory, filtered by extension and ignore rules
//! - Reset-on-activity debouncing (one trigger per quiet period)
//! - Optional periodic reconciliation for missed events

pub mod debounce;
pub mod error;
pub mod event;
pub mod filter;
pub mod reconcile;
pub mod watch;

pub use debounce::{ChangeDebouncer, RestartTrigger};
pub use error::WatchError;
pub use event::{ChangeEvent, ChangeKind};
pub use filter::WatchFilter;
pub use reconcile::PeriodicReconciler;
pub use watch::{DirectoryWatcher, WatchSet};
