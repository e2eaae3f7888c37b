//! Restart coordination for respawn
//!
//! `RestartCoordinator` owns the supervised child and serializes every
//! stop/port-wait/start cycle. `Supervisor` wires the watchers and the
//! debouncer to it.

pub mod coordinator;
pub mod error;
pub mod supervisor;

pub use coordinator::{
    AbortReason, CoordinatorStats, RestartCoordinator, RestartOutcome, RestartState,
    SupervisedProcess,
};
pub use error::SupervisorError;
pub use supervisor::Supervisor;
