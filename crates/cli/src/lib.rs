//! Library side of the `respawn` binary, shared with its tests

pub mod locks;
pub mod logging;
pub mod settings;

pub use locks::{InstanceLock, LockInfo};
pub use settings::{load_config, ConfigOverrides};
