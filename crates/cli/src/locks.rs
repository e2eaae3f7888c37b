//! Single-instance lock
//!
//! One supervisor per instance name: the lock lives at
//! `<temp dir>/<instance_name>.lock` and records who holds it.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Held for the supervisor's lifetime; the file is removed on drop
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    #[allow(dead_code)]
    file: File,
}

/// Lock file content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub port: u16,
    /// Milliseconds since the Unix epoch
    pub started_at: u64,
}

impl InstanceLock {
    /// Where the lock for `instance_name` lives
    pub fn lock_path(instance_name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("{}.lock", instance_name))
    }

    /// Acquire the lock for `instance_name`
    pub fn acquire(instance_name: &str, port: u16) -> Result<Self> {
        Self::acquire_at(&Self::lock_path(instance_name), port)
    }

    /// Acquire an exclusive lock at `path`
    ///
    /// Fails while another supervisor holds the flock, whatever the file
    /// says. A file left by a crashed holder carries no flock and is reused.
    pub fn acquire_at(path: &Path, port: u16) -> Result<Self> {
        loop {
            let mut file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .read(true)
                .write(true)
                .open(path)
                .with_context(|| format!("Failed to open lock file {}", path.display()))?;

            if !try_lock_exclusive(&file)? {
                match read_lock_info(&mut file) {
                    Ok(info) => anyhow::bail!(
                        "respawn is already running (pid {}, port {})",
                        info.pid,
                        info.port
                    ),
                    // Holder has locked but not yet written its info
                    Err(_) => anyhow::bail!(
                        "another respawn instance is starting (lock {})",
                        path.display()
                    ),
                }
            }

            // The previous holder unlinked the file between our open and flock
            if !still_linked(&file, path) {
                tracing::debug!("Lock file {} was replaced, retrying", path.display());
                continue;
            }

            write_lock_info(&mut file, port)?;
            return Ok(Self {
                path: path.to_path_buf(),
                file,
            });
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read who holds the lock at `path`
    pub fn read_info(path: &Path) -> Result<LockInfo> {
        let mut file = File::open(path)
            .with_context(|| format!("Failed to open lock file {}", path.display()))?;
        read_lock_info(&mut file)
    }

    /// Release the lock and remove the file
    pub fn release(self) -> Result<()> {
        std::fs::remove_file(&self.path).context("Failed to remove lock file")?;
        Ok(())
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn write_lock_info(file: &mut File, port: u16) -> Result<()> {
    let info = LockInfo {
        pid: std::process::id(),
        port,
        started_at: current_timestamp_ms(),
    };

    let serialized = serde_json::to_string(&info).context("Failed to serialize lock content")?;

    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(serialized.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

fn read_lock_info(file: &mut File) -> Result<LockInfo> {
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).context("Failed to deserialize lock content")
}

/// Non-blocking exclusive flock; false when someone else holds it
#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> Result<bool> {
    use nix::fcntl::{flock, FlockArg};
    use std::os::unix::io::AsRawFd;

    match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
        Ok(()) => Ok(true),
        Err(nix::errno::Errno::EWOULDBLOCK) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

// No advisory locking; the file only records the holder
#[cfg(not(unix))]
fn try_lock_exclusive(_file: &File) -> Result<bool> {
    Ok(true)
}

/// Whether `path` still names the inode behind `file`
#[cfg(unix)]
fn still_linked(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (file.metadata(), std::fs::metadata(path)) {
        (Ok(held), Ok(current)) => held.dev() == current.dev() && held.ino() == current.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn still_linked(_file: &File, path: &Path) -> bool {
    path.exists()
}

fn current_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_acquisition() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("respawn.lock");

        let lock1 = InstanceLock::acquire_at(&path, 8000).unwrap();

        // Held by a live process (us)
        let err = InstanceLock::acquire_at(&path, 8000).unwrap_err();
        assert!(err.to_string().contains("already running"), "{}", err);
        assert!(err.to_string().contains(&std::process::id().to_string()));

        drop(lock1);
        assert!(!path.exists());

        let lock3 = InstanceLock::acquire_at(&path, 8000);
        assert!(lock3.is_ok());
    }

    #[test]
    fn test_lock_content() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("respawn.lock");

        let _lock = InstanceLock::acquire_at(&path, 8123).unwrap();
        let info = InstanceLock::read_info(&path).unwrap();

        assert_eq!(info.pid, std::process::id());
        assert_eq!(info.port, 8123);
        assert!(info.started_at > 0);
    }

    #[test]
    fn test_lock_release() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("respawn.lock");

        let lock = InstanceLock::acquire_at(&path, 8000).unwrap();
        assert!(lock.path().exists());

        lock.release().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_leftover_unlocked_file_is_reused() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("respawn.lock");
        // A crashed holder leaves the file but not the flock
        std::fs::write(&path, r#"{"pid":999999999,"port":8000,"started_at":1}"#).unwrap();

        let _lock = InstanceLock::acquire_at(&path, 9000).unwrap();
        let info = InstanceLock::read_info(&path).unwrap();
        assert_eq!(info.pid, std::process::id());
        assert_eq!(info.port, 9000);
    }

    #[test]
    fn test_lock_path_uses_instance_name() {
        let path = InstanceLock::lock_path("my-api");
        assert_eq!(path.file_name().unwrap(), "my-api.lock");
    }

    #[test]
    fn test_locked_empty_file_is_not_taken_over() {
        use nix::fcntl::{flock, FlockArg};
        use std::os::unix::io::AsRawFd;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("respawn.lock");

        // Another instance has the flock but has not written its info yet
        let holder = File::create(&path).unwrap();
        flock(holder.as_raw_fd(), FlockArg::LockExclusiveNonblock).unwrap();

        let err = InstanceLock::acquire_at(&path, 8000).unwrap_err();
        assert!(err.to_string().contains("starting"), "{}", err);
        // The holder's file is left alone
        assert!(path.exists());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");

        drop(holder);
        let lock = InstanceLock::acquire_at(&path, 8000).unwrap();
        assert_eq!(InstanceLock::read_info(lock.path()).unwrap().port, 8000);
    }

    #[test]
    fn test_locked_file_reports_holder() {
        use nix::fcntl::{flock, FlockArg};
        use std::os::unix::io::AsRawFd;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("respawn.lock");
        std::fs::write(&path, r#"{"pid":4242,"port":8500,"started_at":1}"#).unwrap();

        let holder = File::open(&path).unwrap();
        flock(holder.as_raw_fd(), FlockArg::LockExclusiveNonblock).unwrap();

        let err = InstanceLock::acquire_at(&path, 8000).unwrap_err();
        assert!(err.to_string().contains("pid 4242, port 8500"), "{}", err);
        assert!(path.exists());
    }
}
