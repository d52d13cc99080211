//! Advisory file locks guarding the state store and the host objects it
//! describes.
//!
//! Single-VPC verbs take the global lock shared plus their VPC's lock
//! exclusive; verbs that touch several VPCs (peer, apply-policy,
//! delete-vpc, teardown-all) take the global lock exclusive. Acquisition
//! retries until the configured timeout, then surfaces busy.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::fcntl::{Flock, FlockArg};

const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Lock files live next to the state files they guard.
pub struct LockPaths {
    dir: PathBuf,
}

impl LockPaths {
    pub fn new(state_dir: &Path) -> Self {
        Self { dir: state_dir.to_path_buf() }
    }

    pub fn global(&self) -> PathBuf {
        self.dir.join(".vpcctl.lock")
    }

    pub fn vpc(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.lock"))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("busy: another vpcctl invocation holds {0}")]
    Busy(String),

    #[error("lock {path}: {detail}")]
    Io { path: String, detail: String },
}

pub async fn acquire_exclusive(path: PathBuf, timeout: Duration) -> Result<Flock<File>, LockError> {
    acquire(path, FlockArg::LockExclusiveNonblock, timeout).await
}

pub async fn acquire_shared(path: PathBuf, timeout: Duration) -> Result<Flock<File>, LockError> {
    acquire(path, FlockArg::LockSharedNonblock, timeout).await
}

async fn acquire(
    path: PathBuf,
    arg: FlockArg,
    timeout: Duration,
) -> Result<Flock<File>, LockError> {
    let io_error = |detail: String| LockError::Io { path: path.display().to_string(), detail };
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let attempt_path = path.clone();
        let attempt = tokio::task::spawn_blocking(move || try_lock(&attempt_path, arg))
            .await
            .map_err(|e| io_error(e.to_string()))?;
        match attempt {
            Ok(Some(guard)) => return Ok(guard),
            Ok(None) => {
                if tokio::time::Instant::now() >= deadline {
                    return Err(LockError::Busy(path.display().to_string()));
                }
                tokio::time::sleep(RETRY_INTERVAL).await;
            }
            Err(e) => return Err(io_error(e.to_string())),
        }
    }
}

/// One non-blocking attempt. `Ok(None)` means the lock is held elsewhere.
fn try_lock(path: &Path, arg: FlockArg) -> io::Result<Option<Flock<File>>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::options()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)?;
    match Flock::lock(file, arg) {
        Ok(guard) => Ok(Some(guard)),
        Err((_file, nix::errno::Errno::EWOULDBLOCK)) => Ok(None),
        Err((_file, errno)) => Err(io::Error::from_raw_os_error(errno as i32)),
    }
}
