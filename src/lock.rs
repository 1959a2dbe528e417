//! Exclusive lock files.
//!
//! Used to keep health passes from overlapping within a town, and to make
//! the file-backed work-item store's compare-and-swap atomic across
//! processes. The lock is an OS advisory lock (`fs2`) on a file that is
//! never removed; the kernel releases it when the holder exits, crashed or
//! not, so a left-behind file is simply reused.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use fs2::FileExt;

use crate::error::ExitError;

#[derive(Debug)]
pub struct LockFile {
    file: File,
    path: PathBuf,
}

impl LockFile {
    /// Try once. `Ok(None)` means another holder has it.
    pub fn try_acquire(path: &Path) -> anyhow::Result<Option<Self>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        // No truncate: the file may belong to the current holder.
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("opening lock {}", path.display()))?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(None),
            Err(e) => {
                return Err(anyhow::Error::new(e).context(format!("locking {}", path.display())));
            }
        }

        file.set_len(0).ok();
        let _ = writeln!(file, "{}", std::process::id());
        tracing::debug!(path = %path.display(), "lock acquired");
        Ok(Some(Self {
            file,
            path: path.to_path_buf(),
        }))
    }

    /// Acquire or fail immediately with [`ExitError::Busy`].
    pub fn acquire_now(path: &Path) -> anyhow::Result<Self> {
        Self::try_acquire(path)?.ok_or_else(|| {
            ExitError::Busy {
                path: path.display().to_string(),
            }
            .into()
        })
    }

    /// Retry until `wait` elapses.
    pub fn acquire_within(path: &Path, wait: Duration) -> anyhow::Result<Self> {
        let start = Instant::now();
        loop {
            if let Some(lock) = Self::try_acquire(path)? {
                return Ok(lock);
            }
            if start.elapsed() >= wait {
                return Err(ExitError::Timeout {
                    tool: format!("lock {}", path.display()),
                    timeout_secs: wait.as_secs(),
                }
                .into());
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
