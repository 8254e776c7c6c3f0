use crate::CacheError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;

/// Exclusive advisory lock on one cache key, held across processes.
///
/// Released when dropped.
pub struct KeyLock {
    lock_file: File,
}

fn open_lock_file(lock_path: &Path) -> Result<File, CacheError> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(lock_path)?)
}

impl KeyLock {
    pub fn acquire(lock_path: &Path) -> Result<Self, CacheError> {
        let file = open_lock_file(lock_path)?;
        file.lock_exclusive()
            .map_err(|e| CacheError::LockFailed(format!("{}: {e}", lock_path.display())))?;
        Ok(Self { lock_file: file })
    }

    pub fn try_acquire(lock_path: &Path) -> Result<Option<Self>, CacheError> {
        let file = open_lock_file(lock_path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { lock_file: file })),
            Err(_) => Ok(None),
        }
    }
}

impl Drop for KeyLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}
