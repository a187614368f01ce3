//! Advisory file locks over a storage directory
//!
//! Writers take an exclusive lock, readers a shared one. On unix the lock is a
//! `flock(2)` on `<dir>/<name>.lock`, held by the open file description, so a
//! second handle conflicts even inside the same process. Other platforms fall
//! back to exclusive creation of the lock file, where shared locks behave like
//! exclusive ones.

use crate::{Error, Result};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Requested lock strength
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Single writer
    Exclusive,
    /// Any number of readers
    Shared,
}

/// Creates locks inside one directory
#[derive(Debug, Clone)]
pub struct LockFactory {
    dir: PathBuf,
}

impl LockFactory {
    /// Lock files are created in `dir`
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn lock_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.lock"))
    }

    /// Try to obtain a lock without blocking
    ///
    /// Fails with `Error::Lock` if a conflicting lock is held.
    pub fn lock(&self, name: &str, mode: LockMode) -> Result<StorageLock> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.lock_path(name);
        let file = sys::acquire(&path, mode)?;
        tracing::debug!("Acquired {:?} lock {:?}", mode, path);
        Ok(StorageLock {
            path,
            mode,
            file: Mutex::new(Some(file)),
        })
    }

    /// Exclusive write lock
    pub fn lock_exclusive(&self, name: &str) -> Result<StorageLock> {
        self.lock(name, LockMode::Exclusive)
    }

    /// Shared read lock
    pub fn lock_shared(&self, name: &str) -> Result<StorageLock> {
        self.lock(name, LockMode::Shared)
    }

    /// Delete a lock file left behind by a dead process
    pub fn force_remove(&self, name: &str) -> Result<()> {
        let path = self.lock_path(name);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::warn!("Forcibly removed lock {:?}", path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::lock(format!("cannot remove {path:?}: {e}"))),
        }
    }
}

/// A held lock; released explicitly or on drop
#[derive(Debug)]
pub struct StorageLock {
    path: PathBuf,
    mode: LockMode,
    file: Mutex<Option<File>>,
}

impl StorageLock {
    /// Lock mode
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this handle still holds the lock
    pub fn is_held(&self) -> bool {
        self.file.lock().is_some()
    }

    /// Release the lock; calling it again is a no-op
    pub fn release(&self) -> Result<()> {
        let Some(file) = self.file.lock().take() else {
            return Ok(());
        };
        sys::release(&self.path, file)
    }
}

impl Drop for StorageLock {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!("Failed to release lock {:?}: {}", self.path, e);
        }
    }
}

#[cfg(unix)]
mod sys {
    use super::*;
    use std::io;
    use std::os::unix::io::AsRawFd;

    pub(super) fn acquire(path: &Path, mode: LockMode) -> Result<File> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let op = match mode {
            LockMode::Exclusive => libc::LOCK_EX,
            LockMode::Shared => libc::LOCK_SH,
        } | libc::LOCK_NB;
        loop {
            // SAFETY: the descriptor stays open for the duration of the call
            let res = unsafe { libc::flock(file.as_raw_fd(), op) };
            if res == 0 {
                return Ok(file);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::EWOULDBLOCK) => {
                    return Err(Error::lock(format!("{path:?} is locked by another holder")));
                }
                _ => return Err(Error::lock(format!("cannot lock {path:?}: {err}"))),
            }
        }
    }

    pub(super) fn release(path: &Path, file: File) -> Result<()> {
        // SAFETY: see `acquire`
        let res = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
        if res != 0 {
            let err = io::Error::last_os_error();
            return Err(Error::lock(format!("cannot unlock {path:?}: {err}")));
        }
        Ok(())
    }
}

#[cfg(not(unix))]
mod sys {
    use super::*;

    pub(super) fn acquire(path: &Path, _mode: LockMode) -> Result<File> {
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| Error::lock(format!("cannot lock {path:?}: {e}")))
    }

    pub(super) fn release(path: &Path, file: File) -> Result<()> {
        drop(file);
        std::fs::remove_file(path).map_err(|e| Error::lock(format!("cannot unlock {path:?}: {e}")))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_exclusive_excludes_everything() {
        let dir = TempDir::new().unwrap();
        let factory = LockFactory::new(dir.path());
        let writer = factory.lock_exclusive("graph").unwrap();
        assert!(writer.is_held());

        assert!(matches!(factory.lock_exclusive("graph"), Err(Error::Lock(_))));
        assert!(matches!(factory.lock_shared("graph"), Err(Error::Lock(_))));

        writer.release().unwrap();
        assert!(!writer.is_held());
        assert!(factory.lock_exclusive("graph").is_ok());
    }

    #[test]
    fn test_shared_locks_coexist() {
        let dir = TempDir::new().unwrap();
        let factory = LockFactory::new(dir.path());
        let r1 = factory.lock_shared("graph").unwrap();
        let r2 = factory.lock_shared("graph").unwrap();
        assert_eq!(r1.mode(), LockMode::Shared);
        assert!(factory.lock_exclusive("graph").is_err());

        drop(r1);
        assert!(factory.lock_exclusive("graph").is_err());
        drop(r2);
        assert!(factory.lock_exclusive("graph").is_ok());
    }

    #[test]
    fn test_release_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let factory = LockFactory::new(dir.path());
        let lock = factory.lock_exclusive("graph").unwrap();
        lock.release().unwrap();
        lock.release().unwrap();
        assert!(!lock.is_held());
    }

    #[test]
    fn test_force_remove() {
        let dir = TempDir::new().unwrap();
        let factory = LockFactory::new(dir.path());
        let lock = factory.lock_exclusive("graph").unwrap();
        assert!(lock.path().exists());
        lock.release().unwrap();

        factory.force_remove("graph").unwrap();
        assert!(!dir.path().join("graph.lock").exists());
        // removing a missing lock is fine
        factory.force_remove("graph").unwrap();
    }

    #[test]
    fn test_independent_names() {
        let dir = TempDir::new().unwrap();
        let factory = LockFactory::new(dir.path());
        let _a = factory.lock_exclusive("a").unwrap();
        assert!(factory.lock_exclusive("b").is_ok());
    }
}
