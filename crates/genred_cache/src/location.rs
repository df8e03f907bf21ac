//! Build locations and the cross-process lock guarding them.
//!
//! The lock is an advisory `flock`-style lock on `<location>/build.lock`,
//! taken through [`fs2`]. The operating system drops it when the holding
//! process exits, so a builder that crashes never leaves the location
//! locked; at worst it leaves unpublished outputs behind, which the next
//! builder clears.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::error::{CacheError, CompileError};
use crate::fingerprint::Fingerprint;

/// Name of the lock file inside every build location.
pub const LOCK_FILE: &str = "build.lock";

/// Poll interval while waiting for a contended lock with a timeout.
const LOCK_POLL: Duration = Duration::from_millis(25);

/// The on-disk directory associated 1:1 with a fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildLocation {
    fingerprint: Fingerprint,
    dir: PathBuf,
}

impl BuildLocation {
    /// Derives the location of `fingerprint` under `root`. Does not touch disk.
    pub fn new(root: &Path, fingerprint: &Fingerprint) -> Self {
        Self {
            fingerprint: fingerprint.clone(),
            dir: root.join(fingerprint.as_str()),
        }
    }

    /// The fingerprint this location belongs to.
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// The directory path.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates the directory if it does not exist.
    pub fn create(&self) -> Result<(), CacheError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| CacheError::io(&self.dir, e))
    }

    /// Acquires the exclusive build lock, blocking until it is free or
    /// `timeout` elapses. `None` waits indefinitely.
    pub fn lock(&self, timeout: Option<Duration>) -> Result<BuildLock, CompileError> {
        let path = self.dir.join(LOCK_FILE);
        let lock_err = |source: std::io::Error| CompileError::Lock {
            location: self.dir.clone(),
            source,
        };
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(lock_err)?;

        match timeout {
            None => {
                FileExt::lock_exclusive(&file).map_err(lock_err)?;
            }
            Some(timeout) => {
                let start = Instant::now();
                loop {
                    match FileExt::try_lock_exclusive(&file) {
                        Ok(()) => break,
                        Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                            if start.elapsed() >= timeout {
                                return Err(CompileError::LockTimeout {
                                    location: self.dir.clone(),
                                    waited: start.elapsed(),
                                });
                            }
                            std::thread::sleep(LOCK_POLL);
                        }
                        Err(e) => return Err(lock_err(e)),
                    }
                }
            }
        }

        Ok(BuildLock { file, path })
    }

    /// Removes everything in the location except the lock file.
    ///
    /// Must only be called while holding the lock. Returns the number of
    /// entries removed.
    pub fn clear_outputs(&self) -> Result<usize, CacheError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(CacheError::io(&self.dir, e)),
        };

        let mut removed = 0;
        for entry in entries {
            let entry = entry.map_err(|e| CacheError::io(&self.dir, e))?;
            if entry.file_name() == LOCK_FILE {
                continue;
            }
            let path = entry.path();
            let file_type = entry.file_type().map_err(|e| CacheError::io(&path, e))?;
            let result = if file_type.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            result.map_err(|e| CacheError::io(&path, e))?;
            removed += 1;
        }
        Ok(removed)
    }
}

/// Scoped ownership of a build location.
///
/// The lock is released when the guard is dropped, on every exit path.
#[derive(Debug)]
pub struct BuildLock {
    file: File,
    path: PathBuf,
}

impl BuildLock {
    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        // Closing the file releases it too.
        let _ = FileExt::unlock(&self.file);
    }
}
