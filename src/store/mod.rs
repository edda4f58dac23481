//! File-backed JSON documents with single-writer discipline.
//!
//! Every state file in `.pipewright/` goes through [`JsonStore`]:
//!
//! - an exclusive advisory lock on `<file>.lock` serializes writers across
//!   processes (a hook firing while an agent completes a task),
//! - each mutation re-loads the file under the lock, so no caller acts on a
//!   stale copy,
//! - writes go to a temporary sibling and are renamed over the canonical file,
//!   so a crash never leaves a half-written document behind.
//!
//! A document that fails to parse is repaired when possible (see [`repair`]),
//! and otherwise replaced by the type's default after the corrupt original has
//! been backed up.

pub mod repair;

use chrono::Utc;
use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::errors::StoreError;

/// Held while a store file is locked. The lock is released on drop.
pub struct StoreLock {
    file: File,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// A JSON document on disk holding a value of type `T`.
pub struct JsonStore<T> {
    path: PathBuf,
    lock_path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for JsonStore<T> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            lock_path: self.lock_path.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for JsonStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonStore").field("path", &self.path).finish()
    }
}

impl<T: Serialize + DeserializeOwned> JsonStore<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        lock_name.push(".lock");
        let lock_path = path.with_file_name(lock_name);
        Self {
            path,
            lock_path,
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Take the exclusive lock, blocking until it is available.
    pub fn lock(&self) -> Result<StoreLock, StoreError> {
        if let Some(parent) = self.lock_path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::Lock {
                path: self.lock_path.clone(),
                source,
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(|source| StoreError::Lock {
                path: self.lock_path.clone(),
                source,
            })?;
        FileExt::lock_exclusive(&file).map_err(|source| StoreError::Lock {
            path: self.lock_path.clone(),
            source,
        })?;
        Ok(StoreLock { file })
    }

    /// Raw file contents, or `None` when the file does not exist.
    ///
    /// Callers that need consistency with a following write must hold the lock.
    pub fn read_text(&self) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Serialize `value` and atomically replace the file. Caller must hold the lock.
    pub fn write(&self, value: &T) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(value).map_err(|source| StoreError::Serialize {
            path: self.path.clone(),
            source,
        })?;
        atomic_write(&self.path, json.as_bytes()).map_err(|source| StoreError::Write {
            path: self.path.clone(),
            source,
        })
    }

    /// Lock, then write.
    pub fn replace(&self, value: &T) -> Result<(), StoreError> {
        let _lock = self.lock()?;
        self.write(value)
    }

    /// Copy the current file to `<file>.corrupt-<timestamp>` and return the backup path.
    pub fn backup_corrupt(&self) -> Result<PathBuf, StoreError> {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(format!(".corrupt-{}", Utc::now().format("%Y%m%dT%H%M%S%.3f")));
        let backup = self.path.with_file_name(name);
        fs::copy(&self.path, &backup).map_err(|source| StoreError::Write {
            path: backup.clone(),
            source,
        })?;
        Ok(backup)
    }
}

impl<T: Serialize + DeserializeOwned + Default> JsonStore<T> {
    /// Load the current value (default when the file is absent).
    pub fn load(&self) -> Result<T, StoreError> {
        let _lock = self.lock()?;
        self.load_locked()
    }

    /// Read-modify-write under the lock. The file is only rewritten when `f` succeeds.
    pub fn update<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut T) -> Result<R, E>,
        E: From<StoreError>,
    {
        let _lock = self.lock()?;
        let mut value = self.load_locked()?;
        let out = f(&mut value)?;
        self.write(&value)?;
        Ok(out)
    }

    fn load_locked(&self) -> Result<T, StoreError> {
        let Some(text) = self.read_text()? else {
            return Ok(T::default());
        };
        if text.trim().is_empty() {
            return Ok(T::default());
        }

        let parse_err = match serde_json::from_str::<T>(&text) {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let backup = self.backup_corrupt()?;
        let repaired = repair::repair(&text, |candidate| {
            serde_json::from_value::<T>(candidate.clone()).is_ok()
        });

        let value = match repaired {
            Some((candidate, strategy)) => {
                warn!(
                    path = %self.path.display(),
                    backup = %backup.display(),
                    strategy = %strategy,
                    error = %parse_err,
                    "Repaired corrupt state file"
                );
                serde_json::from_value::<T>(candidate).map_err(|e| {
                    StoreError::StructuralCorruption {
                        path: self.path.clone(),
                        reason: e.to_string(),
                    }
                })?
            }
            None => {
                warn!(
                    path = %self.path.display(),
                    backup = %backup.display(),
                    error = %parse_err,
                    "State file unrecoverable, starting from a clean default"
                );
                T::default()
            }
        };

        self.write(&value)?;
        Ok(value)
    }
}

/// Write `bytes` to a temporary sibling of `path`, fsync, then rename over `path`.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp_name = std::ffi::OsString::from(".");
    tmp_name.push(path.file_name().unwrap_or_default());
    tmp_name.push(format!(".{}.tmp", std::process::id()));
    let tmp = path.with_file_name(tmp_name);

    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    debug!(path = %path.display(), bytes = bytes.len(), "Wrote state file");
    Ok(())
}
