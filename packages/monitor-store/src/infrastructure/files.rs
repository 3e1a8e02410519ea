//! Record files on disk
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/current/<id>.xml
//! <root>/save/<id>.xml
//! <root>/replay/<id>.xml
//! ```
//!
//! Every read, copy and delete of a record file holds an exclusive `fs2` lock
//! on that one file for the duration of the call. The lock is released by
//! `FileLock::drop` on every exit path.
//!
//! Ids come from outside the process and are checked by `validate_id` before
//! any file operation; an id must name a single file inside its directory.

use chrono::{DateTime, Utc};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::domain::Partition;
use crate::{ErrorKind, Result, StoreError};

/// Directory a record file lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Location {
    Current,
    Saved,
    Replay,
}

impl Location {
    pub const ALL: [Location; 3] = [Location::Current, Location::Saved, Location::Replay];

    pub fn dir_name(&self) -> &'static str {
        match self {
            Location::Current => Partition::Current.dir_name(),
            Location::Saved => Partition::Saved.dir_name(),
            Location::Replay => "replay",
        }
    }
}

impl From<Partition> for Location {
    fn from(partition: Partition) -> Self {
        match partition {
            Partition::Current => Location::Current,
            Partition::Saved => Location::Saved,
        }
    }
}

/// Record file found by `RecordFiles::list`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub id: String,
    pub modified: DateTime<Utc>,
}

/// Exclusive lock on one record file, released on drop
#[derive(Debug)]
pub struct FileLock {
    file: File,
}

impl FileLock {
    fn acquire(file: File, id: &str) -> Result<Self> {
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { file }),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                Err(StoreError::lock_contention(id))
            }
            Err(e) => Err(StoreError::from(e)),
        }
    }

    pub fn file(&mut self) -> &mut File {
        &mut self.file
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!("Failed to release record file lock: {}", e);
        }
    }
}

/// Reject ids that would not map to one file directly under a location
pub fn validate_id(id: &str) -> Result<()> {
    let invalid = id.is_empty()
        || id == "."
        || id == ".."
        || id.contains(&['/', '\\', '\0'][..]);
    if invalid {
        return Err(StoreError::malformed(
            id.escape_debug(),
            "record id must be a plain file name",
        ));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct RecordFiles {
    root: PathBuf,
    extension: &'static str,
}

impl RecordFiles {
    pub fn new(root: impl Into<PathBuf>, extension: &'static str) -> Self {
        Self {
            root: root.into(),
            extension,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, location: Location) -> PathBuf {
        self.root.join(location.dir_name())
    }

    pub fn path(&self, location: Location, id: &str) -> PathBuf {
        self.dir(location)
            .join(format!("{}.{}", id, self.extension))
    }

    pub fn exists(&self, location: Location, id: &str) -> bool {
        validate_id(id).is_ok() && self.path(location, id).is_file()
    }

    /// Create the three directories (idempotent)
    pub fn ensure_dirs(&self) -> Result<()> {
        for location in Location::ALL {
            let dir = self.dir(location);
            fs::create_dir_all(&dir).map_err(|e| {
                StoreError::storage_unavailable(format!(
                    "Cannot create {} directory {}: {}",
                    location.dir_name(),
                    dir.display(),
                    e
                ))
                .with_source(e)
            })?;
        }
        Ok(())
    }

    pub fn dirs_exist(&self) -> bool {
        Location::ALL.iter().all(|l| self.dir(*l).is_dir())
    }

    /// Read one record file under its lock
    pub fn read(&self, location: Location, id: &str) -> Result<Vec<u8>> {
        let file = self.open_existing(location, id)?;
        let mut lock = FileLock::acquire(file, id)?;
        let mut bytes = Vec::new();
        lock.file().read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    /// Create or overwrite a record file under its lock
    pub fn write(&self, location: Location, id: &str, bytes: &[u8]) -> Result<()> {
        validate_id(id)?;
        let path = self.path(location, id);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let mut lock = FileLock::acquire(file, id)?;
        let file = lock.file();
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(bytes)?;
        file.sync_all()?;
        Ok(())
    }

    /// Write a file that must be fresh: a stale one is locked, deleted and
    /// recreated
    pub fn recreate(&self, location: Location, id: &str, bytes: &[u8]) -> Result<()> {
        validate_id(id)?;
        if self.exists(location, id) {
            debug!("Removing stale {} file for {}", location.dir_name(), id);
            self.delete(location, id)?;
        }
        self.write(location, id, bytes)
    }

    /// Copy `id` from one location to another, then delete the source
    ///
    /// The source lock is held across copy and delete. The target is locked
    /// before it is truncated.
    pub fn move_file(&self, id: &str, from: Location, to: Location) -> Result<()> {
        let source_path = self.path(from, id);
        let file = self.open_existing(from, id)?;
        let mut lock = FileLock::acquire(file, id)?;

        let target_path = self.path(to, id);
        let target = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&target_path)?;
        let mut target = FileLock::acquire(target, id)?;
        if let Err(e) = copy_into(lock.file(), target.file()) {
            drop(target);
            if let Err(cleanup) = fs::remove_file(&target_path) {
                warn!(
                    "Failed to remove partial copy {}: {}",
                    target_path.display(),
                    cleanup
                );
            }
            return Err(e.into());
        }

        fs::remove_file(&source_path)?;
        Ok(())
    }

    /// Delete one record file under its lock
    pub fn delete(&self, location: Location, id: &str) -> Result<()> {
        let path = self.path(location, id);
        let file = self.open_existing(location, id)?;
        let _lock = FileLock::acquire(file, id)?;
        fs::remove_file(&path)?;
        Ok(())
    }

    /// Record files in a location with their modification time
    ///
    /// Entries that cannot be inspected are skipped with a warning.
    pub fn list(&self, location: Location) -> Result<Vec<StoredFile>> {
        let dir = self.dir(location);
        let entries = fs::read_dir(&dir).map_err(|e| {
            StoreError::storage_unavailable(format!("Cannot list {}: {}", dir.display(), e))
                .with_source(e)
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
                    continue;
                }
            };
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(self.extension) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if validate_id(id).is_err() {
                debug!("Skipping {}: not a record id", path.display());
                continue;
            }
            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(modified) => DateTime::<Utc>::from(modified),
                Err(e) => {
                    warn!("Skipping {}: no modification time ({})", path.display(), e);
                    continue;
                }
            };
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            files.push(StoredFile {
                id: id.to_string(),
                modified,
            });
        }
        Ok(files)
    }

    fn open_existing(&self, location: Location, id: &str) -> Result<File> {
        validate_id(id)?;
        File::open(self.path(location, id)).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                StoreError::new(
                    ErrorKind::NotFound,
                    format!("No {} file for {}", location.dir_name(), id),
                )
            } else {
                StoreError::from(e)
            }
        })
    }
}

fn copy_into(source: &mut File, target: &mut File) -> io::Result<()> {
    target.set_len(0)?;
    target.seek(SeekFrom::Start(0))?;
    io::copy(source, target)?;
    target.sync_all()
}
