//! Snapshot persistence.
//!
//! The whole item list is written as one JSON document: serialize to
//! `<snapshot>.tmp`, fsync, rename over the live file. A crash at any point
//! leaves either the previous snapshot or the new one, never a torn file.
//!
//! One process owns a snapshot at a time. `lock()` takes an exclusive
//! advisory lock on `<snapshot>.lock` that lives as long as the returned guard.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::QueueItem;
use crate::error::StoreError;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot {
    version: u32,
    saved_at: DateTime<Utc>,
    items: Vec<QueueItem>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotRef<'a> {
    version: u32,
    saved_at: DateTime<Utc>,
    items: &'a [QueueItem],
}

/// Owner of one snapshot file.
#[derive(Debug, Clone)]
pub struct QueueStore {
    path: PathBuf,
}

impl QueueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        self.sibling(".tmp")
    }

    fn lock_path(&self) -> PathBuf {
        self.sibling(".lock")
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "queue.json".into());
        name.push(suffix);
        self.path.with_file_name(name)
    }

    fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        }
    }

    /// Take exclusive ownership of the snapshot.
    ///
    /// Fails with `StoreError::Locked` while another guard (in this or any
    /// other process) is alive.
    pub fn lock(&self) -> Result<StoreLock, StoreError> {
        let dir = self.dir();
        fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;

        let path = self.lock_path();
        let file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| StoreError::io(&path, e))?;

        match file.try_lock_exclusive() {
            Ok(true) => {
                debug!(path = %path.display(), "queue store locked");
                Ok(StoreLock { _file: file, path })
            }
            Ok(false) => Err(StoreError::Locked {
                path: self.path.clone(),
            }),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    /// Load the snapshot, treating every problem as "start empty".
    ///
    /// Never fails: a missing file is normal on first start, a corrupt one is
    /// logged and ignored.
    pub fn load(&self) -> Vec<QueueItem> {
        match self.try_load() {
            Ok(Some(items)) => {
                info!(path = %self.path.display(), items = items.len(), "queue snapshot loaded");
                items
            }
            Ok(None) => {
                debug!(path = %self.path.display(), "no queue snapshot, starting empty");
                Vec::new()
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "could not load queue snapshot, starting empty");
                Vec::new()
            }
        }
    }

    /// Load the snapshot. `Ok(None)` when there is none yet.
    pub fn try_load(&self) -> Result<Option<Vec<QueueItem>>, StoreError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };
        let snapshot: Snapshot = serde_json::from_slice(&raw)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StoreError::UnsupportedVersion {
                found: snapshot.version,
                expected: SNAPSHOT_VERSION,
            });
        }
        Ok(Some(snapshot.items))
    }

    /// Atomically replace the snapshot with `items`.
    pub fn save(&self, items: &[QueueItem]) -> Result<(), StoreError> {
        let dir = self.dir();
        fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;

        let snapshot = SnapshotRef {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            items,
        };
        let bytes = serde_json::to_vec_pretty(&snapshot)?;

        let tmp = self.temp_path();
        let written = (|| -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            fs::rename(&tmp, &self.path)
        })();

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::io(&self.path, e));
        }

        // directory entry durability; not all platforms allow opening a dir
        if let Ok(handle) = fs::File::open(dir) {
            let _ = handle.sync_all();
        }

        debug!(path = %self.path.display(), items = items.len(), "queue snapshot saved");
        Ok(())
    }
}

/// Exclusive ownership of a snapshot; released on drop.
#[derive(Debug)]
pub struct StoreLock {
    _file: fs::File,
    path: PathBuf,
}

impl StoreLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}
