//! Places archives are kept.
//!
//! [`StorageBackend`] is implemented by [`local::LocalStorage`] (a directory) and
//! [`remote::RemoteStorage`] (a cloud drive). The orchestrator only talks to the trait.

pub mod local;
pub mod remote;

use crate::backup::game::GameVersion;
use crate::backup::result_error::result::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A stored archive as seen in a listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub name: String,
    /// Path for local storage, file id for remote storage.
    pub locator: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
}

pub trait StorageBackend: Send + Sync {
    /// Short label for logs, e.g. the destination directory.
    fn describe(&self) -> String;

    /// Identity of the destination. Two backends with the same key write to the same place.
    fn lock_key(&self) -> Result<String> {
        Ok(self.describe())
    }

    /// Directory holding the cross-process lock file, when the destination is on disk.
    fn lock_dir(&self) -> Result<Option<PathBuf>> {
        Ok(None)
    }

    /// Where a new archive should be written when it can go straight to its final
    /// place. `None` means it must be built in a scratch directory and stored afterwards.
    fn direct_path(&self, file_name: &str) -> Result<Option<PathBuf>>;

    /// Persists a finished archive under `name` and returns its locator.
    fn store(&self, local_file: &Path, name: &str) -> Result<String>;

    /// Archives of `version`, newest first.
    fn list(&self, version: GameVersion) -> Result<Vec<BackupRecord>>;

    /// Makes the archive readable at a local path, downloading into `scratch_dir` if needed.
    fn fetch(&self, locator: &str, scratch_dir: &Path) -> Result<PathBuf>;

    fn delete(&self, locator: &str) -> Result<()>;
}

impl<T: StorageBackend + ?Sized> StorageBackend for Box<T> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn lock_key(&self) -> Result<String> {
        (**self).lock_key()
    }

    fn lock_dir(&self) -> Result<Option<PathBuf>> {
        (**self).lock_dir()
    }

    fn direct_path(&self, file_name: &str) -> Result<Option<PathBuf>> {
        (**self).direct_path(file_name)
    }

    fn store(&self, local_file: &Path, name: &str) -> Result<String> {
        (**self).store(local_file, name)
    }

    fn list(&self, version: GameVersion) -> Result<Vec<BackupRecord>> {
        (**self).list(version)
    }

    fn fetch(&self, locator: &str, scratch_dir: &Path) -> Result<PathBuf> {
        (**self).fetch(locator, scratch_dir)
    }

    fn delete(&self, locator: &str) -> Result<()> {
        (**self).delete(locator)
    }
}

pub(crate) fn sort_newest_first(records: &mut [BackupRecord]) {
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.name.cmp(&a.name)));
}
