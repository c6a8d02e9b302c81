//! Backup, restore, list, delete and retention over one storage backend.
//!
//! [`BackupOrchestrator`] sequences the folder resolver, the archive engine and
//! a [`StorageBackend`]. Operations targeting the same destination are
//! serialised, first by a process wide mutex and then by an advisory lock file,
//! so a scheduled run in the daemon and a manual run never write archives side
//! by side.
//!
//! Scratch directories live under `scratch_dir` as `backup-quest-*`. Each holds
//! a locked marker file while in use; after a remote upload every other entry of
//! `scratch_dir` that is not locked is removed.

use crate::backup::archive::progress::{ProgressEvent, ProgressSink, ScaledSink};
use crate::backup::archive::{create_archive, extract_archive};
use crate::backup::function_path;
use crate::backup::game::{resolve_restore_targets, resolve_source_folders};
use crate::backup::naming::archive_file_name;
use crate::backup::options::BackupOptions;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddDebugObjectAndFnName, AddFunctionName, AddMsg};
use crate::backup::retention::{RetentionPolicy, RetentionReport};
use crate::backup::storage::{BackupRecord, StorageBackend};
use bon::Builder;
use chrono::Utc;
use derive_more::Display;
use function_name::named;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tempfile::TempDir;
use walkdir::WalkDir;

static SCRATCH_PREFIX: &str = "backup-quest-";
static LOCK_FILE: &str = ".backup-quest.lock";
static SCRATCH_ROOT_LOCK: &str = ".scratch.lock";
static LOCK_EXT: &str = ".lock";
static EXTRACT_DIR: &str = "extracted";
/// Share of the bar spent archiving when the archive still has to be uploaded.
static REMOTE_ARCHIVE_SPAN: f64 = 90.0;

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum BackupStage {
    #[display("resolving folders")]
    ResolvingFolders,
    #[display("archiving")]
    Archiving,
    #[display("uploading")]
    Uploading,
    #[display("applying retention")]
    ApplyingRetention,
    #[display("fetching backup")]
    Fetching,
    #[display("extracting backup")]
    Extracting,
    #[display("replacing folders")]
    Replacing,
}

fn in_stage<T>(result: Result<T>, stage: BackupStage) -> Result<T> {
    result.add_msg(format!("Backup operation failed while {stage}"))
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mutex shared by every orchestrator in this process writing to `destination`.
fn destination_lock(destination: &str) -> Arc<Mutex<()>> {
    static LOCKS: OnceLock<Mutex<HashMap<String, Arc<Mutex<()>>>>> = OnceLock::new();
    let locks = LOCKS.get_or_init(Default::default);
    lock(locks).entry(destination.to_string()).or_default().clone()
}

/// Archive being written next to its final location; removed unless kept.
struct PartialFile {
    path: PathBuf,
    keep: bool,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        Self { path, keep: false }
    }

    fn keep(mut self) {
        self.keep = true;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.keep || !self.path.exists() {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(_) => tracing::info!("Removed partial archive {:?}", self.path),
            Err(e) => tracing::error!("Failed to remove partial archive {:?}: {e}", self.path),
        }
    }
}

#[named]
fn open_lock_file(path: &Path) -> Result<fd_lock::RwLock<File>> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map(fd_lock::RwLock::new)
        .map_err(Error::from)
        .add_debug_object_and_fn_name(path.to_path_buf(), function_path!())
}

/// File name for the lock of a destination that has no directory of its own.
fn lock_file_name(key: &str) -> String {
    let slug: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    format!(".{slug}{LOCK_EXT}")
}

/// Whether another operation still holds the marker inside scratch directory `dir`.
fn scratch_in_use(dir: &Path) -> bool {
    let Ok(file) = OpenOptions::new().read(true).write(true).open(dir.join(LOCK_FILE)) else {
        return false;
    };
    let mut marker = fd_lock::RwLock::new(file);
    let in_use = marker.try_write().is_err();
    in_use
}

fn close_scratch(scratch: TempDir) {
    let path = scratch.path().to_path_buf();
    if let Err(e) = scratch.close() {
        tracing::warn!("Failed to clean up scratch directory {:?}: {e}", path);
    }
}

#[named]
fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    for entry in WalkDir::new(src).follow_links(true) {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| Error::configuration(e.to_string()))?;
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)
                .map_err(Error::from)
                .add_fn_name(function_path!())?;
        } else {
            std::fs::copy(entry.path(), &target)
                .map_err(Error::from)
                .add_msg(format!("Copy {:?} to {:?} failed", entry.path(), target))?;
        }
    }
    Ok(())
}

#[derive(Builder)]
pub struct BackupOrchestrator {
    storage: Box<dyn StorageBackend>,
    #[builder(default)]
    retention: RetentionPolicy,
    /// Parent of the temporary directories used for remote archives and restores.
    #[builder(into)]
    scratch_dir: PathBuf,
}

impl BackupOrchestrator {
    pub fn storage(&self) -> &dyn StorageBackend {
        self.storage.as_ref()
    }

    #[named]
    fn ensure_scratch_root(&self) -> Result<()> {
        std::fs::create_dir_all(&self.scratch_dir)
            .map_err(Error::from)
            .add_fn_name(function_path!())
    }

    /// Runs `op` while holding the destination, in this process and across processes.
    #[named]
    fn exclusive<T>(&self, op: impl FnOnce() -> Result<T>) -> Result<T> {
        let key = self.storage.lock_key()?;
        let in_process = destination_lock(&key);
        let _held = lock(&in_process);

        let lock_path = match self.storage.lock_dir()? {
            Some(dir) => dir.join(LOCK_FILE),
            None => {
                self.ensure_scratch_root()?;
                self.scratch_dir.join(lock_file_name(&key))
            }
        };
        let mut file_lock = open_lock_file(&lock_path)?;
        tracing::debug!("Waiting for {:?}", lock_path);
        let _file_guard = file_lock
            .write()
            .map_err(Error::from)
            .add_debug_object_and_fn_name(lock_path.clone(), function_path!())?;
        op()
    }

    /// Runs `op` in a fresh scratch directory that is removed afterwards.
    #[named]
    fn with_scratch<T>(&self, op: impl FnOnce(&Path) -> Result<T>) -> Result<T> {
        self.ensure_scratch_root()?;
        let mut root = open_lock_file(&self.scratch_dir.join(SCRATCH_ROOT_LOCK))?;
        let root_guard = root.write().map_err(Error::from).add_fn_name(function_path!())?;
        let scratch = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(&self.scratch_dir)
            .map_err(Error::from)
            .add_fn_name(function_path!())?;
        let mut marker = open_lock_file(&scratch.path().join(LOCK_FILE))?;
        let marker_guard = marker.write().map_err(Error::from).add_fn_name(function_path!())?;
        drop(root_guard);

        let result = op(scratch.path());
        drop(marker_guard);
        drop(marker);
        close_scratch(scratch);
        result
    }

    /// Removes leftovers of earlier runs from the scratch root. Returns how many
    /// entries went; failures on single entries are logged.
    #[named]
    fn purge_scratch(&self) -> Result<usize> {
        let mut root = open_lock_file(&self.scratch_dir.join(SCRATCH_ROOT_LOCK))?;
        let _guard = root.write().map_err(Error::from).add_fn_name(function_path!())?;

        let mut removed = 0;
        for entry in std::fs::read_dir(&self.scratch_dir)
            .map_err(Error::from)
            .add_fn_name(function_path!())?
        {
            let entry = entry.map_err(Error::from).add_fn_name(function_path!())?;
            let path = entry.path();
            if entry.file_name().to_string_lossy().ends_with(LOCK_EXT) {
                continue;
            }
            let is_dir = entry.file_type().is_ok_and(|t| t.is_dir());
            if is_dir && scratch_in_use(&path) {
                tracing::debug!("Scratch {:?} is in use, keeping it", path);
                continue;
            }

            let res = if is_dir {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            match res {
                Ok(_) => removed += 1,
                Err(e) => tracing::warn!("Failed to purge {:?} from scratch: {e}", path),
            }
        }
        Ok(removed)
    }

    /// Creates an archive of the game folders, stores it and applies retention.
    ///
    /// Returns the locator of the new archive. Retention failures are logged only.
    pub fn create_backup(&self, options: &BackupOptions, progress: &mut dyn ProgressSink) -> Result<String> {
        self.exclusive(|| self.create_locked(options, progress))
    }

    fn create_locked(&self, options: &BackupOptions, progress: &mut dyn ProgressSink) -> Result<String> {
        tracing::info!(
            "Starting {} backup of {:?} into {}",
            options.version,
            options.root_path,
            self.storage.describe()
        );

        let sources = in_stage(
            resolve_source_folders(&options.root_path, options.version),
            BackupStage::ResolvingFolders,
        )?;
        let file_name = archive_file_name(options.version, Utc::now());

        let locator = match self.storage.direct_path(&file_name)? {
            Some(target) => self.archive_in_place(&sources, &target, &file_name, progress)?,
            None => self.archive_and_store(&sources, &file_name, progress)?,
        };
        tracing::info!("Backup created: {}", locator);

        match self.sweep(options) {
            Ok(report) if report.is_clean() => {
                if !report.deleted.is_empty() {
                    tracing::info!("Retention removed {} old backups", report.deleted.len());
                }
            }
            Ok(report) => {
                for (record, e) in &report.failed {
                    tracing::error!("Retention could not delete {}: {e}", record.name);
                }
            }
            Err(e) => tracing::error!("Retention failed: {e}"),
        }

        progress.report(ProgressEvent::new(100.0, "Backup complete"));
        Ok(locator)
    }

    fn archive_in_place(
        &self,
        sources: &[PathBuf],
        target: &Path,
        file_name: &str,
        progress: &mut dyn ProgressSink,
    ) -> Result<String> {
        let partial = PartialFile::new(target.with_file_name(format!("{file_name}.tmp")));
        let file = in_stage(
            File::create(&partial.path).map_err(Error::from),
            BackupStage::Archiving,
        )?;
        in_stage(
            create_archive(sources, BufWriter::new(file), progress),
            BackupStage::Archiving,
        )?;

        let locator = self.storage.store(&partial.path, file_name)?;
        partial.keep();
        Ok(locator)
    }

    fn archive_and_store(
        &self,
        sources: &[PathBuf],
        file_name: &str,
        progress: &mut dyn ProgressSink,
    ) -> Result<String> {
        let locator = self.with_scratch(|scratch| {
            let local = scratch.join(file_name);
            {
                let file = in_stage(File::create(&local).map_err(Error::from), BackupStage::Archiving)?;
                let mut scaled = ScaledSink::new(&mut *progress, 0.0, REMOTE_ARCHIVE_SPAN);
                in_stage(
                    create_archive(sources, BufWriter::new(file), &mut scaled),
                    BackupStage::Archiving,
                )?;
            }

            progress.report(ProgressEvent::new(
                REMOTE_ARCHIVE_SPAN,
                format!("Uploading to {}...", self.storage.describe()),
            ));
            in_stage(self.storage.store(&local, file_name), BackupStage::Uploading)
        })?;

        match self.purge_scratch() {
            Ok(0) => {}
            Ok(removed) => tracing::info!("Purged {} stale entries from {:?}", removed, self.scratch_dir),
            Err(e) => tracing::warn!("Failed to purge scratch directory {:?}: {e}", self.scratch_dir),
        }
        Ok(locator)
    }

    /// Replaces the live `Interface`/`WTF` folders with the ones in the archive.
    ///
    /// Folders absent from the archive are left untouched.
    pub fn restore_backup(
        &self,
        options: &BackupOptions,
        locator: &str,
        progress: &mut dyn ProgressSink,
    ) -> Result<()> {
        self.exclusive(|| {
            tracing::info!("Restoring {} into {:?}", locator, options.root_path);
            progress.report(ProgressEvent::new(0.0, "Preparing restore..."));
            self.with_scratch(|scratch| self.restore_in(scratch, options, locator, &mut *progress))
        })?;
        progress.report(ProgressEvent::new(100.0, "Restore complete"));
        Ok(())
    }

    fn restore_in(
        &self,
        scratch: &Path,
        options: &BackupOptions,
        locator: &str,
        progress: &mut dyn ProgressSink,
    ) -> Result<()> {
        progress.report(ProgressEvent::new(10.0, "Fetching backup..."));
        let archive = in_stage(self.storage.fetch(locator, scratch), BackupStage::Fetching)?;

        progress.report(ProgressEvent::new(30.0, "Extracting backup..."));
        let extracted = scratch.join(EXTRACT_DIR);
        in_stage(extract_archive(&archive, &extracted), BackupStage::Extracting)?;

        progress.report(ProgressEvent::new(60.0, "Replacing folders..."));
        let mut restored = 0;
        for (name, live) in resolve_restore_targets(&options.root_path, options.version) {
            let source = extracted.join(name);
            if !source.is_dir() {
                tracing::debug!("{} is not in the backup, keeping {:?}", name, live);
                continue;
            }

            if live.exists() {
                in_stage(
                    std::fs::remove_dir_all(&live)
                        .map_err(Error::from)
                        .add_msg(format!("Remove {:?} failed", live)),
                    BackupStage::Replacing,
                )?;
            }
            in_stage(copy_dir(&source, &live), BackupStage::Replacing)?;
            tracing::info!("Restored {} into {:?}", name, live);
            restored += 1;
        }
        if restored == 0 {
            tracing::warn!("Backup {} contained no Interface or WTF folder", locator);
        }
        Ok(())
    }

    /// Backups for the configured game version, newest first.
    pub fn list_backups(&self, options: &BackupOptions) -> Result<Vec<BackupRecord>> {
        self.storage.list(options.version)
    }

    pub fn delete_backup(&self, locator: &str) -> Result<()> {
        self.exclusive(|| self.storage.delete(locator))?;
        tracing::info!("Deleted backup {}", locator);
        Ok(())
    }

    /// Deletes the oldest backups beyond the retention limit.
    pub fn apply_retention(&self, options: &BackupOptions) -> Result<RetentionReport> {
        self.exclusive(|| self.sweep(options))
    }

    /// Retention without taking the destination lock.
    fn sweep(&self, options: &BackupOptions) -> Result<RetentionReport> {
        let mut report = RetentionReport::default();
        if !self.retention.is_active() {
            return Ok(report);
        }

        let records = in_stage(self.storage.list(options.version), BackupStage::ApplyingRetention)?;
        let evictions = self.retention.select_evictions(&records);
        if evictions.is_empty() {
            return Ok(report);
        }

        tracing::info!(
            "Found {} backups, limit is {}. Deleting {} old backups",
            records.len(),
            self.retention.max_count,
            evictions.len()
        );
        for record in evictions {
            match self.storage.delete(&record.locator) {
                Ok(_) => {
                    tracing::info!("Deleted old backup: {}", record.name);
                    report.deleted.push(record.clone());
                }
                Err(e) => {
                    tracing::error!("Failed to delete old backup {}: {e}", record.name);
                    report.failed.push((record.clone(), e));
                }
            }
        }
        Ok(report)
    }
}
