use crate::backup::function_path;
use crate::backup::game::GameVersion;
use crate::backup::naming::{is_archive_file_name, parse_archive_file_name};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddDebugObjectAndFnName, AddFunctionName};
use crate::backup::storage::{sort_newest_first, BackupRecord, StorageBackend};
use function_name::named;
use getset::Getters;
use std::path::{Path, PathBuf};

/// Archives kept as plain files in one directory.
#[derive(Clone, Debug, Getters)]
#[getset(get = "pub")]
pub struct LocalStorage {
    dir: PathBuf,
}

impl LocalStorage {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    /// The backup directory with `.`, `..` and symlinks resolved. Created if missing.
    #[named]
    fn canonical_dir(&self) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .and_then(|_| self.dir.canonicalize())
            .map_err(Error::from)
            .add_debug_object_and_fn_name(self.dir.clone(), function_path!())
    }

    /// Checks that `path` names an archive directly inside the backup directory.
    fn owns(&self, path: &Path) -> bool {
        let is_archive = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(is_archive_file_name);
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let same_dir = match (parent.canonicalize(), self.dir.canonicalize()) {
            (Ok(parent), Ok(dir)) => parent == dir,
            _ => false,
        };
        is_archive && same_dir
    }
}

fn locator_of(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn not_found_or(e: std::io::Error, path: &Path) -> Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        Error::not_found(format!("Backup file not found: {:?}", path))
    } else {
        Error::from(e)
    }
}

impl StorageBackend for LocalStorage {
    fn describe(&self) -> String {
        format!("local:{}", self.dir.display())
    }

    fn lock_key(&self) -> Result<String> {
        Ok(format!("local:{}", self.canonical_dir()?.display()))
    }

    fn lock_dir(&self) -> Result<Option<PathBuf>> {
        self.canonical_dir().map(Some)
    }

    #[named]
    fn direct_path(&self, file_name: &str) -> Result<Option<PathBuf>> {
        std::fs::create_dir_all(&self.dir)
            .map_err(Error::from)
            .add_fn_name(function_path!())?;
        Ok(Some(self.dir.join(file_name)))
    }

    #[named]
    fn store(&self, local_file: &Path, name: &str) -> Result<String> {
        let target = self.dir.join(name);
        if local_file == target {
            return Ok(locator_of(&target));
        }

        std::fs::create_dir_all(&self.dir)
            .map_err(Error::from)
            .add_fn_name(function_path!())?;
        if std::fs::rename(local_file, &target).is_err() {
            // rename fails across filesystems
            std::fs::copy(local_file, &target)
                .map_err(Error::from)
                .add_fn_name(function_path!())?;
            std::fs::remove_file(local_file)
                .map_err(Error::from)
                .add_fn_name(function_path!())?;
        }

        tracing::info!("Stored backup at {:?}", target);
        Ok(locator_of(&target))
    }

    #[named]
    fn list(&self, version: GameVersion) -> Result<Vec<BackupRecord>> {
        if !self.dir.is_dir() {
            tracing::warn!("Backup directory does not exist: {:?}", self.dir);
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for entry in std::fs::read_dir(&self.dir)
            .map_err(Error::from)
            .add_fn_name(function_path!())?
        {
            let entry = entry.map_err(Error::from).add_fn_name(function_path!())?;
            let Some(file_name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let Some(created_at) = parse_archive_file_name(&file_name, version) else {
                tracing::trace!("Skipping {:?}, not a {} backup", file_name, version);
                continue;
            };
            let metadata = entry.metadata().map_err(Error::from).add_fn_name(function_path!())?;
            if !metadata.is_file() {
                continue;
            }

            records.push(BackupRecord {
                name: file_name,
                locator: locator_of(&entry.path()),
                created_at,
                size_bytes: metadata.len(),
            });
        }

        sort_newest_first(&mut records);
        tracing::debug!("Found {} {} backups in {:?}", records.len(), version, self.dir);
        Ok(records)
    }

    fn fetch(&self, locator: &str, _scratch_dir: &Path) -> Result<PathBuf> {
        let path = PathBuf::from(locator);
        if !path.is_file() {
            return Err(Error::not_found(format!("Backup file not found: {:?}", path)));
        }
        Ok(path)
    }

    #[named]
    fn delete(&self, locator: &str) -> Result<()> {
        let path = Path::new(locator);
        if !self.owns(path) {
            return Err(Error::not_found(format!(
                "{:?} is not a backup in {:?}",
                path, self.dir
            )));
        }
        std::fs::remove_file(path)
            .map_err(|e| not_found_or(e, path))
            .add_debug_object_and_fn_name(path.to_path_buf(), function_path!())?;
        tracing::info!("Backup {:?} deleted from local storage", path);
        Ok(())
    }
}
