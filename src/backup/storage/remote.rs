use crate::backup::cloud::CloudDrive;
use crate::backup::game::GameVersion;
use crate::backup::naming::parse_archive_file_name;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use crate::backup::storage::{sort_newest_first, BackupRecord, StorageBackend};
use std::path::{Path, PathBuf};
use std::sync::Arc;

static DOWNLOAD_FILE_NAME: &str = "backup.zip";

/// Archives kept on a cloud drive. Every operation fails fast when signed out.
#[derive(Clone)]
pub struct RemoteStorage {
    drive: Arc<dyn CloudDrive>,
}

impl RemoteStorage {
    pub fn new(drive: Arc<dyn CloudDrive>) -> Self {
        Self { drive }
    }

    fn ensure_authenticated(&self) -> Result<()> {
        if self.drive.is_authenticated() {
            Ok(())
        } else {
            Err(Error::authentication(self.drive.provider()))
        }
    }
}

impl StorageBackend for RemoteStorage {
    fn describe(&self) -> String {
        format!("remote:{}", self.drive.provider())
    }

    fn direct_path(&self, _file_name: &str) -> Result<Option<PathBuf>> {
        Ok(None)
    }

    fn store(&self, local_file: &Path, name: &str) -> Result<String> {
        self.ensure_authenticated()?;
        let uploaded = self
            .drive
            .upload(local_file, name)
            .add_msg(format!("Upload of {name} to {} failed", self.drive.provider()))?;
        tracing::info!("Uploaded {} as {}", uploaded.name, uploaded.id);
        Ok(uploaded.id)
    }

    fn list(&self, version: GameVersion) -> Result<Vec<BackupRecord>> {
        self.ensure_authenticated()?;
        let mut records: Vec<BackupRecord> = self
            .drive
            .list_files()?
            .into_iter()
            .filter(|f| parse_archive_file_name(&f.name, version).is_some())
            .map(|f| BackupRecord {
                name: f.name,
                locator: f.id,
                created_at: f.created_time,
                size_bytes: f.size.unwrap_or(0),
            })
            .collect();
        sort_newest_first(&mut records);
        Ok(records)
    }

    fn fetch(&self, locator: &str, scratch_dir: &Path) -> Result<PathBuf> {
        self.ensure_authenticated()?;
        std::fs::create_dir_all(scratch_dir)?;
        let target = scratch_dir.join(DOWNLOAD_FILE_NAME);
        self.drive
            .download(locator, &target)
            .add_msg(format!("Download of {locator} failed"))?;
        Ok(target)
    }

    fn delete(&self, locator: &str) -> Result<()> {
        self.ensure_authenticated()?;
        self.drive.delete_file(locator)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backup::cloud::RemoteFile;
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// In-memory drive keeping uploaded bytes, with a counter of provider calls.
    #[derive(Default)]
    pub(crate) struct FakeDrive {
        pub signed_in: AtomicBool,
        pub calls: AtomicUsize,
        pub files: Mutex<BTreeMap<String, (RemoteFile, Vec<u8>)>>,
        next_id: AtomicUsize,
    }

    impl FakeDrive {
        pub fn signed_in() -> Self {
            let drive = Self::default();
            drive.signed_in.store(true, Ordering::SeqCst);
            drive
        }

        pub fn insert(&self, name: &str, created_time: DateTime<Utc>, bytes: Vec<u8>) -> String {
            let id = format!("id-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
            let file = RemoteFile {
                id: id.clone(),
                name: name.to_string(),
                created_time,
                size: Some(bytes.len() as u64),
            };
            self.files.lock().unwrap().insert(id.clone(), (file, bytes));
            id
        }

        fn call(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl CloudDrive for FakeDrive {
        fn provider(&self) -> &str {
            "Fake Drive"
        }

        fn is_authenticated(&self) -> bool {
            self.signed_in.load(Ordering::SeqCst)
        }

        fn auth_url(&self) -> Result<String> {
            Ok("https://example.com/auth".into())
        }

        fn exchange_code(&self, _code: &str) -> Result<()> {
            self.signed_in.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn logout(&self) -> Result<()> {
            self.signed_in.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn upload(&self, local_file: &Path, name: &str) -> Result<RemoteFile> {
            self.call();
            let bytes = std::fs::read(local_file)?;
            let id = self.insert(name, Utc::now(), bytes);
            Ok(self.files.lock().unwrap()[&id].0.clone())
        }

        fn list_files(&self) -> Result<Vec<RemoteFile>> {
            self.call();
            Ok(self.files.lock().unwrap().values().map(|(f, _)| f.clone()).collect())
        }

        fn download(&self, id: &str, destination: &Path) -> Result<()> {
            self.call();
            let bytes = self
                .files
                .lock()
                .unwrap()
                .get(id)
                .map(|(_, b)| b.clone())
                .ok_or_else(|| Error::not_found(id))?;
            std::fs::write(destination, bytes)?;
            Ok(())
        }

        fn delete_file(&self, id: &str) -> Result<()> {
            self.call();
            self.files
                .lock()
                .unwrap()
                .remove(id)
                .map(|_| ())
                .ok_or_else(|| Error::not_found(id))
        }
    }

    #[test]
    fn test_signed_out_fails_before_any_call() {
        let drive = Arc::new(FakeDrive::default());
        let storage = RemoteStorage::new(drive.clone());
        let dir = TempDir::new().unwrap();

        assert!(matches!(storage.delete("id-0").unwrap_err(), Error::Authentication(_)));
        assert!(matches!(storage.list(GameVersion::Retail).unwrap_err(), Error::Authentication(_)));
        assert!(matches!(storage.fetch("id-0", dir.path()).unwrap_err(), Error::Authentication(_)));
        assert!(matches!(
            storage.store(&dir.path().join("x.zip"), "x.zip").unwrap_err(),
            Error::Authentication(_)
        ));
        assert_eq!(drive.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_list_filters_by_version_and_sorts() {
        let drive = Arc::new(FakeDrive::signed_in());
        let t = |d| Utc.with_ymd_and_hms(2024, 3, d, 12, 0, 0).unwrap();
        drive.insert("wow_retail_2024-03-01T12-00-00.000Z.zip", t(1), vec![1]);
        drive.insert("wow_retail_2024-03-03T12-00-00.000Z.zip", t(3), vec![1, 2]);
        drive.insert("wow_classic_2024-03-02T12-00-00.000Z.zip", t(2), vec![1]);
        drive.insert("notes.txt", t(4), vec![1]);

        let storage = RemoteStorage::new(drive);
        let names: Vec<_> = storage
            .list(GameVersion::Retail)
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "wow_retail_2024-03-03T12-00-00.000Z.zip",
                "wow_retail_2024-03-01T12-00-00.000Z.zip"
            ]
        );
    }

    #[test]
    fn test_store_fetch_delete() {
        let drive = Arc::new(FakeDrive::signed_in());
        let storage = RemoteStorage::new(drive.clone());
        let dir = TempDir::new().unwrap();
        let local = dir.path().join("a.zip");
        std::fs::write(&local, b"zip bytes").unwrap();

        let id = storage.store(&local, "wow_retail_2024-03-01T12-00-00.000Z.zip").unwrap();
        let fetched = storage.fetch(&id, &dir.path().join("scratch")).unwrap();
        assert_eq!(std::fs::read(fetched).unwrap(), b"zip bytes");

        storage.delete(&id).unwrap();
        assert!(storage.delete(&id).unwrap_err().is_not_found());
    }
}
